//! Command line configuration for the relay.

use std::time::Duration;

use clap::Parser;
use shared::address::{join_host_port, parse_address, DEFAULT_PORT};

use crate::error::RouterError;

/// Idle time after which a silent connection is closed.
pub const READ_TIMEOUT: Duration = Duration::from_millis(6000);

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about = "Room-scoped game state relay")]
pub struct ServerConfig {
    /// Never time out idle connections
    #[clap(long)]
    pub no_heartbeats: bool,
    /// Primary listen address, host:port or [v6]:port
    #[clap(long, default_value = "[::]:6500")]
    pub bind_address: String,
    /// Optional second listen address
    #[clap(long = "bind-address-2")]
    pub bind_address_2: Option<String>,
    /// Maximum number of concurrent sessions
    #[clap(long, default_value_t = 100)]
    pub max_users: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            no_heartbeats: false,
            bind_address: format!("[::]:{}", DEFAULT_PORT),
            bind_address_2: None,
            max_users: 100,
        }
    }
}

impl ServerConfig {
    /// Read timeout for sessions, `None` when heartbeats are disabled.
    pub fn read_timeout(&self) -> Option<Duration> {
        if self.no_heartbeats {
            None
        } else {
            Some(READ_TIMEOUT)
        }
    }

    /// Normalized listen addresses, primary first.
    pub fn listen_addresses(&self) -> Result<Vec<String>, RouterError> {
        let mut addrs = Vec::with_capacity(2);
        for raw in std::iter::once(&self.bind_address).chain(self.bind_address_2.as_ref()) {
            let (host, port) = parse_address(raw, DEFAULT_PORT)?;
            addrs.push(join_host_port(&host, port));
        }
        Ok(addrs)
    }
}
