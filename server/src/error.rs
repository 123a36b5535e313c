//! Server error type.

use shared::{AddressError, ProtocolError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    /// The registry is full; the connection never gets a session.
    #[error("server is full ({max} sessions)")]
    Capacity { max: usize },
    #[error("router is already running")]
    AlreadyRunning,
    #[error("router is stopping")]
    Stopping,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid address: {0}")]
    InvalidAddress(#[from] AddressError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
