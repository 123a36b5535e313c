use clap::Parser;

/// Command line options of the reference client.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct ClientConfig {
    /// Relay address, `host[:port]` or `[v6][:port]`
    #[arg(short = 's', long, default_value = "127.0.0.1:6500")]
    pub server: String,

    /// Player name shown to others
    #[arg(short = 'n', long, default_value = "player")]
    pub name: String,

    /// Room to enter after connecting
    #[arg(short = 'r', long, default_value_t = 1)]
    pub room: u16,

    /// Shared password; empty means plaintext
    #[arg(short = 'k', long, default_value = "")]
    pub crypt_key: String,

    /// Application name, separates unrelated client populations
    #[arg(short = 'g', long, default_value = "roomcast")]
    pub game_name: String,

    /// Do not send heartbeats
    #[arg(long)]
    pub no_heartbeats: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::parse_from(["client"])
    }
}
