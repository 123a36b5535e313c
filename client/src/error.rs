use shared::{AddressError, CryptoError, ProtocolError};
use thiserror::Error;

/// Errors surfaced by the client driver.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("invalid server address: {0}")]
    InvalidAddress(#[from] AddressError),
}

impl From<CryptoError> for ClientError {
    fn from(e: CryptoError) -> Self {
        ClientError::Protocol(e.into())
    }
}
