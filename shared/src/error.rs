//! Error types for the wire protocol and its crypto layer.

use thiserror::Error;

/// Result alias used throughout the protocol crate.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Failures of the symmetric crypto layer.
///
/// None of these are fatal to a connection: a failed decrypt drops the body
/// of the one packet it belongs to and dispatch continues with the next frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("cipher initialization failed")]
    Init,
    #[error("password hashing failed")]
    PasswordHash,
    #[error("generic hashing failed")]
    GenericHash,
    #[error("padding failed")]
    Pad,
    #[error("key copy failed")]
    CopyKey,
    #[error("encryption failed")]
    Encrypt,
    #[error("cipher data is invalid")]
    CipherDataInvalid,
    #[error("decryption failed")]
    Decrypt,
    #[error("unpadding failed")]
    Unpad,
}

/// Framing and decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The frame ended before a field could be read.
    #[error("truncated frame")]
    Truncated,
    /// No handler is registered for this tag. Usually a protocol mismatch.
    #[error("unknown packet type 0x{0:02x}")]
    UnknownPacketType(u8),
    /// The encoded frame does not fit behind a 16-bit length prefix.
    #[error("frame of {0} bytes exceeds the 16-bit length prefix")]
    FrameTooLarge(usize),
    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),
}

/// A `host[:port]` string that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("empty host in {0:?}")]
    EmptyHost(String),
    #[error("unterminated IPv6 literal in {0:?}")]
    UnterminatedV6(String),
    #[error("invalid port in {0:?}")]
    InvalidPort(String),
}
