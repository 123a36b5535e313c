//! `host[:port]` parsing for listener and server addresses.

use crate::error::AddressError;

/// Port used when an address carries none.
pub const DEFAULT_PORT: u16 = 6500;

/// Splits `address` into host and port.
///
/// Accepted forms are `[v6]:port`, `[v6]`, `host:port` and `host`. A missing
/// port falls back to `default_port`. Brackets are stripped from IPv6 hosts.
pub fn parse_address(address: &str, default_port: u16) -> Result<(String, u16), AddressError> {
    let address = address.trim();
    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let close = rest
            .find(']')
            .ok_or_else(|| AddressError::UnterminatedV6(address.to_string()))?;
        let host = &rest[..close];
        let tail = &rest[close + 1..];
        match tail.strip_prefix(':') {
            Some(port) => (host, Some(port)),
            None if tail.is_empty() => (host, None),
            None => return Err(AddressError::InvalidPort(address.to_string())),
        }
    } else {
        match address.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (address, None),
        }
    };

    if host.is_empty() {
        return Err(AddressError::EmptyHost(address.to_string()));
    }
    let port = match port {
        Some(p) => p
            .parse()
            .map_err(|_| AddressError::InvalidPort(address.to_string()))?,
        None => default_port,
    };
    Ok((host.to_string(), port))
}

/// Formats a host and port back into something `ToSocketAddrs` accepts.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
