//! Listen address parsing

use std::net::{SocketAddr, ToSocketAddrs};

use crate::yaml::ConfigError;

/// Resolve a listen address
///
/// Accepts `host:port`, `ip:port`, or a bare `:port` meaning every IPv4
/// interface.
pub fn listen_addr(address: &str) -> Result<SocketAddr, ConfigError> {
    let full = match address.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{}", port),
        None => address.to_string(),
    };

    full.to_socket_addrs()
        .map_err(|e| ConfigError::Invalid(format!("Invalid listen address '{}': {}", address, e)))?
        .next()
        .ok_or_else(|| {
            ConfigError::Invalid(format!(
                "Listen address '{}' did not resolve to any address",
                address
            ))
        })
}
