//! Shared configuration types
//!
//! TLS settings for listeners and outbound clients, listen address parsing,
//! and YAML document loading used by the gateway and redirector
//! configuration files.

pub mod listen;
pub mod tls;
pub mod yaml;

pub use listen::listen_addr;
pub use tls::{ensure_crypto_provider, TlsClientSettings, TlsError, TlsServerSettings};
pub use yaml::{load_yaml, ConfigError};
