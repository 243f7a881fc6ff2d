use portexporter_config::{ConfigError, TlsError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RedirectError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("cannot register multiple redirects for address {0}")]
    DuplicateAddress(String),

    #[error("redirect address {0} has not been registered")]
    NotRegistered(String),

    #[error("Failed to watch files for redirect {address}: {source}")]
    Watch {
        address: String,
        source: notify::Error,
    },

    #[error("Redirect rebuild task failed: {0}")]
    Rebuild(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to bind to {address}: {reason}\n\nTroubleshooting:\n  • Check if another process is using this port: lsof -i :{port}\n  • Try using a different address or port")]
    BindError {
        address: String,
        port: u16,
        reason: String,
    },
}
