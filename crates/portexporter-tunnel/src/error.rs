use std::time::Duration;
use thiserror::Error;

/// Failure to open a logical stream through a tunnel
#[derive(Debug, Error)]
pub enum DialError {
    #[error("dial {address} refused by gateway: {reason}")]
    Refused { address: String, reason: String },

    #[error("dial {address} timed out after {timeout:?}")]
    Timeout { address: String, timeout: Duration },

    #[error("tunnel session closed")]
    SessionClosed,
}

/// Gateway side connection errors
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("invalid tunnel URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid tunnel identity {0:?}")]
    InvalidIdentity(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("relay rejected registration with status {0}")]
    Rejected(u16),
}
