use hyper::StatusCode;
use portexporter_config::{ConfigError, TlsError};
use portexporter_tunnel::DialError;
use thiserror::Error;

/// Failure to deliver one request through a tunnel
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to find tunnel for client {0}")]
    NoTunnel(String),

    #[error(transparent)]
    Dial(#[from] DialError),

    #[error("connection does not support hijacking")]
    HijackUnsupported,

    #[error(transparent)]
    Upstream(#[from] hyper::Error),

    #[error("TLS handshake with {address} failed: {source}")]
    UpstreamTls {
        address: String,
        source: std::io::Error,
    },

    #[error("invalid proxy target: {0}")]
    InvalidTarget(String),
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::NoTunnel(_)
            | DispatchError::Dial(_)
            | DispatchError::Upstream(_)
            | DispatchError::UpstreamTls { .. } => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::HijackUnsupported => StatusCode::INTERNAL_SERVER_ERROR,
            DispatchError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProxyServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("Failed to bind to {address}: {reason}\n\nTroubleshooting:\n  • Check if another process is using this port: lsof -i :{port}\n  • Try using a different address or port")]
    BindError {
        address: String,
        port: u16,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            DispatchError::NoTunnel("gw".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            DispatchError::Dial(DialError::SessionClosed).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            DispatchError::UpstreamTls {
                address: "gw:443".into(),
                source: std::io::Error::other("bad certificate"),
            }
            .status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            DispatchError::HijackUnsupported.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            DispatchError::InvalidTarget("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_no_tunnel_message() {
        assert_eq!(
            DispatchError::NoTunnel("10.0.0.5".into()).to_string(),
            "failed to find tunnel for client 10.0.0.5"
        );
    }
}
