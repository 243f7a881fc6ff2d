use async_trait::async_trait;

use crate::error::DialError;

/// Byte stream handed out for one dial; the far end is pumped over the tunnel
pub type TunnelStream = tokio::io::DuplexStream;

/// Ability to open a byte stream to an address on the far side of a tunnel
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Session identifier, distinct for every connection of the same gateway
    fn id(&self) -> &str;

    async fn dial(&self, network: &str, address: &str) -> Result<TunnelStream, DialError>;
}
