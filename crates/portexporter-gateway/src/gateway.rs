use portexporter_config::{ConfigError, TlsError};
use portexporter_tunnel::{client, TunnelClientConfig, TunnelError};
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::GatewayConfig;
use crate::exposure::ExposurePolicy;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error("Unable to determine host IP: {0}")]
    HostIp(#[source] std::io::Error),
}

/// A gateway bound to one relay
#[derive(Debug)]
pub struct Gateway {
    tunnel: TunnelClientConfig,
    policy: Arc<ExposurePolicy>,
}

impl Gateway {
    /// Prepare a gateway connecting to `proxy_url` as `identity`
    ///
    /// TLS settings only apply to `wss://` URLs.
    pub fn new(
        proxy_url: impl Into<String>,
        identity: impl Into<String>,
        config: &GatewayConfig,
    ) -> Result<Self, GatewayError> {
        config.validate()?;

        let url = proxy_url.into();
        let tls = if url.starts_with("wss://") {
            Some(config.tls.client_config()?)
        } else {
            None
        };

        Ok(Self {
            tunnel: TunnelClientConfig {
                url,
                identity: identity.into(),
                tls,
            },
            policy: Arc::new(config.policy()),
        })
    }

    pub fn identity(&self) -> &str {
        &self.tunnel.identity
    }

    pub fn policy(&self) -> &ExposurePolicy {
        &self.policy
    }

    /// Keep the tunnel up until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), GatewayError> {
        info!("Using id [{}]", self.tunnel.identity);

        if self.policy.is_open() {
            warn!("No expose addresses configured: every TCP address on this network is reachable through the relay");
        } else {
            info!(expose = ?self.policy.addresses(), "Exposing addresses");
        }

        client::run(self.tunnel, self.policy, shutdown).await?;
        Ok(())
    }
}

/// IP address of this host's preferred outbound interface
///
/// "Connects" a UDP socket to a public address, which sends nothing but makes
/// the kernel pick the local address it would route from.
pub async fn host_ip() -> Result<IpAddr, GatewayError> {
    let socket = tokio::net::UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(GatewayError::HostIp)?;
    socket
        .connect("8.8.8.8:80")
        .await
        .map_err(GatewayError::HostIp)?;

    Ok(socket.local_addr().map_err(GatewayError::HostIp)?.ip())
}
