//! Relay listener: plain HTTP or TLS, HTTP/1.1 only

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use portexporter_config::{listen_addr, TlsClientSettings, TlsServerSettings};
use portexporter_tunnel::TunnelRegistry;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::rustls::ClientConfig;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::ProxyServerError;

/// Bound on reading request headers and completing a TLS handshake
const READ_TIMEOUT: Duration = Duration::from_secs(15);

/// How long in-flight connections may run after shutdown starts
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ProxyServer {
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    upstream_tls: Arc<ClientConfig>,
    registry: TunnelRegistry,
}

impl ProxyServer {
    /// Bind the listener and load TLS material
    ///
    /// TLS is used when both a certificate and a key are configured.
    /// Forwarded `https://` requests verify their targets against the
    /// bundled web PKI roots.
    pub async fn bind(
        address: &str,
        tls: &TlsServerSettings,
        registry: TunnelRegistry,
    ) -> Result<Self, ProxyServerError> {
        let local_addr = listen_addr(address)?;
        let acceptor = tls.server_config()?.map(TlsAcceptor::from);
        let upstream_tls = TlsClientSettings::default().client_config()?;

        let listener = TcpListener::bind(local_addr)
            .await
            .map_err(|e| ProxyServerError::BindError {
                address: local_addr.ip().to_string(),
                port: local_addr.port(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            listener,
            acceptor,
            upstream_tls,
            registry,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ProxyServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> &TunnelRegistry {
        &self.registry
    }

    /// Serve until `shutdown` is cancelled, then drain open connections
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), ProxyServerError> {
        let bound = self.listener.local_addr()?;
        if self.acceptor.is_some() {
            info!("Listening for TLS connections on {}", bound);
        } else {
            info!("Listening for HTTP connections on {}", bound);
        }

        let dispatcher = Arc::new(Dispatcher::new(
            self.registry.clone(),
            self.upstream_tls.clone(),
            shutdown.clone(),
        ));
        let tracker = TaskTracker::new();

        loop {
            let (stream, remote) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let dispatcher = dispatcher.clone();
            let acceptor = self.acceptor.clone();
            let shutdown = shutdown.clone();

            tracker.spawn(async move {
                match acceptor {
                    Some(acceptor) => {
                        match tokio::time::timeout(READ_TIMEOUT, acceptor.accept(stream)).await {
                            Ok(Ok(tls)) => serve_connection(tls, remote, dispatcher, shutdown).await,
                            Ok(Err(e)) => debug!(remote = %remote, "TLS handshake failed: {}", e),
                            Err(_) => debug!(remote = %remote, "TLS handshake timed out"),
                        }
                    }
                    None => serve_connection(stream, remote, dispatcher, shutdown).await,
                }
            });
        }

        info!("Shutting down...");
        tracker.close();
        if tokio::time::timeout(DRAIN_TIMEOUT, tracker.wait())
            .await
            .is_err()
        {
            warn!(
                open_connections = tracker.len(),
                "Drain timed out, closing remaining connections"
            );
        }

        Ok(())
    }
}

async fn serve_connection<S>(
    io: S,
    remote: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req| {
        let dispatcher = dispatcher.clone();
        async move { Ok::<_, Infallible>(dispatcher.dispatch(req, remote).await) }
    });

    let mut builder = http1::Builder::new();
    builder.timer(TokioTimer::new()).header_read_timeout(READ_TIMEOUT);

    let conn = builder
        .serve_connection(TokioIo::new(io), service)
        .with_upgrades();
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = shutdown.cancelled() => {
            conn.as_mut().graceful_shutdown();
            conn.as_mut().await
        }
    };

    if let Err(e) = result {
        debug!(remote = %remote, "Connection error: {}", e);
    }
}
