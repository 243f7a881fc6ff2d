use portexporter_config::listen_addr;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::RedirectConfig;
use crate::error::RedirectError;
use crate::router::router;
use crate::table::RedirectTable;
use crate::watcher;

/// How long in-flight requests may run after shutdown starts
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct RedirectServer {
    listener: TcpListener,
    config: RedirectConfig,
    table: RedirectTable,
}

impl RedirectServer {
    /// Build every handler, then bind the listener
    pub async fn bind(address: &str, config: RedirectConfig) -> Result<Self, RedirectError> {
        config.validate()?;
        let table = RedirectTable::load(&config.redirect)?;

        let local_addr = listen_addr(address)?;
        let listener = TcpListener::bind(local_addr)
            .await
            .map_err(|e| RedirectError::BindError {
                address: local_addr.ip().to_string(),
                port: local_addr.port(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            listener,
            config,
            table,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RedirectError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn table(&self) -> &RedirectTable {
        &self.table
    }

    /// Serve and hot-reload until `shutdown` is cancelled
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), RedirectError> {
        for entry in &self.config.redirect {
            if let Err(e) = watcher::watch(entry.clone(), self.table.clone(), shutdown.clone()) {
                error!("Unable to set up watcher for redirect {}: {}", entry, e);
            }
        }

        info!("Listening on {}", self.listener.local_addr()?);

        let app = router(self.table).into_make_service_with_connect_info::<SocketAddr>();
        let server = axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown.clone().cancelled_owned())
            .into_future();
        tokio::pin!(server);

        tokio::select! {
            result = server.as_mut() => return Ok(result?),
            _ = shutdown.cancelled() => info!("Shutting down..."),
        }

        match tokio::time::timeout(DRAIN_TIMEOUT, server).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                warn!("Drain timed out, closing remaining connections");
                Ok(())
            }
        }
    }
}
