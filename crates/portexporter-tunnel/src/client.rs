//! Gateway side of the tunnel
//!
//! Keeps one outbound WebSocket to the relay open, reconnecting with
//! exponential backoff, and serves the relay's dial requests by connecting
//! to local TCP addresses the [`Authorizer`] permits.

use portexporter_proto::TUNNEL_ID_HEADER;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::Connector;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dialer::Dialer;
use crate::error::TunnelError;
use crate::session::{IncomingDial, TunnelSession};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const TARGET_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Decides whether the relay may open a connection to `(network, address)`
pub trait Authorizer: Send + Sync {
    fn authorize(&self, network: &str, address: &str) -> bool;
}

impl<F> Authorizer for F
where
    F: Fn(&str, &str) -> bool + Send + Sync,
{
    fn authorize(&self, network: &str, address: &str) -> bool {
        self(network, address)
    }
}

/// Where and as whom the gateway connects
#[derive(Clone)]
pub struct TunnelClientConfig {
    /// `ws://` or `wss://` URL of the relay's `/connect` endpoint
    pub url: String,
    pub identity: String,
    /// Used for `wss://` URLs; `None` falls back to native roots
    pub tls: Option<Arc<rustls::ClientConfig>>,
}

impl std::fmt::Debug for TunnelClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelClientConfig")
            .field("url", &self.url)
            .field("identity", &self.identity)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

impl TunnelClientConfig {
    fn request(&self) -> Result<Request, TunnelError> {
        let mut request =
            self.url
                .as_str()
                .into_client_request()
                .map_err(|e| TunnelError::InvalidUrl {
                    url: self.url.clone(),
                    reason: e.to_string(),
                })?;

        let identity = HeaderValue::from_str(&self.identity)
            .map_err(|_| TunnelError::InvalidIdentity(self.identity.clone()))?;
        request.headers_mut().insert(TUNNEL_ID_HEADER, identity);

        Ok(request)
    }
}

/// Run the tunnel until `shutdown` is cancelled
///
/// Only an unusable URL or identity is returned as an error; connection
/// failures are logged and retried.
pub async fn run(
    config: TunnelClientConfig,
    authorizer: Arc<dyn Authorizer>,
    shutdown: CancellationToken,
) -> Result<(), TunnelError> {
    config.request()?;

    let mut backoff = INITIAL_BACKOFF;
    loop {
        let attempt = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            attempt = connect(&config, &shutdown) => attempt,
        };

        match attempt {
            Ok((session, dials)) => {
                info!(
                    url = %config.url,
                    identity = %config.identity,
                    session_id = %session.id(),
                    "Tunnel connected"
                );
                backoff = INITIAL_BACKOFF;

                serve(session, dials, authorizer.clone()).await;
                if shutdown.is_cancelled() {
                    return Ok(());
                }
                warn!(url = %config.url, "Tunnel disconnected");
            }
            Err(e) => {
                warn!(url = %config.url, retry_in = ?backoff, "Failed to connect tunnel: {}", e);
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = next_backoff(backoff);
    }
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

async fn connect(
    config: &TunnelClientConfig,
    shutdown: &CancellationToken,
) -> Result<(Arc<TunnelSession>, mpsc::Receiver<IncomingDial>), TunnelError> {
    let request = config.request()?;
    let connector = config.tls.clone().map(Connector::Rustls);

    let (ws, _response) =
        tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector)
            .await
            .map_err(|e| match e {
                tokio_tungstenite::tungstenite::Error::Http(response) => {
                    TunnelError::Rejected(response.status().as_u16())
                }
                other => TunnelError::WebSocket(other),
            })?;

    Ok(TunnelSession::spawn(ws, shutdown))
}

async fn serve(
    session: Arc<TunnelSession>,
    mut dials: mpsc::Receiver<IncomingDial>,
    authorizer: Arc<dyn Authorizer>,
) {
    loop {
        let dial = tokio::select! {
            _ = session.closed() => break,
            dial = dials.recv() => match dial {
                Some(dial) => dial,
                None => break,
            },
        };

        tokio::spawn(handle_dial(session.clone(), authorizer.clone(), dial));
    }
}

async fn handle_dial(
    session: Arc<TunnelSession>,
    authorizer: Arc<dyn Authorizer>,
    dial: IncomingDial,
) {
    let IncomingDial { stream_id, request } = dial;

    if !authorizer.authorize(&request.network, &request.address) {
        debug!(stream_id, target = %request, "Dial not authorized");
        session
            .reject(stream_id, &format!("{} is not exposed by this gateway", request))
            .await;
        return;
    }

    let mut target =
        match tokio::time::timeout(TARGET_CONNECT_TIMEOUT, TcpStream::connect(&request.address))
            .await
        {
            Ok(Ok(target)) => target,
            Ok(Err(e)) => {
                debug!(stream_id, target = %request, "Dial failed: {}", e);
                session.reject(stream_id, &e.to_string()).await;
                return;
            }
            Err(_) => {
                debug!(stream_id, target = %request, "Dial timed out");
                session
                    .reject(stream_id, &format!("connect to {} timed out", request.address))
                    .await;
                return;
            }
        };

    let mut stream = match session.accept(stream_id).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!(stream_id, "Could not open tunnel stream: {}", e);
            return;
        }
    };

    match tokio::io::copy_bidirectional(&mut target, &mut stream).await {
        Ok((to_relay, from_relay)) => debug!(
            stream_id,
            target = %request,
            to_relay,
            from_relay,
            "Tunnel stream finished"
        ),
        Err(e) => debug!(stream_id, target = %request, "Tunnel stream error: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = INITIAL_BACKOFF;
        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(backoff.as_secs());
            backoff = next_backoff(backoff);
        }
        assert_eq!(seen, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn test_request_carries_identity() {
        let config = TunnelClientConfig {
            url: "ws://relay.example.com:10123/connect".to_string(),
            identity: "10.1.2.3".to_string(),
            tls: None,
        };

        let request = config.request().unwrap();
        assert_eq!(request.headers()[TUNNEL_ID_HEADER], "10.1.2.3");
        assert_eq!(request.uri().path(), "/connect");
    }

    #[test]
    fn test_invalid_url() {
        let config = TunnelClientConfig {
            url: "not a url".to_string(),
            identity: "gw".to_string(),
            tls: None,
        };
        assert!(matches!(
            config.request(),
            Err(TunnelError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_invalid_identity() {
        let config = TunnelClientConfig {
            url: "ws://relay/connect".to_string(),
            identity: "bad\nid".to_string(),
            tls: None,
        };
        assert!(matches!(
            config.request(),
            Err(TunnelError::InvalidIdentity(_))
        ));
    }

    #[test]
    fn test_closure_authorizer() {
        let authorizer = |network: &str, address: &str| network == "tcp" && address == "a:1";
        assert!(authorizer.authorize("tcp", "a:1"));
        assert!(!authorizer.authorize("udp", "a:1"));
    }
}
