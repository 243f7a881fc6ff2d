//! Demo backend for exercising a relay or redirector by hand

use anyhow::{Context, Result};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioIo, TokioTimer};
use portexporter_config::{listen_addr, TlsServerSettings};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

const READ_TIMEOUT: Duration = Duration::from_secs(15);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// `hello` followed by the path segments, space separated
fn greeting(path: &str) -> String {
    if path == "/" {
        "hello".to_string()
    } else {
        format!("hello{}", path.replace('/', " "))
    }
}

pub struct EchoServer {
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
}

impl EchoServer {
    pub async fn bind(address: &str, tls: &TlsServerSettings) -> Result<Self> {
        let local_addr = listen_addr(address)?;
        let acceptor = tls
            .server_config()
            .context("Failed to load TLS configuration")?
            .map(TlsAcceptor::from);
        let listener = TcpListener::bind(local_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", local_addr))?;

        Ok(Self { listener, acceptor })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let bound = self.listener.local_addr()?;
        if self.acceptor.is_some() {
            info!("Listening for TLS connections on {}", bound);
        } else {
            info!("Listening for HTTP requests on http://{}", bound);
        }

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

            let acceptor = self.acceptor.clone();
            let shutdown = shutdown.clone();
            tracker.spawn(async move {
                match acceptor {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(tls) => serve_connection(tls, remote, shutdown).await,
                        Err(e) => debug!(remote = %remote, "TLS handshake failed: {}", e),
                    },
                    None => serve_connection(stream, remote, shutdown).await,
                }
            });
        }

        info!("Shutting down...");
        tracker.close();
        if tokio::time::timeout(DRAIN_TIMEOUT, tracker.wait()).await.is_err() {
            warn!("Drain timed out, closing remaining connections");
        }
        Ok(())
    }
}

async fn serve_connection<S>(io: S, remote: SocketAddr, shutdown: CancellationToken)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req: Request<hyper::body::Incoming>| async move {
        debug!(
            "Received request from host [{}] to url [{}]",
            remote,
            req.uri()
        );
        Ok::<_, Infallible>(Response::new(Full::new(Bytes::from(greeting(
            req.uri().path(),
        )))))
    });

    let mut builder = http1::Builder::new();
    builder.timer(TokioTimer::new()).header_read_timeout(READ_TIMEOUT);

    let conn = builder.serve_connection(TokioIo::new(io), service);
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

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[test]
    fn test_greeting() {
        assert_eq!(greeting("/"), "hello");
        assert_eq!(greeting("/foo"), "hello foo");
        assert_eq!(greeting("/foo/bar"), "hello foo bar");
    }

    #[tokio::test]
    async fn test_echo_server() {
        let server = EchoServer::bind("127.0.0.1:0", &TlsServerSettings::default())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(server.serve(shutdown.clone()));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /metrics/cadvisor HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("hello metrics cadvisor"));

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }
}
