use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::client::conn::http1;
use hyper::header::{HeaderValue, CONTENT_TYPE, HOST, USER_AGENT};
use hyper::{Method, Request, Response, StatusCode, Uri, Version};
use hyper_util::rt::TokioIo;
use portexporter_proto::{CONNECT_PATH, NETWORK_TCP};
use portexporter_tunnel::{relay, Dialer, TunnelRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::ClientConfig;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::DispatchError;
use crate::hijack::Hijack;
use crate::identity::identify;
use crate::pipe::pipe;

pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Where a proxied request goes
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    /// Tunnel identity: hostname without port or IPv6 brackets
    key: String,
    /// `host:port` dialed through the tunnel
    address: String,
    /// Authority as the client wrote it, sent as `Host` upstream
    authority: String,
}

impl Target {
    /// `None` for origin-form requests, which carry no target host
    fn from_uri(uri: &Uri, method: &Method) -> Option<Self> {
        let authority = uri.authority()?;
        let host = authority.host();
        if host.is_empty() {
            return None;
        }

        let port = authority.port_u16().unwrap_or_else(|| {
            if method == Method::CONNECT || uri.scheme_str() == Some("https") {
                443
            } else {
                80
            }
        });

        let key = host.trim_start_matches('[').trim_end_matches(']');
        Some(Self {
            key: key.to_string(),
            address: format!("{}:{}", host, port),
            authority: authority.as_str().to_string(),
        })
    }
}

/// Routes each inbound request to registration, a tunnel, or an error
#[derive(Clone)]
pub struct Dispatcher {
    registry: TunnelRegistry,
    upstream_tls: TlsConnector,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// CONNECT pipes and tunnel sessions end when `shutdown` is cancelled.
    ///
    /// `upstream_tls` verifies targets of forwarded `https://` requests.
    pub fn new(
        registry: TunnelRegistry,
        upstream_tls: Arc<ClientConfig>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            upstream_tls: TlsConnector::from(upstream_tls),
            shutdown,
        }
    }

    pub fn registry(&self) -> &TunnelRegistry {
        &self.registry
    }

    pub async fn dispatch<B>(&self, mut req: Request<B>, remote: SocketAddr) -> Response<ProxyBody>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<BoxError>,
    {
        debug!(
            "Received request from host [{}] to url [{}] for method {}",
            remote,
            req.uri(),
            req.method()
        );

        let Some(target) = Target::from_uri(req.uri(), req.method()) else {
            if req.uri().path() == CONNECT_PATH {
                return relay::accept_registration(
                    req,
                    identify,
                    self.registry.clone(),
                    self.shutdown.clone(),
                )
                .map(|body| body.map_err(|never| match never {}).boxed());
            }
            return text_response(StatusCode::NOT_FOUND, "proxy only supports '/connect'");
        };

        // Absent stays absent downstream instead of picking up a client default
        if !req.headers().contains_key(USER_AGENT) {
            req.headers_mut()
                .insert(USER_AGENT, HeaderValue::from_static(""));
        }

        let result = if req.method() == Method::CONNECT {
            self.connect(req, target).await
        } else {
            self.forward(req, target).await
        };

        result.unwrap_or_else(|e| {
            debug!(remote = %remote, "Request failed: {}", e);
            text_response(e.status(), &e.to_string())
        })
    }

    fn dialer_for(&self, target: &Target) -> Result<Arc<dyn Dialer>, DispatchError> {
        self.registry
            .get(&target.key)
            .ok_or_else(|| DispatchError::NoTunnel(target.key.clone()))
    }

    async fn connect<B>(
        &self,
        mut req: Request<B>,
        target: Target,
    ) -> Result<Response<ProxyBody>, DispatchError> {
        let dialer = self.dialer_for(&target)?;
        let hijack = Hijack::take(&mut req).ok_or(DispatchError::HijackUnsupported)?;
        let tunnel = dialer.dial(NETWORK_TCP, &target.address).await?;

        let cancel = self.shutdown.child_token();
        tokio::spawn(async move {
            match hijack.into_stream().await {
                Ok(client) => {
                    pipe(client, tunnel, cancel).await;
                }
                Err(e) => warn!(target = %target.address, "cannot hijack connection: {}", e),
            }
        });

        Ok(Response::new(empty()))
    }

    async fn forward<B>(
        &self,
        req: Request<B>,
        target: Target,
    ) -> Result<Response<ProxyBody>, DispatchError>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<BoxError>,
    {
        let dialer = self.dialer_for(&target)?;
        let secure = req.uri().scheme_str() == Some("https");
        let req = into_origin_form(req, &target)?;
        let stream = dialer.dial(NETWORK_TCP, &target.address).await?;

        if !secure {
            return send_upstream(req, stream).await;
        }

        let server_name = ServerName::try_from(target.key.clone())
            .map_err(|e| DispatchError::InvalidTarget(format!("{}: {}", target.key, e)))?;
        let stream = self
            .upstream_tls
            .connect(server_name, stream)
            .await
            .map_err(|source| DispatchError::UpstreamTls {
                address: target.address.clone(),
                source,
            })?;
        send_upstream(req, stream).await
    }
}

/// Send one request over a fresh HTTP/1.1 connection on `io`
async fn send_upstream<S, B>(req: Request<B>, io: S) -> Result<Response<ProxyBody>, DispatchError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    let (mut sender, conn) = http1::handshake(TokioIo::new(io)).await?;
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("Upstream connection closed: {}", e);
        }
    });

    let response = sender.send_request(req).await?;
    Ok(response.map(|body| body.boxed()))
}

/// Rewrite a proxy-form request for the origin server
fn into_origin_form<B>(req: Request<B>, target: &Target) -> Result<Request<B>, DispatchError> {
    let (mut parts, body) = req.into_parts();

    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let uri: Uri = path
        .parse()
        .map_err(|e| DispatchError::InvalidTarget(format!("{}: {}", path, e)))?;

    let host = HeaderValue::from_str(&target.authority)
        .map_err(|e| DispatchError::InvalidTarget(format!("{}: {}", target.authority, e)))?;

    parts.uri = uri;
    parts.version = Version::HTTP_11;
    parts.headers.insert(HOST, host);

    Ok(Request::from_parts(parts, body))
}

fn empty() -> ProxyBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

/// Plain-text error response, newline terminated
pub(crate) fn text_response(status: StatusCode, message: &str) -> Response<ProxyBody> {
    let body = Full::new(Bytes::from(format!("{}\n", message)))
        .map_err(|never| match never {})
        .boxed();

    let mut response = Response::new(body);
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response.headers_mut().insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    response
}
