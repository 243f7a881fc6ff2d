//! Reverse proxy for one redirect entry

use axum::body::Body;
use hyper::header::{
    HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONNECTION, CONTENT_TYPE, HOST,
};
use hyper::http::uri::Scheme;
use hyper::{Request, Response, StatusCode, Uri, Version};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use portexporter_config::ConfigError;
use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RedirectEntry;
use crate::error::RedirectError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const TCP_KEEPALIVE: Duration = Duration::from_secs(30);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const POOL_MAX_IDLE: usize = 100;

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Immutable reverse proxy built from a [`RedirectEntry`]
///
/// File changes never mutate a handler; a new one is built and swapped in.
pub struct RedirectHandler {
    address: String,
    scheme: Scheme,
    bearer: Option<HeaderValue>,
    client: Client<HttpsConnector<HttpConnector>, Body>,
}

impl fmt::Debug for RedirectHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedirectHandler")
            .field("address", &self.address)
            .field("scheme", &self.scheme)
            .field("bearer", &self.bearer.is_some())
            .finish()
    }
}

impl RedirectHandler {
    /// Read the token and TLS material and build the outbound client
    pub fn build(entry: &RedirectEntry) -> Result<Self, RedirectError> {
        let (scheme, bearer) = match &entry.token_file {
            None => (Scheme::HTTP, None),
            Some(path) => (Scheme::HTTPS, read_bearer(path)?),
        };

        let tls = (*entry.tls.client_config()?).clone();

        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(CONNECT_TIMEOUT));
        http.set_keepalive(Some(TCP_KEEPALIVE));

        let connector = HttpsConnectorBuilder::new()
            .with_tls_config(tls)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http);

        let client = Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(POOL_MAX_IDLE)
            .build(connector);

        Ok(Self {
            address: entry.address.clone(),
            scheme,
            bearer,
            client,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    #[cfg(test)]
    pub(crate) fn bearer(&self) -> Option<&HeaderValue> {
        self.bearer.as_ref()
    }

    /// Proxy `req` to `target`, answering 502 when the upstream fails
    pub async fn serve(&self, req: Request<Body>, target: &Uri, remote: Option<IpAddr>) -> Response<Body> {
        let req = match self.prepare(req, target, remote) {
            Ok(req) => req,
            Err(e) => return text_response(StatusCode::BAD_GATEWAY, &e.to_string()),
        };

        debug!(address = %self.address, uri = %req.uri(), "Redirecting request");

        match self.client.request(req).await {
            Ok(response) => {
                let (mut parts, body) = response.into_parts();
                strip_hop_by_hop(&mut parts.headers);
                Response::from_parts(parts, Body::new(body))
            }
            Err(e) => {
                let reason = error_chain(&e);
                warn!(address = %self.address, "Upstream request failed: {}", reason);
                text_response(StatusCode::BAD_GATEWAY, &reason)
            }
        }
    }

    /// Rewrite an inbound request for the upstream
    fn prepare(
        &self,
        req: Request<Body>,
        target: &Uri,
        remote: Option<IpAddr>,
    ) -> Result<Request<Body>, hyper::http::Error> {
        let (mut parts, body) = req.into_parts();

        let mut uri = Uri::builder().scheme(self.scheme.clone());
        if let Some(authority) = target.authority() {
            parts
                .headers
                .insert(HOST, HeaderValue::from_str(authority.as_str())?);
            uri = uri.authority(authority.clone());
        }
        let path = target.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        parts.uri = uri.path_and_query(path).build()?;
        parts.version = Version::HTTP_11;

        strip_hop_by_hop(&mut parts.headers);

        if let Some(bearer) = &self.bearer {
            parts.headers.insert(AUTHORIZATION, bearer.clone());
        }

        if let Some(ip) = remote {
            let forwarded = match parts
                .headers
                .get(X_FORWARDED_FOR)
                .and_then(|v| v.to_str().ok())
            {
                Some(prior) => format!("{}, {}", prior, ip),
                None => ip.to_string(),
            };
            parts
                .headers
                .insert(X_FORWARDED_FOR, HeaderValue::from_str(&forwarded)?);
        }

        Ok(Request::from_parts(parts, body))
    }
}

/// `Bearer <token>`, or `None` when the file is unreadable or empty
fn read_bearer(path: &Path) -> Result<Option<HeaderValue>, RedirectError> {
    let token = match std::fs::read_to_string(path) {
        Ok(token) => token,
        Err(e) => {
            warn!("could not read token from path {}: {}", path.display(), e);
            return Ok(None);
        }
    };

    let token = token.trim();
    if token.is_empty() {
        warn!("no token found at path {}", path.display());
        return Ok(None);
    }

    let mut value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
        ConfigError::Invalid(format!(
            "token in {} is not a valid header value",
            path.display()
        ))
    })?;
    value.set_sensitive(true);
    Ok(Some(value))
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Plain-text error response, newline terminated
pub(crate) fn text_response(status: StatusCode, message: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(format!("{}\n", message)));
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
