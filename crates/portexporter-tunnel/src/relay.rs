//! Relay side of tunnel registration
//!
//! A gateway registers by sending a WebSocket upgrade to `/connect` carrying
//! its identity header. After the 101 response the upgraded connection
//! becomes a [`TunnelSession`] registered under that identity until it ends.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{
    HeaderMap, HeaderName, HeaderValue, CONNECTION, CONTENT_TYPE, SEC_WEBSOCKET_ACCEPT,
    SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_VERSION, UPGRADE,
};
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dialer::Dialer;
use crate::registry::TunnelRegistry;
use crate::session::TunnelSession;

/// Handle a `/connect` registration request
///
/// `identify` extracts the tunnel identity from the request headers; `None`
/// refuses the registration with 401. The returned response must be sent
/// before the upgrade can complete, so the session is set up on a spawned
/// task that lives as long as the tunnel.
pub fn accept_registration<B, F>(
    mut req: Request<B>,
    identify: F,
    registry: TunnelRegistry,
    shutdown: CancellationToken,
) -> Response<Full<Bytes>>
where
    F: FnOnce(&HeaderMap) -> Option<String>,
{
    let Some(identity) = identify(req.headers()) else {
        debug!("Refusing tunnel registration without identity");
        return text_response(
            StatusCode::UNAUTHORIZED,
            "missing or invalid tunnel identity header",
        );
    };

    if req.method() != Method::GET || !is_websocket_upgrade(req.headers()) {
        debug!(identity = %identity, "Refusing tunnel registration without websocket upgrade");
        return text_response(StatusCode::BAD_REQUEST, "expected websocket upgrade");
    }

    let Some(key) = req.headers().get(SEC_WEBSOCKET_KEY) else {
        return text_response(StatusCode::BAD_REQUEST, "missing Sec-WebSocket-Key header");
    };
    let Ok(accept) = HeaderValue::from_str(&derive_accept_key(key.as_bytes())) else {
        return text_response(StatusCode::INTERNAL_SERVER_ERROR, "invalid accept key");
    };

    let on_upgrade = hyper::upgrade::on(&mut req);
    tokio::spawn(async move {
        let upgraded = match on_upgrade.await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                warn!(identity = %identity, "Tunnel upgrade failed: {}", e);
                return;
            }
        };

        let ws = WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;
        let (session, dials) = TunnelSession::spawn(ws, &shutdown);
        // Gateways never dial the relay
        drop(dials);
        let session_id = session.id().to_string();

        registry.register_or_replace(&identity, session.clone() as Arc<dyn Dialer>);
        info!(identity = %identity, session_id = %session_id, "Tunnel connected");

        session.closed().await;
        registry.unregister(&identity, &session_id);
        info!(identity = %identity, session_id = %session_id, "Tunnel disconnected");
    });

    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = response.headers_mut();
    headers.insert(CONNECTION, HeaderValue::from_static("upgrade"));
    headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(SEC_WEBSOCKET_ACCEPT, accept);
    response
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    header_has_token(headers, &CONNECTION, "upgrade")
        && header_has_token(headers, &UPGRADE, "websocket")
        && headers
            .get(SEC_WEBSOCKET_VERSION)
            .is_some_and(|v| v.as_bytes() == b"13")
}

fn header_has_token(headers: &HeaderMap, name: &HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upgrade_request(identity: Option<&str>) -> Request<()> {
        let mut builder = Request::builder()
            .method(Method::GET)
            .uri("/connect")
            .header(CONNECTION, "keep-alive, Upgrade")
            .header(UPGRADE, "websocket")
            .header(SEC_WEBSOCKET_VERSION, "13")
            .header(SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==");
        if let Some(identity) = identity {
            builder = builder.header("X-Proxy-Tunnel-ID", identity);
        }
        builder.body(()).unwrap()
    }

    fn identify(headers: &HeaderMap) -> Option<String> {
        headers
            .get("X-Proxy-Tunnel-ID")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    #[tokio::test]
    async fn test_missing_identity_is_unauthorized() {
        let response = accept_registration(
            upgrade_request(None),
            identify,
            TunnelRegistry::new(),
            CancellationToken::new(),
        );
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_plain_request_is_rejected() {
        let request = Request::builder()
            .uri("/connect")
            .header("X-Proxy-Tunnel-ID", "gw")
            .body(())
            .unwrap();

        let response =
            accept_registration(request, identify, TunnelRegistry::new(), CancellationToken::new());
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_upgrade_response_headers() {
        let response = accept_registration(
            upgrade_request(Some("gw")),
            identify,
            TunnelRegistry::new(),
            CancellationToken::new(),
        );

        assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert_eq!(
            response.headers()[SEC_WEBSOCKET_ACCEPT],
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
        assert_eq!(response.headers()[UPGRADE], "websocket");
    }

    #[test]
    fn test_header_token_matching() {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
        assert!(header_has_token(&headers, &CONNECTION, "upgrade"));
        assert!(!header_has_token(&headers, &CONNECTION, "close"));
    }
}
