//! `/{scheme}/{host}/{path}` routing onto registered redirects

use axum::body::Body;
use axum::extract::{ConnectInfo, Path, Request, State};
use axum::http::header::USER_AGENT;
use axum::http::{HeaderValue, StatusCode, Uri};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use serde::Deserialize;
use std::net::SocketAddr;
use tracing::debug;

use crate::handler::text_response;
use crate::table::RedirectTable;

#[derive(Debug, Deserialize)]
struct RoutePath {
    scheme: String,
    host: String,
    #[serde(default)]
    path: String,
}

impl RoutePath {
    fn address(&self) -> String {
        format!("{}://{}", self.scheme, self.host)
    }

    fn url(&self, query: Option<&str>) -> String {
        let mut url = format!("{}/{}", self.address(), self.path);
        if let Some(query) = query {
            url.push('?');
            url.push_str(query);
        }
        url
    }
}

pub fn router(table: RedirectTable) -> Router {
    Router::new()
        .route("/{scheme}/{host}", any(redirect))
        .route("/{scheme}/{host}/", any(redirect))
        .route("/{scheme}/{host}/{*path}", any(redirect))
        .with_state(table)
}

async fn redirect(
    State(table): State<RedirectTable>,
    Path(route): Path<RoutePath>,
    mut req: Request,
) -> Response<Body> {
    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    debug!(
        "Received request from host [{}] to url [{}]",
        remote.map(|ip| ip.to_string()).unwrap_or_default(),
        req.uri()
    );

    let address = route.address();
    let url = route.url(req.uri().query());
    let target: Uri = match url.parse() {
        Ok(target) => target,
        Err(_) => {
            return text_response(
                StatusCode::BAD_REQUEST,
                &format!("could not parse URL from {}", url),
            )
        }
    };

    // Absent stays absent upstream instead of picking up a client default
    if !req.headers().contains_key(USER_AGENT) {
        req.headers_mut()
            .insert(USER_AGENT, HeaderValue::from_static(""));
    }

    let Some(handler) = table.get(&address) else {
        return text_response(
            StatusCode::BAD_REQUEST,
            &format!("redirect address {} has not been registered", address),
        );
    };

    handler.serve(req, &target, remote).await
}
