//! Redirector in front of real plain and TLS backends

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use portexporter_config::{TlsClientSettings, TlsServerSettings};
use portexporter_redirect::{RedirectConfig, RedirectEntry, RedirectServer};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

/// Replies `hello` plus the path, and echoes selected request headers back
async fn backend_service(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let mut response = Response::new(Full::new(Bytes::from(format!(
        "hello{}",
        req.uri().path().replace('/', " ")
    ))));
    for name in ["authorization", "x-forwarded-for", "host", "user-agent"] {
        if let Some(value) = req.headers().get(name) {
            response
                .headers_mut()
                .insert(format!("x-seen-{}", name).parse::<hyper::header::HeaderName>().unwrap(), value.clone());
        }
    }
    Ok(response)
}

async fn start_backend(acceptor: Option<TlsAcceptor>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let builder = http1::Builder::new();
                match acceptor {
                    Some(acceptor) => {
                        if let Ok(tls) = acceptor.accept(stream).await {
                            let _ = builder
                                .serve_connection(TokioIo::new(tls), service_fn(backend_service))
                                .await;
                        }
                    }
                    None => {
                        let _ = builder
                            .serve_connection(TokioIo::new(stream), service_fn(backend_service))
                            .await;
                    }
                }
            });
        }
    });

    addr
}

async fn start_redirector(config: RedirectConfig) -> (SocketAddr, CancellationToken) {
    let server = RedirectServer::bind("127.0.0.1:0", config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    tokio::spawn(server.serve(shutdown.clone()));
    (addr, shutdown)
}

async fn get(redirector: SocketAddr, path: &str, extra_headers: &str) -> String {
    let mut stream = TcpStream::connect(redirector).await.unwrap();
    stream
        .write_all(
            format!(
                "GET {} HTTP/1.1\r\nHost: redirector\r\n{}Connection: close\r\n\r\n",
                path, extra_headers
            )
            .as_bytes(),
        )
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn test_plain_backend() {
    let backend = start_backend(None).await;
    let (redirector, shutdown) = start_redirector(RedirectConfig {
        redirect: vec![RedirectEntry {
            address: format!("http://{}", backend),
            ..Default::default()
        }],
    })
    .await;

    let response = get(
        redirector,
        &format!("/http/{}/foo/bar?verbose=1", backend),
        "Authorization: Basic Zm9vOmJhcg==\r\n",
    )
    .await;
    let lower = response.to_ascii_lowercase();

    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.ends_with("hello foo bar"), "{response}");
    assert!(lower.contains(&format!("x-seen-host: {}\r\n", backend)));
    assert!(lower.contains("x-seen-x-forwarded-for: 127.0.0.1\r\n"));
    assert!(lower.contains("x-seen-user-agent: \r\n"));
    // Without a token file the client's own credentials pass through
    assert!(lower.contains("x-seen-authorization: basic zm9vomjhcg==\r\n"));

    shutdown.cancel();
}

#[tokio::test]
async fn test_token_backend_over_tls_with_reload() {
    let dir = tempfile::tempdir().unwrap();
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert_file = dir.path().join("tls.crt");
    let key_file = dir.path().join("tls.key");
    let token_file = dir.path().join("token");
    std::fs::write(&cert_file, certified.cert.pem()).unwrap();
    std::fs::write(&key_file, certified.key_pair.serialize_pem()).unwrap();
    std::fs::write(&token_file, "first-token\n").unwrap();

    let server_config = TlsServerSettings {
        cert_file: Some(cert_file.clone()),
        key_file: Some(key_file),
        ca_cert_file: None,
    }
    .server_config()
    .unwrap()
    .unwrap();
    let backend = start_backend(Some(TlsAcceptor::from(server_config))).await;
    let authority = format!("localhost:{}", backend.port());

    // Registered under http:// but the token file forces https upstream
    let (redirector, shutdown) = start_redirector(RedirectConfig {
        redirect: vec![RedirectEntry {
            address: format!("http://{}", authority),
            token_file: Some(token_file.clone()),
            tls: TlsClientSettings {
                insecure_skip_verify: false,
                ca_cert_file: Some(cert_file),
            },
        }],
    })
    .await;

    let path = format!("/http/{}/metrics", authority);
    let response = get(redirector, &path, "").await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.ends_with("hello metrics"), "{response}");
    assert!(response
        .to_ascii_lowercase()
        .contains("x-seen-authorization: bearer first-token\r\n"));

    std::fs::write(&token_file, "second-token").unwrap();
    for _ in 0..250 {
        let response = get(redirector, &path, "").await;
        if response
            .to_ascii_lowercase()
            .contains("x-seen-authorization: bearer second-token\r\n")
        {
            shutdown.cancel();
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("token change was never picked up");
}

#[tokio::test]
async fn test_unregistered_scheme_is_rejected() {
    let (redirector, shutdown) = start_redirector(RedirectConfig {
        redirect: vec![RedirectEntry {
            address: "https://svcA".to_string(),
            token_file: Some(PathBuf::from("/nonexistent/token")),
            ..Default::default()
        }],
    })
    .await;

    let response = get(redirector, "/http/svcA/metrics", "").await;
    assert!(response.starts_with("HTTP/1.1 400"), "{response}");
    assert!(response.ends_with("redirect address http://svcA has not been registered\n"));

    shutdown.cancel();
}
