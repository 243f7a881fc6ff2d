//! portexporter - reach services on private networks through outbound tunnels
//!
//! One binary, four roles: the central relay, the gateway that dials out to
//! it, a redirector that fronts registered backends, and a demo backend.

mod echo;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use portexporter_config::TlsServerSettings;
use portexporter_gateway::{host_ip, Gateway, GatewayConfig};
use portexporter_proxy::ProxyServer;
use portexporter_redirect::{RedirectConfig, RedirectServer, DEFAULT_CONFIG_FILE};
use portexporter_tunnel::TunnelRegistry;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::echo::EchoServer;

#[derive(Parser, Debug)]
#[command(name = "portexporter")]
#[command(about = "Expose addresses on private networks through outbound tunnels")]
#[command(version = env!("PORTEXPORTER_VERSION"))]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true, env = "PORTEXPORTER_DEBUG")]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Accept gateway tunnels and proxy incoming requests to the matching gateway
    #[command(long_about = r#"
Accept tunnel registrations from gateways on /connect and proxy incoming
HTTP requests to the gateway whose id matches the request's target host.

EXAMPLES:
  # Plain HTTP relay
  portexporter proxy --listen :10123

  # TLS relay that also requires gateway client certificates
  portexporter proxy --listen :10123 \
    --cert-file tls.crt --key-file tls.key --cacert-file ca.crt
    "#)]
    Proxy {
        /// Address to listen on for tunnels and proxied requests
        #[arg(long, env = "PORTEXPORTER_LISTEN", default_value = ":10123")]
        listen: String,

        /// TLS certificate served to clients
        #[arg(long)]
        cert_file: Option<PathBuf>,

        /// TLS private key matching --cert-file
        #[arg(long)]
        key_file: Option<PathBuf>,

        /// CA used to verify client certificates
        #[arg(long)]
        cacert_file: Option<PathBuf>,
    },

    /// Connect to a proxy and expose local addresses through it
    #[command(long_about = r#"
Open an outbound tunnel to the proxy and serve its dial requests for the
exposed addresses. Reconnects with backoff if the tunnel drops.

EXAMPLES:
  portexporter gateway \
    --proxy-url wss://proxy.example.com:10123/connect \
    --expose 127.0.0.1:10250 --expose 127.0.0.1:9100

ENVIRONMENT VARIABLES:
  PORTEXPORTER_PROXY_URL  Proxy /connect URL
  PORTEXPORTER_EXPOSE     Comma separated addresses to expose
  PORTEXPORTER_ID         Gateway id (defaults to this host's IP)

With no exposed addresses every TCP address reachable from this host is
open to the proxy, unless --deny-when-empty is set.
    "#)]
    Gateway {
        /// Proxy URL to connect to (e.g. wss://proxy:10123/connect)
        #[arg(long, env = "PORTEXPORTER_PROXY_URL")]
        proxy_url: String,

        /// host:port the proxy may reach through this gateway (repeatable)
        #[arg(long, env = "PORTEXPORTER_EXPOSE", value_delimiter = ',')]
        expose: Vec<String>,

        /// Id to register under, defaults to this host's outbound IP
        #[arg(long, env = "PORTEXPORTER_ID")]
        id: Option<String>,

        /// Gateway config file; flags extend or override it
        #[arg(long)]
        config: Option<PathBuf>,

        /// CA used to verify the proxy's certificate
        #[arg(long)]
        cacert_file: Option<PathBuf>,

        /// Skip verifying the proxy's certificate (insecure)
        #[arg(long)]
        insecure_skip_verify: bool,

        /// Refuse every dial when no addresses are exposed
        #[arg(long)]
        deny_when_empty: bool,
    },

    /// Reverse proxy /{scheme}/{host}/{path} to configured backends
    Redirector {
        /// Address to listen on
        #[arg(long, default_value = ":8081")]
        listen: String,

        /// Redirect configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },

    /// Demo backend answering "hello" plus the request path
    Test {
        /// Address to listen on
        #[arg(long, default_value = ":8081")]
        listen: String,

        #[arg(long)]
        cert_file: Option<PathBuf>,

        #[arg(long)]
        key_file: Option<PathBuf>,

        #[arg(long)]
        cacert_file: Option<PathBuf>,
    },
}

fn setup_logging(debug: bool) {
    let log_level = if debug { "debug" } else { "info" };

    // RUST_LOG wins when set
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

/// Cancelled on Ctrl+C or SIGTERM
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal");
        cancel.cancel();
    });
    token
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn tls_server_settings(
    cert_file: Option<PathBuf>,
    key_file: Option<PathBuf>,
    ca_cert_file: Option<PathBuf>,
) -> TlsServerSettings {
    TlsServerSettings {
        cert_file,
        key_file,
        ca_cert_file,
    }
}

async fn run(command: Commands, shutdown: CancellationToken) -> Result<()> {
    match command {
        Commands::Proxy {
            listen,
            cert_file,
            key_file,
            cacert_file,
        } => {
            let tls = tls_server_settings(cert_file, key_file, cacert_file);
            info!("Starting proxy with TLS settings {}", tls);

            let server = ProxyServer::bind(&listen, &tls, TunnelRegistry::new())
                .await
                .context("Failed to start proxy")?;
            server.serve(shutdown).await?;
        }

        Commands::Gateway {
            proxy_url,
            expose,
            id,
            config,
            cacert_file,
            insecure_skip_verify,
            deny_when_empty,
        } => {
            let mut gateway_config = match &config {
                Some(path) => GatewayConfig::load(path).with_context(|| {
                    format!("Failed to load gateway config {}", path.display())
                })?,
                None => GatewayConfig::default(),
            };
            gateway_config.expose.extend(expose);
            if cacert_file.is_some() {
                gateway_config.tls.ca_cert_file = cacert_file;
            }
            gateway_config.tls.insecure_skip_verify |= insecure_skip_verify;
            gateway_config.deny_when_empty |= deny_when_empty;

            let id = match id {
                Some(id) => id,
                None => host_ip()
                    .await
                    .context("Failed to determine gateway id, pass --id explicitly")?
                    .to_string(),
            };

            let gateway = Gateway::new(proxy_url, id, &gateway_config)
                .context("Invalid gateway configuration")?;
            gateway.run(shutdown).await?;
        }

        Commands::Redirector { listen, config } => {
            let redirect_config = RedirectConfig::load(&config).with_context(|| {
                format!("Failed to load redirect config {}", config.display())
            })?;

            let server = RedirectServer::bind(&listen, redirect_config)
                .await
                .context("Failed to start redirector")?;
            server.serve(shutdown).await?;
        }

        Commands::Test {
            listen,
            cert_file,
            key_file,
            cacert_file,
        } => {
            let tls = tls_server_settings(cert_file, key_file, cacert_file);
            let server = EchoServer::bind(&listen, &tls).await?;
            server.serve(shutdown).await?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    setup_logging(cli.debug);

    let shutdown = shutdown_token();
    if let Err(e) = run(cli.command, shutdown).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_gateway_flags() {
        let cli = Cli::try_parse_from([
            "portexporter",
            "gateway",
            "--proxy-url",
            "ws://relay:10123/connect",
            "--expose",
            "127.0.0.1:10250,127.0.0.1:9100",
            "--expose",
            "10.0.0.1:22",
            "--debug",
        ])
        .unwrap();

        assert!(cli.debug);
        match cli.command {
            Commands::Gateway {
                proxy_url,
                expose,
                id,
                deny_when_empty,
                ..
            } => {
                assert_eq!(proxy_url, "ws://relay:10123/connect");
                assert_eq!(expose, vec!["127.0.0.1:10250", "127.0.0.1:9100", "10.0.0.1:22"]);
                assert_eq!(id, None);
                assert!(!deny_when_empty);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["portexporter", "redirector"]).unwrap();
        match cli.command {
            Commands::Redirector { listen, config } => {
                assert_eq!(listen, ":8081");
                assert_eq!(config, PathBuf::from("redirect.yaml"));
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = Cli::try_parse_from(["portexporter", "proxy"]).unwrap();
        assert!(matches!(cli.command, Commands::Proxy { listen, .. } if listen == ":10123"));
    }
}
