//! TLS settings for listeners and outbound clients
//!
//! Both settings types deserialize from the camelCase YAML keys used by the
//! configuration files (`certFile`, `keyFile`, `caCertFile`,
//! `insecureSkipVerify`).

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("Unable to open {kind} file {path}: {source}")]
    Open {
        kind: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Unable to parse {kind} file {path}: {reason}")]
    Parse {
        kind: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("Failed to use cacert file {0} as ca certificate")]
    InvalidCaCert(PathBuf),

    #[error("Invalid TLS configuration: {0}")]
    Config(String),
}

/// Listener TLS settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsServerSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,
    /// When set, clients must present a certificate signed by this CA
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert_file: Option<PathBuf>,
}

impl TlsServerSettings {
    /// TLS is enabled only when both a certificate and a key are supplied
    pub fn enabled(&self) -> bool {
        self.cert_file.is_some() && self.key_file.is_some()
    }

    /// Build a rustls server config, or `None` when TLS is not enabled.
    ///
    /// ALPN is left empty so clients never negotiate HTTP/2; connection
    /// upgrades for CONNECT rely on HTTP/1.1 semantics.
    pub fn server_config(&self) -> Result<Option<Arc<ServerConfig>>, TlsError> {
        let (Some(cert_file), Some(key_file)) = (&self.cert_file, &self.key_file) else {
            return Ok(None);
        };

        ensure_crypto_provider();

        let certs = load_certs(cert_file, "cert")?;
        let key = load_private_key(key_file)?;

        let builder = ServerConfig::builder();
        let builder = match &self.ca_cert_file {
            Some(ca_file) => {
                let roots = load_root_store(ca_file)?;
                let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                    .build()
                    .map_err(|e| TlsError::Config(format!("client verifier: {}", e)))?;
                builder.with_client_cert_verifier(verifier)
            }
            None => builder.with_no_client_auth(),
        };

        let mut config = builder.with_single_cert(certs, key).map_err(|e| {
            TlsError::Config(format!(
                "unable to load X.509 certificate from cert file {} and key file {}: {}",
                cert_file.display(),
                key_file.display(),
                e
            ))
        })?;
        config.alpn_protocols.clear();

        Ok(Some(Arc::new(config)))
    }
}

impl std::fmt::Display for TlsServerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[certFile={},keyFile={}]",
            display_path(&self.cert_file),
            display_path(&self.key_file)
        )
    }
}

/// Outbound client TLS settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsClientSettings {
    #[serde(default)]
    pub insecure_skip_verify: bool,
    /// Replaces the bundled web PKI roots when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert_file: Option<PathBuf>,
}

impl TlsClientSettings {
    pub fn client_config(&self) -> Result<Arc<ClientConfig>, TlsError> {
        ensure_crypto_provider();

        let config = if self.insecure_skip_verify {
            tracing::warn!("TLS certificate verification disabled");
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(SkipVerification))
                .with_no_client_auth()
        } else {
            let roots = match &self.ca_cert_file {
                Some(ca_file) => load_root_store(ca_file)?,
                None => {
                    let mut roots = RootCertStore::empty();
                    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                    roots
                }
            };
            ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        };

        Ok(Arc::new(config))
    }

    /// Files whose contents feed into [`Self::client_config`]
    pub fn watched_files(&self) -> impl Iterator<Item = &Path> {
        self.ca_cert_file.as_deref().into_iter()
    }
}

impl std::fmt::Display for TlsClientSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[insecureSkipVerify={},caCertFile={}]",
            self.insecure_skip_verify,
            display_path(&self.ca_cert_file)
        )
    }
}

fn display_path(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_default()
}

// Initialize rustls crypto provider
static CRYPTO_PROVIDER_INIT: std::sync::Once = std::sync::Once::new();

/// Install the ring crypto provider as the process default, once
pub fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            tracing::debug!("Rustls crypto provider already installed");
        }
    });
}

fn load_certs(path: &Path, kind: &'static str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|source| TlsError::Open {
        kind,
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Parse {
            kind,
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|source| TlsError::Open {
        kind: "key",
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TlsError::Parse {
            kind: "key",
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
        .ok_or_else(|| TlsError::Parse {
            kind: "key",
            path: path.to_path_buf(),
            reason: "no private key found".to_string(),
        })
}

fn load_root_store(path: &Path) -> Result<RootCertStore, TlsError> {
    let certs = load_certs(path, "cacert")?;
    if certs.is_empty() {
        return Err(TlsError::InvalidCaCert(path.to_path_buf()));
    }

    let mut roots = RootCertStore::empty();
    let (added, _ignored) = roots.add_parsable_certificates(certs);
    if added == 0 {
        return Err(TlsError::InvalidCaCert(path.to_path_buf()));
    }

    Ok(roots)
}

// Certificate verifier that skips verification (INSECURE)
#[derive(Debug)]
struct SkipVerification;

impl rustls::client::danger::ServerCertVerifier for SkipVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
