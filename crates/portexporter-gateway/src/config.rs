//! Gateway configuration file
//!
//! ```yaml
//! expose:
//!   - 127.0.0.1:9000
//!   - 10.0.0.12:443
//! denyWhenEmpty: false
//! insecureSkipVerify: false
//! caCertFile: /etc/portexporter/ca.pem
//! ```

use portexporter_config::{load_yaml, ConfigError, TlsClientSettings};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::exposure::{EmptyExposure, ExposurePolicy};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(flatten)]
    pub tls: TlsClientSettings,

    /// `host:port` addresses the relay may dial; empty exposes everything
    /// unless `deny_when_empty` is set
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expose: Vec<String>,

    #[serde(default)]
    pub deny_when_empty: bool,
}

impl GatewayConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = load_yaml(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every exposed address has the `host:port` shape
    pub fn validate(&self) -> Result<(), ConfigError> {
        for address in &self.expose {
            validate_address(address)?;
        }
        Ok(())
    }

    pub fn policy(&self) -> ExposurePolicy {
        let empty = if self.deny_when_empty {
            EmptyExposure::DenyAll
        } else {
            EmptyExposure::AllowAll
        };
        ExposurePolicy::new(self.expose.iter().cloned(), empty)
    }
}

fn validate_address(address: &str) -> Result<(), ConfigError> {
    let (host, port) = address.rsplit_once(':').ok_or_else(|| {
        ConfigError::Invalid(format!(
            "Invalid expose address '{}': expected host:port",
            address
        ))
    })?;

    if host.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "Invalid expose address '{}': empty host",
            address
        )));
    }

    port.parse::<u16>().map_err(|e| {
        ConfigError::Invalid(format!(
            "Invalid expose address '{}': bad port '{}': {}",
            address, port, e
        ))
    })?;

    Ok(())
}
