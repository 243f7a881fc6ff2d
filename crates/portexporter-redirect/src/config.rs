//! Redirector configuration file

use portexporter_config::{load_yaml, ConfigError, TlsClientSettings};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "redirect.yaml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectConfig {
    #[serde(default)]
    pub redirect: Vec<RedirectEntry>,
}

/// One backend reachable as `/{scheme}/{host}/...` on the redirector
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectEntry {
    /// `scheme://host[:port]`, also the routing key
    pub address: String,

    /// Bearer token sent upstream; its presence switches the upstream to https
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_file: Option<PathBuf>,

    #[serde(flatten)]
    pub tls: TlsClientSettings,
}

impl RedirectConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = load_yaml(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Every address must be a bare `scheme://authority` and appear once
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for entry in &self.redirect {
            entry.validate()?;
            if !seen.insert(entry.address.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "cannot register multiple redirects for address {}",
                    entry.address
                )));
            }
        }
        Ok(())
    }
}

impl RedirectEntry {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| {
            ConfigError::Invalid(format!(
                "redirect address {} {}",
                self.address, reason
            ))
        };

        let uri: hyper::Uri = self
            .address
            .parse()
            .map_err(|_| invalid("is not a valid URL"))?;
        if uri.scheme().is_none() || uri.authority().is_none() {
            return Err(invalid("must have the form scheme://host"));
        }
        if !matches!(uri.scheme_str(), Some("http") | Some("https")) {
            return Err(invalid("must use the http or https scheme"));
        }
        if uri.path() != "/" || self.address.ends_with('/') || uri.query().is_some() {
            return Err(invalid("must not carry a path or query"));
        }
        Ok(())
    }

    /// Files whose changes rebuild this entry's handler
    pub fn watched_files(&self) -> impl Iterator<Item = &Path> {
        self.token_file
            .as_deref()
            .into_iter()
            .chain(self.tls.watched_files())
    }
}

impl fmt::Display for RedirectEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token_file = self
            .token_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        write!(
            f,
            "[address={},http=[tokenFile={}],tls={}]",
            self.address, token_file, self.tls
        )
    }
}
