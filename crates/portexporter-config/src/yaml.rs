//! YAML configuration loading

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Read and deserialize a YAML document
pub fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Deserialize)]
    struct Sample {
        name: String,
        #[serde(default)]
        ports: Vec<u16>,
    }

    #[test]
    fn test_load_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name: relay\nports: [80, 443]").unwrap();

        let sample: Sample = load_yaml(file.path()).unwrap();
        assert_eq!(sample.name, "relay");
        assert_eq!(sample.ports, vec![80, 443]);
    }

    #[test]
    fn test_load_yaml_missing_file() {
        let result: Result<Sample, _> = load_yaml(Path::new("/nonexistent/portexporter.yaml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_load_yaml_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ports: not-a-list").unwrap();

        let result: Result<Sample, _> = load_yaml(file.path());
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }
}
