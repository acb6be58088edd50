use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::pool::DEFAULT_PARALLELISM;

/// 10 MiB per range request.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024 * 10;

/// Environment variable the binary reads a JSON configuration path from.
pub const CONFIG_ENV: &str = "CHUNKFETCH_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value: {0}")]
    Invalid(String),
}

/// Options for a chunked download.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DownloadConfig {
    /// Bytes per range request.
    pub chunk_size: u64,
    /// Number of ranges fetched at the same time.
    pub parallelism: usize,
    /// Minimum delay between two printed status lines.
    #[serde(with = "millis", rename = "report_interval_ms")]
    pub report_interval: Duration,
    /// Where the per-download scratch directory is created. Defaults to the
    /// destination's directory.
    pub temp_root: Option<PathBuf>,
    /// Label at the start of each status line.
    pub operation: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            parallelism: DEFAULT_PARALLELISM,
            report_interval: Duration::from_secs(1),
            temp_root: None,
            operation: "Downloading".to_string(),
        }
    }
}

impl DownloadConfig {
    /// Reads a JSON file. Missing fields take their default value.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the file named by [`CONFIG_ENV`], or the defaults when it is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_json_file(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be greater than zero".into()));
        }
        if self.parallelism == 0 {
            return Err(ConfigError::Invalid("parallelism must be greater than zero".into()));
        }
        if self.report_interval.is_zero() {
            return Err(ConfigError::Invalid("report_interval_ms must be greater than zero".into()));
        }
        Ok(())
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_transfer_settings() {
        let config = DownloadConfig::default();
        assert_eq!(config.chunk_size, 10 * 1024 * 1024);
        assert_eq!(config.parallelism, 5);
        assert_eq!(config.report_interval, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "parallelism": 8, "report_interval_ms": 250 }"#).unwrap();

        let config = DownloadConfig::from_json_file(&path).unwrap();

        assert_eq!(config.parallelism, 8);
        assert_eq!(config.report_interval, Duration::from_millis(250));
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.operation, "Downloading");
    }

    #[test]
    fn rejects_zero_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "chunk_size": 0 }"#).unwrap();
        assert!(matches!(DownloadConfig::from_json_file(&path), Err(ConfigError::Invalid(_))));

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(DownloadConfig::from_json_file(&path), Err(ConfigError::Parse(_))));
    }
}
