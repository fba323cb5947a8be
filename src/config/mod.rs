//! Engine configuration
//!
//! Operator-tunable settings loaded from TOML, replacing scattered
//! hardcoded defaults with one validated document.
//!
//! ## Loading Order
//!
//! 1. `NORDSCOPE_CONFIG` environment variable (path to TOML file)
//! 2. `nordscope.toml` in the current working directory
//! 3. Built-in defaults
//!
//! Every section is optional; missing keys fall back to defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::live::ConnectOptions;
use crate::memory::ScanConfig;

/// Configuration loading/validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file unreadable: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Memory scanner tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScannerSettings {
    /// Read chunk size in bytes (minimum 64).
    pub chunk_bytes: usize,
    /// Float comparison tolerance.
    pub epsilon: f64,
    /// Hard candidate cap per scan.
    pub max_results: usize,
    /// Progress report interval in MiB.
    pub progress_interval_mib: u64,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            chunk_bytes: 1 << 20,
            epsilon: 0.001,
            max_results: 250_000,
            progress_interval_mib: 256,
        }
    }
}

/// Live bridge connection defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    pub process_name: String,
    /// Polling cadence in milliseconds (floor 200).
    pub poll_ms: u64,
    pub require_admin: bool,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            process_name: "NordHold.exe".to_string(),
            poll_ms: 1000,
            require_admin: true,
        }
    }
}

/// Project-relative storage locations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub data_dir: String,
    pub runtime_dir: String,
    pub worklogs_dir: String,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            runtime_dir: "runtime".to_string(),
            worklogs_dir: "worklogs".to_string(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scanner: ScannerSettings,
    pub bridge: BridgeSettings,
    pub paths: PathSettings,
}

impl EngineConfig {
    /// Load using the documented resolution order. Invalid files fall
    /// back to defaults with a warning rather than aborting the host.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("NORDSCOPE_CONFIG") {
            match Self::from_file(Path::new(&path)) {
                Ok(config) => {
                    info!(path = %path, "engine config loaded from NORDSCOPE_CONFIG");
                    return config;
                }
                Err(err) => {
                    warn!(path = %path, error = %err,
                          "NORDSCOPE_CONFIG unusable; trying defaults");
                }
            }
        }

        let local = PathBuf::from("nordscope.toml");
        if local.exists() {
            match Self::from_file(&local) {
                Ok(config) => {
                    info!("engine config loaded from ./nordscope.toml");
                    return config;
                }
                Err(err) => {
                    warn!(error = %err, "./nordscope.toml unusable; using defaults");
                }
            }
        }

        Self::default()
    }

    /// Parse and validate one TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|err| ConfigError::Io(err.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the subsystems would misbehave under.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scanner.chunk_bytes < 64 {
            return Err(ConfigError::Invalid(format!(
                "scanner.chunk_bytes must be >= 64, got {}",
                self.scanner.chunk_bytes
            )));
        }
        if self.scanner.epsilon <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "scanner.epsilon must be > 0, got {}",
                self.scanner.epsilon
            )));
        }
        if self.scanner.max_results == 0 {
            return Err(ConfigError::Invalid(
                "scanner.max_results must be > 0".to_string(),
            ));
        }
        if self.bridge.poll_ms < 200 {
            return Err(ConfigError::Invalid(format!(
                "bridge.poll_ms must be >= 200, got {}",
                self.bridge.poll_ms
            )));
        }
        if self.paths.data_dir.trim().is_empty() || self.paths.runtime_dir.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "paths.data_dir and paths.runtime_dir must be non-empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Scanner configuration seeded from these settings.
    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            epsilon: self.scanner.epsilon,
            chunk_bytes: self.scanner.chunk_bytes,
            max_results: self.scanner.max_results,
            progress_interval_bytes: self.scanner.progress_interval_mib * 1024 * 1024,
            ..ScanConfig::default()
        }
    }

    /// Bridge connect options seeded from these settings.
    pub fn connect_defaults(&self) -> ConnectOptions {
        ConnectOptions {
            process_name: self.bridge.process_name.clone(),
            poll_ms: self.bridge.poll_ms.max(200),
            require_admin: self.bridge.require_admin,
            ..ConnectOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        EngineConfig::default().validate().expect("defaults valid");
    }

    #[test]
    fn partial_toml_overrides_sections() {
        let config = EngineConfig::from_toml_str(
            r#"
            [bridge]
            process_name = "NordHold.exe"
            poll_ms = 500

            [scanner]
            chunk_bytes = 65536
            "#,
        )
        .expect("parses");
        assert_eq!(config.bridge.poll_ms, 500);
        assert_eq!(config.scanner.chunk_bytes, 65536);
        assert_eq!(config.paths.data_dir, "data");
    }

    #[test]
    fn poll_floor_is_enforced() {
        let result = EngineConfig::from_toml_str("[bridge]\npoll_ms = 50\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn tiny_chunks_are_rejected() {
        let result = EngineConfig::from_toml_str("[scanner]\nchunk_bytes = 16\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn scan_config_reflects_settings() {
        let config = EngineConfig::from_toml_str("[scanner]\nmax_results = 10\n").expect("parses");
        let scan = config.scan_config();
        assert_eq!(scan.max_results, 10);
        assert_eq!(scan.chunk_bytes, 1 << 20);
    }
}
