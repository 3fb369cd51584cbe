//! Unified configuration for Tailor.
//!
//! Reads `tailor.toml` from the working directory, with sensible defaults
//! and environment overrides layered on top (file → environment → CLI).
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! port = 3141
//! db_path = ".tailor/tailor.db"
//!
//! [pipeline]
//! readiness_threshold = 0.6
//! suggestion_cap = 5
//! review_strategy = "sequential"
//!
//! [enrichment]
//! endpoint = "http://localhost:9090/rerank"
//! timeout_secs = 5
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::controller::PipelineSettings;
use crate::review::ReviewStrategy;
use crate::suggest::EnrichmentConfig;

/// Server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_port() -> u16 {
    3141
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".tailor/tailor.db")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            db_path: default_db_path(),
        }
    }
}

/// Pipeline tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Research readiness required before drafting (0.0–1.0).
    #[serde(default = "default_readiness_threshold")]
    pub readiness_threshold: f64,
    /// Maximum suggestions per section review gate.
    #[serde(default = "default_suggestion_cap")]
    pub suggestion_cap: usize,
    /// Review strategy: "sequential" or "bundled".
    #[serde(default)]
    pub review_strategy: ReviewStrategyConfig,
}

fn default_readiness_threshold() -> f64 {
    0.6
}

fn default_suggestion_cap() -> usize {
    5
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            readiness_threshold: default_readiness_threshold(),
            suggestion_cap: default_suggestion_cap(),
            review_strategy: ReviewStrategyConfig::default(),
        }
    }
}

/// Serde shim so the strategy reads as a plain string in TOML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStrategyConfig {
    #[default]
    Sequential,
    Bundled,
}

impl From<ReviewStrategyConfig> for ReviewStrategy {
    fn from(value: ReviewStrategyConfig) -> Self {
        match value {
            ReviewStrategyConfig::Sequential => ReviewStrategy::Sequential,
            ReviewStrategyConfig::Bundled => ReviewStrategy::Bundled,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TailorConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
}

impl TailorConfig {
    /// Load configuration: file if present, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new("tailor.toml");
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Environment overrides: TAILOR_PORT, TAILOR_DB_PATH,
    /// TAILOR_ENRICH_ENDPOINT, TAILOR_REVIEW_STRATEGY.
    fn apply_env(&mut self) {
        if let Ok(port) = std::env::var("TAILOR_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(path) = std::env::var("TAILOR_DB_PATH") {
            if !path.trim().is_empty() {
                self.server.db_path = PathBuf::from(path);
            }
        }
        if let Ok(endpoint) = std::env::var("TAILOR_ENRICH_ENDPOINT") {
            if !endpoint.trim().is_empty() {
                self.enrichment.endpoint = Some(endpoint);
            }
        }
        if let Ok(strategy) = std::env::var("TAILOR_REVIEW_STRATEGY") {
            if let Ok(strategy) = ReviewStrategy::from_str(&strategy) {
                self.pipeline.review_strategy = match strategy {
                    ReviewStrategy::Sequential => ReviewStrategyConfig::Sequential,
                    ReviewStrategy::Bundled => ReviewStrategyConfig::Bundled,
                };
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.pipeline.readiness_threshold) {
            anyhow::bail!(
                "readiness_threshold must be between 0.0 and 1.0, got {}",
                self.pipeline.readiness_threshold
            );
        }
        if self.pipeline.suggestion_cap == 0 {
            anyhow::bail!("suggestion_cap must be at least 1");
        }
        if self.enrichment.timeout_secs == 0 {
            anyhow::bail!("enrichment timeout_secs must be at least 1");
        }
        Ok(())
    }

    /// The settings handed to the run controller.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            readiness_threshold: self.pipeline.readiness_threshold,
            suggestion_cap: self.pipeline.suggestion_cap,
            review_strategy: self.pipeline.review_strategy.into(),
            enrichment: self.enrichment.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = TailorConfig::default();
        assert_eq!(config.server.port, 3141);
        assert_eq!(config.pipeline.readiness_threshold, 0.6);
        assert_eq!(config.pipeline.suggestion_cap, 5);
        assert!(config.enrichment.endpoint.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[server]
port = 8080
db_path = "/tmp/tailor-test.db"

[pipeline]
readiness_threshold = 0.8
suggestion_cap = 3
review_strategy = "bundled"

[enrichment]
endpoint = "http://localhost:9090/rerank"
timeout_secs = 2
"#
        )
        .unwrap();

        let config = TailorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.pipeline.readiness_threshold, 0.8);
        assert_eq!(config.pipeline.suggestion_cap, 3);
        assert_eq!(
            config.pipeline.review_strategy,
            ReviewStrategyConfig::Bundled
        );
        assert_eq!(
            config.enrichment.endpoint.as_deref(),
            Some("http://localhost:9090/rerank")
        );
        assert_eq!(config.enrichment.timeout_secs, 2);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[server]\nport = 9000\n").unwrap();

        let config = TailorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.pipeline.suggestion_cap, 5);
    }

    #[test]
    fn test_validation_rejects_bad_threshold() {
        let mut config = TailorConfig::default();
        config.pipeline.readiness_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_cap() {
        let mut config = TailorConfig::default();
        config.pipeline.suggestion_cap = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pipeline_settings_conversion() {
        let mut config = TailorConfig::default();
        config.pipeline.review_strategy = ReviewStrategyConfig::Bundled;
        let settings = config.pipeline_settings();
        assert_eq!(settings.review_strategy, ReviewStrategy::Bundled);
        assert_eq!(settings.suggestion_cap, 5);
    }
}
