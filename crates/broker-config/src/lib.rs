//! Engine configuration.
//!
//! Loads the exact option set `spec.md §9` enumerates from a JSON file:
//! `parallel_queries`, `max_price_threshold`, `preferred_regions`,
//! `optimization_settings.*`, `analytics_settings.retention_days`. Unknown
//! top-level keys are rejected rather than silently ignored, mirroring
//! `claw-config`'s load/validate/save shape.

#![forbid(unsafe_code)]

use std::path::Path;

use broker_proto::ScoreWeights;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use error::{ConfigError, Result};

const RECOGNIZED_KEYS: &[&str] = &[
    "parallel_queries",
    "max_price_threshold",
    "preferred_regions",
    "optimization_settings",
    "analytics_settings",
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OptimizationSettings {
    pub price_weight: f64,
    pub latency_weight: f64,
    pub reliability_weight: f64,
    pub availability_weight: f64,
}

impl Default for OptimizationSettings {
    fn default() -> Self {
        let w = ScoreWeights::default();
        Self {
            price_weight: w.price_weight,
            latency_weight: w.latency_weight,
            reliability_weight: w.reliability_weight,
            availability_weight: w.availability_weight,
        }
    }
}

impl OptimizationSettings {
    /// Weights must sum to 1.0, within floating-point tolerance.
    fn validate(&self) -> Result<()> {
        let sum = self.price_weight + self.latency_weight + self.reliability_weight + self.availability_weight;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(ConfigError::InvalidWeights(sum));
        }
        Ok(())
    }

    pub fn as_score_weights(&self) -> ScoreWeights {
        ScoreWeights {
            price_weight: self.price_weight,
            latency_weight: self.latency_weight,
            reliability_weight: self.reliability_weight,
            availability_weight: self.availability_weight,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AnalyticsSettings {
    pub retention_days: u32,
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self { retention_days: 90 }
    }
}

/// The engine's full, validated configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub parallel_queries: usize,
    pub max_price_threshold: f64,
    pub preferred_regions: Vec<String>,
    pub optimization_settings: OptimizationSettings,
    pub analytics_settings: AnalyticsSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallel_queries: 6,
            max_price_threshold: 10.0,
            preferred_regions: Vec::new(),
            optimization_settings: OptimizationSettings::default(),
            analytics_settings: AnalyticsSettings::default(),
        }
    }
}

impl EngineConfig {
    fn validate(&self) -> Result<()> {
        if self.parallel_queries == 0 {
            return Err(ConfigError::InvalidValue("parallel_queries must be at least 1".to_string()));
        }
        if self.max_price_threshold < 0.0 {
            return Err(ConfigError::InvalidValue("max_price_threshold must be non-negative".to_string()));
        }
        self.optimization_settings.validate()
    }

    /// Parse and validate configuration from a JSON string. Unrecognized
    /// top-level keys are rejected; missing keys fall back to their
    /// documented defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let Some(obj) = value.as_object() else {
            return Err(ConfigError::InvalidValue("configuration root must be a JSON object".to_string()));
        };
        for key in obj.keys() {
            if !RECOGNIZED_KEYS.contains(&key.as_str()) {
                return Err(ConfigError::UnknownKey(key.clone()));
            }
        }
        let config: EngineConfig = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file on disk. Missing files fall back to
    /// [`EngineConfig::default`].
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                debug!(path = %path.display(), "loaded engine configuration");
                Self::from_json(&contents)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no configuration file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(ConfigError::Io(e.to_string())),
        }
    }

    /// Persist configuration to disk, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents).map_err(|e| {
            warn!(path = %path.display(), error = %e, "failed to save engine configuration");
            ConfigError::Io(e.to_string())
        })
    }
}

pub mod error {
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum ConfigError {
        #[error("unrecognized configuration key: {0}")]
        UnknownKey(String),
        #[error("invalid configuration value: {0}")]
        InvalidValue(String),
        #[error("optimization_settings weights must sum to 1.0, got {0}")]
        InvalidWeights(f64),
        #[error("malformed configuration JSON: {0}")]
        Json(#[from] serde_json::Error),
        #[error("I/O error: {0}")]
        Io(String),
    }

    pub type Result<T> = std::result::Result<T, ConfigError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let json = r#"{"parallel_queries": 4, "bogus_setting": true}"#;
        let err = EngineConfig::from_json(json).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKey(k) if k == "bogus_setting"));
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let json = r#"{"parallel_queries": 10}"#;
        let config = EngineConfig::from_json(json).unwrap();
        assert_eq!(config.parallel_queries, 10);
        assert_eq!(config.max_price_threshold, 10.0);
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let json = r#"{"optimization_settings": {"price_weight": 0.5, "latency_weight": 0.5, "reliability_weight": 0.5, "availability_weight": 0.5}}"#;
        let err = EngineConfig::from_json(json).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidWeights(_)));
    }

    #[test]
    fn test_zero_parallel_queries_rejected() {
        let json = r#"{"parallel_queries": 0}"#;
        assert!(EngineConfig::from_json(json).is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = EngineConfig::load(&dir.path().join("nonexistent.json")).expect("load");
        assert_eq!(config.parallel_queries, 6);
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        let mut config = EngineConfig::default();
        config.parallel_queries = 12;
        config.preferred_regions.push("us-east".to_string());
        config.save(&path).expect("save");

        let loaded = EngineConfig::load(&path).expect("load");
        assert_eq!(loaded.parallel_queries, 12);
        assert_eq!(loaded.preferred_regions, vec!["us-east".to_string()]);
    }
}
