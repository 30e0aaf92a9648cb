//! Engine configuration

use crate::learner::{DEFAULT_MAX_PATTERNS, DEFAULT_MIN_APPLY_CONFIDENCE};
use crate::recovery::DEFAULT_MAX_ATTEMPTS;
use crate::types::TransformOptions;
use crate::{Result, TransformError};
use layerfix_utils::ConfigBuilder;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the transformation executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default budget for a whole pipeline run (milliseconds)
    pub timeout_ms: u64,
    /// Default budget for one backend call (milliseconds)
    pub layer_timeout_ms: u64,
    /// Whether runs use recovery unless the caller says otherwise
    pub enable_recovery: bool,
    /// Recovery attempts per failed layer
    pub recovery_max_attempts: u32,
    /// Delay before the first recovery attempt (milliseconds)
    pub recovery_base_delay_ms: u64,
    /// Rule ceiling before eviction
    pub max_patterns: usize,
    /// Rules below this confidence are not applied
    pub min_apply_confidence: f64,
    /// Learn rules from committed layers
    pub learning_enabled: bool,
    /// JSON file for learned rules; in memory only when unset
    pub pattern_store_path: Option<PathBuf>,
    /// Log every state transition at info level
    pub verbose: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 120_000,
            layer_timeout_ms: 30_000,
            enable_recovery: false,
            recovery_max_attempts: DEFAULT_MAX_ATTEMPTS,
            recovery_base_delay_ms: 1000,
            max_patterns: DEFAULT_MAX_PATTERNS,
            min_apply_confidence: DEFAULT_MIN_APPLY_CONFIDENCE,
            learning_enabled: true,
            pattern_store_path: None,
            verbose: false,
        }
    }
}

impl EngineConfig {
    /// Load from a TOML, JSON or YAML file; missing keys keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let config = ConfigBuilder::<Self>::new().load_file(path)?.build()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults, overridden by `path` when it exists
    pub fn from_optional_file(path: &Path) -> Result<Self> {
        let config = ConfigBuilder::<Self>::new().load_optional_file(path)?.build()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 || self.layer_timeout_ms == 0 {
            return Err(TransformError::Config("timeouts must be greater than zero".to_string()));
        }
        if !(0.0..=1.0).contains(&self.min_apply_confidence) {
            return Err(TransformError::Config(format!(
                "min_apply_confidence must be within [0, 1], got {}",
                self.min_apply_confidence
            )));
        }
        if self.max_patterns == 0 {
            return Err(TransformError::Config("max_patterns must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn recovery_base_delay(&self) -> Duration {
        Duration::from_millis(self.recovery_base_delay_ms)
    }

    /// Per-call options seeded from this configuration
    pub fn default_options(&self) -> TransformOptions {
        TransformOptions {
            verbose: self.verbose,
            timeout_ms: self.timeout_ms,
            layer_timeout_ms: self.layer_timeout_ms,
            enable_recovery: self.enable_recovery,
            ..TransformOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_patterns, 1000);
        assert_eq!(config.recovery_base_delay(), Duration::from_secs(1));
        assert_eq!(config.default_options().timeout_ms, 120_000);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "layer_timeout_ms = 500\nlearning_enabled = false").unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.layer_timeout_ms, 500);
        assert!(!config.learning_enabled);
        assert_eq!(config.timeout_ms, 120_000);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, "{{\"min_apply_confidence\": 1.5}}").unwrap();

        assert!(matches!(
            EngineConfig::from_file(file.path()),
            Err(TransformError::Config(_))
        ));
    }

    #[test]
    fn test_missing_optional_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::from_optional_file(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }
}
