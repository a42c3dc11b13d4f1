use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Threshold {name} = {value} out of range [0, 1]")]
    ThresholdOutOfRange { name: &'static str, value: f64 },

    #[error("decay_factor must be below 1.0, got {0}")]
    InvalidDecayFactor(f64),

    #[error("confidence gain k must be positive, got {0}")]
    InvalidGainK(f64),

    #[error("Invalid max_concurrency: {0}. Must be at least 1")]
    InvalidMaxConcurrency(usize),

    #[error("trace_timeout_multiplier must be at least 1.0, got {0}")]
    InvalidTimeoutMultiplier(f64),

    #[error("recent_window must be at least 1")]
    InvalidRecentWindow,
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .engram/config.yaml (project config, created by init)
    /// 3. .engram/local.yaml (project local overrides, optional)
    /// 4. Environment variables (ENGRAM_* prefix, highest priority)
    ///
    /// Configuration is always project-local (pwd/.engram/) so several
    /// stores can coexist on one machine.
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".engram/config.yaml"))
            .merge(Yaml::file(".engram/local.yaml"))
            .merge(Env::prefixed("ENGRAM_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        // Every confidence/success-rate gate must live in [0, 1].
        let thresholds: [(&'static str, f64); 9] = [
            ("dispatch.follower_threshold", config.dispatch.follower_threshold),
            ("dispatch.min_success_rate", config.dispatch.min_success_rate),
            ("dispatch.min_match_score", config.dispatch.min_match_score),
            ("consolidation.seed_confidence_cap", config.consolidation.seed_confidence_cap),
            ("consolidation.mid_confidence", config.consolidation.mid_confidence),
            ("consolidation.low_confidence", config.consolidation.low_confidence),
            ("consolidation.ultra_confidence", config.consolidation.ultra_confidence),
            ("consolidation.demote_success_rate", config.consolidation.demote_success_rate),
            ("consolidation.review_success_rate", config.consolidation.review_success_rate),
        ];
        for (name, value) in thresholds {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ThresholdOutOfRange { name, value });
            }
        }

        let confidence = &config.consolidation.confidence;
        if confidence.decay_factor >= 1.0 || confidence.decay_factor < 0.0 {
            return Err(ConfigError::InvalidDecayFactor(confidence.decay_factor));
        }
        if confidence.gain_k <= 0.0 {
            return Err(ConfigError::InvalidGainK(confidence.gain_k));
        }
        if config.consolidation.recent_window == 0 {
            return Err(ConfigError::InvalidRecentWindow);
        }

        if config.executor.max_concurrency == 0 {
            return Err(ConfigError::InvalidMaxConcurrency(
                config.executor.max_concurrency,
            ));
        }
        if config.executor.trace_timeout_multiplier < 1.0 {
            return Err(ConfigError::InvalidTimeoutMultiplier(
                config.executor.trace_timeout_multiplier,
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        let mut config = Config::default();
        config.dispatch.follower_threshold = 1.4;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::ThresholdOutOfRange { .. })
        ));
    }

    #[test]
    fn test_rejects_decay_factor_at_or_above_one() {
        let mut config = Config::default();
        config.consolidation.confidence.decay_factor = 1.0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidDecayFactor(_))
        ));
    }

    #[test]
    fn test_rejects_empty_database_path() {
        let mut config = Config::default();
        config.database.path = String::new();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::EmptyDatabasePath)
        ));
    }

    #[test]
    fn test_rejects_bad_log_level() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "dispatch:\n  follower_threshold: 0.92\nconsolidation:\n  low_usage: 25\n",
        )
        .unwrap();

        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert!((config.dispatch.follower_threshold - 0.92).abs() < f64::EPSILON);
        assert_eq!(config.consolidation.low_usage, 25);
    }

    #[test]
    fn test_load_from_file_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "consolidation:\n  confidence:\n    decay_factor: 1.5\n").unwrap();

        assert!(ConfigLoader::load_from_file(&path).is_err());
    }
}
