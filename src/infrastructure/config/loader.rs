use std::path::Path;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::Config;

/// Project-local config directory.
pub const CONFIG_DIR: &str = ".storyweaver";

/// Prefix of environment overrides, e.g. `STORYWEAVER_MERGE__STRATEGY=heuristic`.
pub const ENV_PREFIX: &str = "STORYWEAVER_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: [&str; 2] = ["json", "pretty"];
const ROTATIONS: [&str; 4] = ["minutely", "hourly", "daily", "never"];

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {name}: {value}. Must be between 0.0 and 1.0")]
    InvalidThreshold { name: &'static str, value: f64 },

    #[error("Invalid verification_batch_size: 0. Must be at least 1")]
    ZeroBatchSize,

    #[error("Invalid max_concurrent_requests: 0. Must be at least 1")]
    ZeroConcurrency,

    #[error("Invalid keyword_match_threshold: 0. Must be at least 1")]
    ZeroKeywordThreshold,

    #[error("Invalid temperature: {0}. Must be between 0.0 and 1.0")]
    InvalidTemperature(f32),

    #[error("Invalid max_tokens: 0. Must be at least 1")]
    ZeroMaxTokens,

    #[error("Model id cannot be empty")]
    EmptyModelId,

    #[error("Invalid rate limit: {0}. Must be positive")]
    InvalidRateLimit(f64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: minutely, hourly, daily, never")]
    InvalidRotation(String),

    #[error("Invalid burst_size: {0}. Must be at least 1")]
    InvalidBurstSize(u32),

    #[error("Invalid max_retries: {0}. Cannot be 0")]
    InvalidMaxRetries(u32),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .storyweaver/config.yaml
    /// 3. .storyweaver/local.yaml (optional local overrides)
    /// 4. Environment variables (STORYWEAVER_* prefix, `__` between sections)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(".")
    }

    /// [`Self::load`] rooted at `root` instead of the working directory.
    pub fn load_from_dir(root: impl AsRef<Path>) -> Result<Config> {
        let dir = root.as_ref().join(CONFIG_DIR);
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.is_file() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let merge = &config.merge;
        let thresholds = [
            ("title_similarity_threshold", merge.title_similarity_threshold),
            ("heuristic_title_threshold", merge.heuristic_title_threshold),
            ("fuzzy_title_threshold", merge.fuzzy_title_threshold),
            ("criteria_overlap_threshold", merge.criteria_overlap_threshold),
            ("concept_overlap_threshold", merge.concept_overlap_threshold),
            ("criteria_duplicate_threshold", merge.criteria_duplicate_threshold),
        ];
        for (name, value) in thresholds {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidThreshold { name, value });
            }
        }

        if merge.verification_batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if merge.max_concurrent_requests == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if merge.keyword_match_threshold == 0 {
            return Err(ConfigError::ZeroKeywordThreshold);
        }

        // Validate model config
        if config.model.model_id.trim().is_empty() {
            return Err(ConfigError::EmptyModelId);
        }
        if config.model.max_tokens == 0 {
            return Err(ConfigError::ZeroMaxTokens);
        }
        if !(0.0..=1.0).contains(&config.model.temperature) {
            return Err(ConfigError::InvalidTemperature(config.model.temperature));
        }

        // Validate logging config
        if !LOG_LEVELS.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        if !LOG_FORMATS.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        if !ROTATIONS.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        // Validate rate_limit
        if config.rate_limit.requests_per_second <= 0.0 || !config.rate_limit.requests_per_second.is_finite() {
            return Err(ConfigError::InvalidRateLimit(config.rate_limit.requests_per_second));
        }
        if config.rate_limit.burst_size == 0 {
            return Err(ConfigError::InvalidBurstSize(config.rate_limit.burst_size));
        }

        // Validate retry config
        if config.retry.max_retries == 0 {
            return Err(ConfigError::InvalidMaxRetries(config.retry.max_retries));
        }
        if config.retry.initial_backoff_ms >= config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }

        Ok(())
    }
}
