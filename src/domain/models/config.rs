use std::fmt;

use serde::{Deserialize, Serialize};

/// Main configuration structure for Storyweaver
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[derive(Default)]
pub struct Config {
    /// Merge pipeline tuning
    #[serde(default)]
    pub merge: MergeConfig,

    /// LLM model connection settings
    #[serde(default)]
    pub model: ModelConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Retry policy configuration
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Which Tier 2/Tier 3 implementation a run uses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Rule-based verification and field-wise merging; no model required
    Heuristic,
    /// Model-backed verification and synthesis
    #[default]
    Model,
}

impl MergeStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Heuristic => "heuristic",
            Self::Model => "model",
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a failed verification batch decides for its pairs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum VerificationFallback {
    /// Treat every pair of the failed batch as a confirmed duplicate
    #[default]
    ConfirmAll,
    /// Treat every pair of the failed batch as distinct
    RejectAll,
}

/// What a failed model synthesis emits for its group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisFallback {
    /// Keep the first story of the group, annotated with provenance
    #[default]
    FirstStory,
    /// Merge the group with the heuristic field strategy
    Heuristic,
}

/// Merge pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MergeConfig {
    #[serde(default)]
    pub strategy: MergeStrategy,

    /// Tier 1 title ratio at or above which a pair is a candidate
    #[serde(default = "default_title_similarity_threshold")]
    pub title_similarity_threshold: f64,

    /// Tier 1 shared-keyword count at or above which a pair is a candidate
    #[serde(default = "default_keyword_match_threshold")]
    pub keyword_match_threshold: usize,

    /// Candidate pairs per verification request
    #[serde(default = "default_verification_batch_size")]
    pub verification_batch_size: usize,

    /// Characters of the narrative shown to the verifier
    #[serde(default = "default_narrative_excerpt_chars")]
    pub narrative_excerpt_chars: usize,

    #[serde(default)]
    pub verification_fallback: VerificationFallback,

    #[serde(default)]
    pub synthesis_fallback: SynthesisFallback,

    /// Upper bound on in-flight model calls within a tier
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Heuristic verifier: title ratio that alone confirms a pair
    #[serde(default = "default_heuristic_title_threshold")]
    pub heuristic_title_threshold: f64,

    /// Heuristic verifier: title ratio that confirms a pair with enough criteria overlap
    #[serde(default = "default_fuzzy_title_threshold")]
    pub fuzzy_title_threshold: f64,

    #[serde(default = "default_criteria_overlap_threshold")]
    pub criteria_overlap_threshold: f64,

    /// Heuristic verifier: criteria overlap needed when titles share a concept
    #[serde(default = "default_concept_overlap_threshold")]
    pub concept_overlap_threshold: f64,

    /// Criteria more similar than this collapse into one when merging
    #[serde(default = "default_criteria_duplicate_threshold")]
    pub criteria_duplicate_threshold: f64,
}

const fn default_title_similarity_threshold() -> f64 {
    0.75
}

const fn default_keyword_match_threshold() -> usize {
    2
}

const fn default_verification_batch_size() -> usize {
    50
}

const fn default_narrative_excerpt_chars() -> usize {
    200
}

const fn default_max_concurrent_requests() -> usize {
    4
}

const fn default_heuristic_title_threshold() -> f64 {
    0.85
}

const fn default_fuzzy_title_threshold() -> f64 {
    0.70
}

const fn default_criteria_overlap_threshold() -> f64 {
    0.5
}

const fn default_concept_overlap_threshold() -> f64 {
    0.3
}

const fn default_criteria_duplicate_threshold() -> f64 {
    0.85
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            strategy: MergeStrategy::default(),
            title_similarity_threshold: default_title_similarity_threshold(),
            keyword_match_threshold: default_keyword_match_threshold(),
            verification_batch_size: default_verification_batch_size(),
            narrative_excerpt_chars: default_narrative_excerpt_chars(),
            verification_fallback: VerificationFallback::default(),
            synthesis_fallback: SynthesisFallback::default(),
            max_concurrent_requests: default_max_concurrent_requests(),
            heuristic_title_threshold: default_heuristic_title_threshold(),
            fuzzy_title_threshold: default_fuzzy_title_threshold(),
            criteria_overlap_threshold: default_criteria_overlap_threshold(),
            concept_overlap_threshold: default_concept_overlap_threshold(),
            criteria_duplicate_threshold: default_criteria_duplicate_threshold(),
        }
    }
}

/// Anthropic API model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ModelConfig {
    #[serde(default = "default_model_id")]
    pub model_id: String,

    /// API key; falls back to `ANTHROPIC_API_KEY` when unset
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_model_id() -> String {
    "claude-3-5-sonnet-20241022".to_string()
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

const fn default_max_tokens() -> u32 {
    4096
}

const fn default_temperature() -> f32 {
    0.1
}

const fn default_timeout_secs() -> u64 {
    120
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_id: default_model_id(),
            api_key: None,
            base_url: default_base_url(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling JSON log files; none disables file output
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Rotation of the log file: minutely, hourly, daily or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RateLimitConfig {
    /// Requests per second allowed
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,

    /// Burst size for token bucket
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
}

const fn default_requests_per_second() -> f64 {
    5.0
}

const fn default_burst_size() -> u32 {
    5
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst_size: default_burst_size(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    1000
}

const fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.merge.strategy, MergeStrategy::Model);
        assert!((config.merge.title_similarity_threshold - 0.75).abs() < f64::EPSILON);
        assert_eq!(config.merge.keyword_match_threshold, 2);
        assert_eq!(config.merge.verification_batch_size, 50);
        assert_eq!(config.merge.narrative_excerpt_chars, 200);
        assert_eq!(
            config.merge.verification_fallback,
            VerificationFallback::ConfirmAll
        );
        assert_eq!(config.model.model_id, "claude-3-5-sonnet-20241022");
        assert_eq!(config.model.max_tokens, 4096);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = "merge:\n  strategy: heuristic\n  verification_fallback: reject_all\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.merge.strategy, MergeStrategy::Heuristic);
        assert_eq!(
            config.merge.verification_fallback,
            VerificationFallback::RejectAll
        );
        assert_eq!(config.merge.verification_batch_size, 50);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_strategy_display() {
        assert_eq!(MergeStrategy::Heuristic.to_string(), "heuristic");
        assert_eq!(MergeStrategy::Model.to_string(), "model");
    }
}
