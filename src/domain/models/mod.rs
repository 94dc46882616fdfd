pub mod config;
pub mod pair;
pub mod story;

pub use config::{
    Config, LoggingConfig, MergeConfig, MergeStrategy, ModelConfig, RateLimitConfig, RetryConfig,
    SynthesisFallback, VerificationFallback,
};
pub use pair::CandidatePair;
pub use story::{parse_story_list, Story};
