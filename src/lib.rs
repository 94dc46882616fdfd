//! Storyweaver - duplicate detection and merging for generated user stories
//!
//! Stories generated chunk by chunk from a long requirements document repeat
//! each other. Storyweaver removes those duplicates in three tiers:
//!
//! 1. **Candidate filter**: cheap title similarity and shared keywords over
//!    every pair.
//! 2. **Verification**: a language model (or the heuristic rule set) confirms
//!    which candidates describe the same feature.
//! 3. **Synthesis**: each transitive group of confirmed duplicates becomes one
//!    story that keeps every distinct acceptance criterion.
//!
//! Merging never fails because the model did: failed batches and groups fall
//! back to configured deterministic behavior.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): stories, pairs, config and the LLM port
//! - **Service Layer** (`services`): the tiers, grouping, catalog and report
//! - **Adapters** (`adapters`): Anthropic API and scripted substrates
//! - **Infrastructure Layer** (`infrastructure`): config loading and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```no_run
//! use storyweaver::domain::models::{MergeConfig, Story};
//! use storyweaver::services::StoryMerger;
//!
//! # async fn example(stories: Vec<Story>) {
//! let merger = StoryMerger::heuristic(MergeConfig::default());
//! let merged = merger.merge_stories(&stories).await;
//! println!("{}", merger.generate_report(stories.len(), merged.len()));
//! # }
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use adapters::substrates::{AnthropicApiSubstrate, ScriptedReply, ScriptedSubstrate};
pub use domain::models::{
    parse_story_list, CandidatePair, Config, LoggingConfig, MergeConfig, MergeStrategy,
    ModelConfig, RateLimitConfig, RetryConfig, Story, SynthesisFallback, VerificationFallback,
};
pub use domain::ports::{LlmSubstrate, SubstrateError, SubstrateRequest, SubstrateResponse};
pub use domain::{DomainError, DomainResult};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    CandidateFilter, MergeOutcome, MergeRunSummary, StoryCatalog, StoryMerger,
};
