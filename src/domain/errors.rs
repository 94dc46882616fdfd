//! Domain errors for the story merge engine.

use thiserror::Error;

/// Domain-level errors that can occur while merging stories.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Invalid pair id '{0}': expected 'I-J' with I < J")]
    InvalidPairId(String),

    #[error("Story index {index} out of range for {len} stories")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Invalid story: {0}")]
    InvalidStory(String),

    #[error("Merge strategy '{0}' requires a configured LLM substrate")]
    StrategyRequiresSubstrate(String),

    #[error("Empty merge group")]
    EmptyGroup,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
