//! LLM Substrate Port
//!
//! The merge pipeline asks a language model two kinds of question: "are these
//! candidate pairs really the same feature?" and "write one story out of these".
//! Both go through this port, so the pipeline can run against the Anthropic API,
//! a scripted test double, or anything else that can answer a prompt.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Which pipeline stage is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestPurpose {
    /// Tier 2 duplicate confirmation
    Verification,
    /// Tier 3 merged story synthesis
    Synthesis,
}

impl fmt::Display for RequestPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verification => f.write_str("verification"),
            Self::Synthesis => f.write_str("synthesis"),
        }
    }
}

/// Request to complete a prompt via an LLM substrate
#[derive(Debug, Clone)]
pub struct SubstrateRequest {
    /// Unique request identifier, echoed in logs
    pub request_id: Uuid,

    pub purpose: RequestPurpose,

    /// Instruction framing the answer format
    pub system_prompt: String,

    /// The question itself
    pub prompt: String,

    pub parameters: ExecutionParameters,
}

impl SubstrateRequest {
    pub fn new(
        purpose: RequestPurpose,
        system_prompt: impl Into<String>,
        prompt: impl Into<String>,
        parameters: ExecutionParameters,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            purpose,
            system_prompt: system_prompt.into(),
            prompt: prompt.into(),
            parameters,
        }
    }
}

/// Parameters for controlling LLM execution
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ExecutionParameters {
    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Sampling temperature (0.0 - 1.0)
    pub temperature: f32,
}

impl Default for ExecutionParameters {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.1,
        }
    }
}

/// Response from an LLM substrate
#[derive(Debug, Clone)]
pub struct SubstrateResponse {
    pub request_id: Uuid,

    /// Generated text
    pub content: String,

    pub stop_reason: StopReason,

    /// Token usage statistics (if available)
    pub usage: Option<TokenUsage>,
}

/// Reason why generation stopped
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    Other(String),
}

impl StopReason {
    pub fn from_api(reason: Option<&str>) -> Self {
        match reason {
            Some("end_turn") | None => Self::EndTurn,
            Some("max_tokens") => Self::MaxTokens,
            Some("stop_sequence") => Self::StopSequence,
            Some(other) => Self::Other(other.to_string()),
        }
    }
}

/// Token usage information
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Failures of the capability call itself.
///
/// A response that arrives but cannot be parsed is a different failure; see
/// [`crate::services::json_payload::JsonExtractError`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum SubstrateError {
    #[error("Substrate not configured: {0}")]
    NotConfigured(String),

    #[error("Substrate unavailable: {0}")]
    Unavailable(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("Execution timeout after {0}s")]
    Timeout(u64),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Empty response from substrate")]
    EmptyResponse,
}

impl SubstrateError {
    /// Whether retrying the same request may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded(_)
                | Self::Timeout(_)
                | Self::ServerError { .. }
                | Self::NetworkError(_)
                | Self::Unavailable(_)
        )
    }
}

/// Port trait for LLM substrate implementations
///
/// Implementations must be `Send + Sync`; the orchestrator shares one instance
/// across concurrently dispatched batches.
#[async_trait]
pub trait LlmSubstrate: Send + Sync {
    /// Short identifier for this substrate type, e.g. "anthropic-api"
    fn substrate_id(&self) -> &'static str;

    /// Model the substrate answers with, as shown in reports
    fn model_id(&self) -> &str;

    /// Complete one prompt.
    async fn execute(&self, request: SubstrateRequest) -> Result<SubstrateResponse, SubstrateError>;
}
