//! Anthropic API substrate implementation.
//!
//! Makes direct HTTP calls to the Anthropic Messages API. Every attempt waits
//! on a token bucket first; transient failures are retried with exponential
//! backoff, everything else is returned on the first attempt.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::models::{ModelConfig, RateLimitConfig, RetryConfig};
use crate::domain::ports::{
    LlmSubstrate, StopReason, SubstrateError, SubstrateRequest, SubstrateResponse, TokenUsage,
};
use crate::infrastructure::logging::scrub_with_key;

/// Messages API version header value.
pub const ANTHROPIC_API_VERSION: &str = "2023-06-01";

/// Env var consulted when the config carries no key.
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

const ERROR_EXCERPT_CHARS: usize = 300;

/// Message role in Anthropic API.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Cache control marker for Anthropic prompt caching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheControl {
    #[serde(rename = "type")]
    pub control_type: String,
}

impl CacheControl {
    pub fn ephemeral() -> Self {
        Self {
            control_type: "ephemeral".to_string(),
        }
    }
}

/// System prompt content block.
///
/// The verification and merge instructions are identical across a run, so
/// they are marked cacheable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
}

impl SystemContentBlock {
    pub fn cached_text(content: impl Into<String>) -> Self {
        Self {
            block_type: "text".to_string(),
            text: content.into(),
            cache_control: Some(CacheControl::ephemeral()),
        }
    }
}

/// Content block in a message. Only text is produced or consumed here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
}

/// Request to the Anthropic Messages API.
#[derive(Debug, Serialize)]
pub struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<Vec<SystemContentBlock>>,
    pub messages: Vec<Message>,
    pub temperature: f32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Response from the Anthropic Messages API.
#[derive(Debug, Deserialize)]
pub struct MessagesResponse {
    pub id: String,
    pub content: Vec<ContentBlock>,
    pub model: String,
    pub stop_reason: Option<String>,
    pub usage: Option<Usage>,
}

impl MessagesResponse {
    /// Text blocks joined with newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Unsupported => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

/// One failed attempt, with the server's retry hint if it sent one.
#[derive(Debug)]
struct AttemptFailure {
    error: SubstrateError,
    retry_after: Option<Duration>,
}

impl From<SubstrateError> for AttemptFailure {
    fn from(error: SubstrateError) -> Self {
        Self {
            error,
            retry_after: None,
        }
    }
}

/// Anthropic API substrate.
pub struct AnthropicApiSubstrate {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model_id: String,
    timeout_secs: u64,
    limiter: Option<DefaultDirectRateLimiter>,
    retry: RetryConfig,
}

impl std::fmt::Debug for AnthropicApiSubstrate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicApiSubstrate")
            .field("base_url", &self.base_url)
            .field("model_id", &self.model_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("rate_limited", &self.limiter.is_some())
            .finish_non_exhaustive()
    }
}

impl AnthropicApiSubstrate {
    /// Build the substrate. A missing API key is not an error here; calls
    /// fail with [`SubstrateError::NotConfigured`] instead.
    pub fn new(
        model: &ModelConfig,
        rate_limit: &RateLimitConfig,
        retry: &RetryConfig,
    ) -> Result<Self, SubstrateError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(model.timeout_secs))
            .build()
            .map_err(|e| SubstrateError::NotConfigured(format!("Failed to create HTTP client: {e}")))?;

        let api_key = model
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|key| !key.trim().is_empty()));

        Ok(Self {
            client,
            api_key,
            base_url: model.base_url.trim_end_matches('/').to_string(),
            model_id: model.model_id.clone(),
            timeout_secs: model.timeout_secs,
            limiter: rate_limiter(rate_limit),
            retry: retry.clone(),
        })
    }

    /// Whether an API key was found in config or the environment.
    pub const fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn build_request(&self, request: &SubstrateRequest) -> MessagesRequest {
        let system = if request.system_prompt.is_empty() {
            None
        } else {
            Some(vec![SystemContentBlock::cached_text(&request.system_prompt)])
        };

        MessagesRequest {
            model: self.model_id.clone(),
            max_tokens: request.parameters.max_tokens,
            system,
            messages: vec![Message {
                role: MessageRole::User,
                content: vec![ContentBlock::Text {
                    text: request.prompt.clone(),
                }],
            }],
            temperature: request.parameters.temperature,
        }
    }

    fn map_transport_error(&self, error: &reqwest::Error) -> SubstrateError {
        if error.is_timeout() {
            SubstrateError::Timeout(self.timeout_secs)
        } else if error.is_connect() {
            SubstrateError::NetworkError(format!("Connection failed: {error}"))
        } else {
            SubstrateError::NetworkError(error.to_string())
        }
    }

    fn scrub(&self, text: &str) -> String {
        scrub_with_key(text, self.api_key.as_deref())
    }

    async fn send_once(
        &self,
        body: &MessagesRequest,
        api_key: &str,
    ) -> Result<MessagesResponse, AttemptFailure> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_API_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(&e))?;

        let status = response.status();
        let retry_after = retry_after(response.headers());
        let text = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(&e))?;

        if !status.is_success() {
            return Err(AttemptFailure {
                error: map_status(status, &self.scrub(&error_message(&text))),
                retry_after,
            });
        }

        serde_json::from_str(&text).map_err(|e| {
            SubstrateError::ServerError {
                status: status.as_u16(),
                message: format!("Unreadable response envelope: {e}"),
            }
            .into()
        })
    }
}

#[async_trait]
impl LlmSubstrate for AnthropicApiSubstrate {
    fn substrate_id(&self) -> &'static str {
        "anthropic-api"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn execute(&self, request: SubstrateRequest) -> Result<SubstrateResponse, SubstrateError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            SubstrateError::NotConfigured(format!("{API_KEY_ENV} not set and no model.api_key configured"))
        })?;

        let body = self.build_request(&request);
        let body = &body;
        let max_retries = self.retry.max_retries;
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;
        let request_id = request.request_id;
        let purpose = request.purpose;

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.retry.initial_backoff_ms.max(1)))
            .with_max_interval(Duration::from_millis(self.retry.max_backoff_ms.max(1)))
            .with_max_elapsed_time(None)
            .build();

        let result = backoff::future::retry(policy, || async move {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            match self.send_once(body, api_key).await {
                Ok(response) => Ok(response),
                Err(failure) if failure.error.is_transient() && attempt <= max_retries => {
                    warn!(
                        %request_id,
                        %purpose,
                        attempt,
                        max_retries,
                        error = %failure.error,
                        "Transient substrate error, retrying"
                    );
                    Err(match failure.retry_after {
                        Some(delay) => backoff::Error::retry_after(failure.error, delay),
                        None => backoff::Error::transient(failure.error),
                    })
                }
                Err(failure) => Err(backoff::Error::permanent(failure.error)),
            }
        })
        .await;

        let response = result?;
        let content = response.text();
        if content.trim().is_empty() {
            return Err(SubstrateError::EmptyResponse);
        }

        debug!(
            %request_id,
            %purpose,
            message_id = %response.id,
            model = %response.model,
            attempts = attempts.load(Ordering::Relaxed),
            "Substrate call completed"
        );

        Ok(SubstrateResponse {
            request_id,
            content,
            stop_reason: StopReason::from_api(response.stop_reason.as_deref()),
            usage: response.usage.map(|usage| TokenUsage {
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
            }),
        })
    }
}

/// Token bucket for the configured rate; `None` disables limiting.
fn rate_limiter(config: &RateLimitConfig) -> Option<DefaultDirectRateLimiter> {
    if !config.requests_per_second.is_finite() || config.requests_per_second <= 0.0 {
        return None;
    }
    let burst = NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN);
    Quota::with_period(Duration::from_secs_f64(1.0 / config.requests_per_second))
        .map(|quota| RateLimiter::direct(quota.allow_burst(burst)))
}

fn map_status(status: StatusCode, message: &str) -> SubstrateError {
    match status.as_u16() {
        401 | 403 => SubstrateError::AuthError(message.to_string()),
        429 => SubstrateError::RateLimitExceeded(message.to_string()),
        code @ 500..=599 => SubstrateError::ServerError {
            status: code,
            message: message.to_string(),
        },
        code => SubstrateError::InvalidRequest(format!("HTTP {code}: {message}")),
    }
}

/// The API's own error message when the body is an error envelope.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorEnvelope>(body).map_or_else(
        |_| body.chars().take(ERROR_EXCERPT_CHARS).collect(),
        |envelope| format!("{}: {}", envelope.error.error_type, envelope.error.message),
    )
}

fn retry_after(headers: &header::HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{ExecutionParameters, RequestPurpose};

    fn model_config(api_key: Option<&str>) -> ModelConfig {
        ModelConfig {
            api_key: api_key.map(str::to_string),
            ..ModelConfig::default()
        }
    }

    #[test]
    fn test_build_request() {
        let substrate = AnthropicApiSubstrate::new(
            &model_config(Some("test-key")),
            &RateLimitConfig::default(),
            &RetryConfig::default(),
        )
        .unwrap();
        let request = SubstrateRequest::new(
            RequestPurpose::Verification,
            "You are a duplicate detector",
            "Pairs: []",
            ExecutionParameters {
                max_tokens: 512,
                temperature: 0.0,
            },
        );

        let api_request = substrate.build_request(&request);
        assert_eq!(api_request.model, "claude-3-5-sonnet-20241022");
        assert_eq!(api_request.max_tokens, 512);
        assert_eq!(api_request.messages.len(), 1);
        let system = api_request.system.unwrap();
        assert!(system[0].cache_control.is_some());

        let value = serde_json::to_value(
            substrate.build_request(&SubstrateRequest::new(
                RequestPurpose::Synthesis,
                "",
                "merge",
                ExecutionParameters::default(),
            )),
        )
        .unwrap();
        assert!(value.get("system").is_none());
        assert_eq!(value["messages"][0]["content"][0]["type"], "text");
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            map_status(StatusCode::BAD_REQUEST, "bad"),
            SubstrateError::InvalidRequest(_)
        ));
        assert!(matches!(
            map_status(StatusCode::UNAUTHORIZED, "no"),
            SubstrateError::AuthError(_)
        ));
        assert!(matches!(
            map_status(StatusCode::FORBIDDEN, "no"),
            SubstrateError::AuthError(_)
        ));
        assert!(matches!(
            map_status(StatusCode::TOO_MANY_REQUESTS, "slow"),
            SubstrateError::RateLimitExceeded(_)
        ));
        let overloaded = StatusCode::from_u16(529).unwrap();
        assert!(matches!(
            map_status(overloaded, "busy"),
            SubstrateError::ServerError { status: 529, .. }
        ));
    }

    #[test]
    fn test_error_message_prefers_envelope() {
        let body = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        assert_eq!(error_message(body), "overloaded_error: Overloaded");
        assert_eq!(error_message("plain failure"), "plain failure");
    }

    #[test]
    fn test_response_text_skips_other_blocks() {
        let response: MessagesResponse = serde_json::from_value(serde_json::json!({
            "id": "msg_1",
            "model": "m",
            "stop_reason": "end_turn",
            "content": [
                {"type": "text", "text": "first"},
                {"type": "tool_use", "id": "t", "name": "n", "input": {}},
                {"type": "text", "text": "second"}
            ],
            "usage": {"input_tokens": 1, "output_tokens": 2}
        }))
        .unwrap();
        assert_eq!(response.text(), "first\nsecond");
    }

    #[test]
    fn test_rate_limiter_disabled_for_non_positive_rate() {
        let disabled = RateLimitConfig {
            requests_per_second: 0.0,
            burst_size: 1,
        };
        assert!(rate_limiter(&disabled).is_none());
        assert!(rate_limiter(&RateLimitConfig::default()).is_some());
    }

    #[test]
    fn test_debug_hides_key() {
        let substrate = AnthropicApiSubstrate::new(
            &model_config(Some("sk-ant-secret-value-123")),
            &RateLimitConfig::default(),
            &RetryConfig::default(),
        )
        .unwrap();
        let debug = format!("{substrate:?}");
        assert!(!debug.contains("sk-ant-secret-value-123"));
        assert!(substrate.is_configured());
    }

    #[tokio::test]
    async fn test_missing_key_is_not_configured() {
        let substrate = temp_env::with_var_unset(API_KEY_ENV, || {
            AnthropicApiSubstrate::new(
                &model_config(None),
                &RateLimitConfig::default(),
                &RetryConfig::default(),
            )
            .unwrap()
        });
        assert!(!substrate.is_configured());

        let err = substrate
            .execute(SubstrateRequest::new(
                RequestPurpose::Verification,
                "",
                "prompt",
                ExecutionParameters::default(),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, SubstrateError::NotConfigured(_)));
    }
}
