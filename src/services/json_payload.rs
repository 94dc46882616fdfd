//! JSON extraction from model responses.
//!
//! Models often wrap their answer in a markdown code fence. Both Tier 2 and
//! Tier 3 parse responses through here.

use std::fmt;

use serde::de::DeserializeOwned;

use crate::domain::ports::SubstrateError;

const EXCERPT_CHARS: usize = 120;

/// The model answered, but not with the JSON we asked for.
#[derive(Debug, thiserror::Error)]
pub enum JsonExtractError {
    #[error("Response contained no JSON payload")]
    Empty,

    #[error("Malformed JSON payload ({source}): {excerpt}")]
    Malformed {
        #[source]
        source: serde_json::Error,
        excerpt: String,
    },

    #[error("JSON payload is missing required content: {0}")]
    Incomplete(String),
}

/// Why a model-backed tier had to fall back.
#[derive(Debug, thiserror::Error)]
pub enum CapabilityFailure {
    #[error("capability call failed: {0}")]
    Call(#[from] SubstrateError),

    #[error("unusable capability response: {0}")]
    Response(#[from] JsonExtractError),
}

impl CapabilityFailure {
    /// Short label for structured log fields.
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Call(_) => FailureKind::Call,
            Self::Response(_) => FailureKind::Response,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Call,
    Response,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Call => f.write_str("call_failed"),
            Self::Response => f.write_str("malformed_response"),
        }
    }
}

/// Strip a surrounding code fence, if any, and trim.
///
/// A ```` ```json ```` fence wins over a bare ```` ``` ```` fence. Without a
/// closing fence everything after the opening fence is taken.
pub fn strip_code_fence(text: &str) -> &str {
    if let Some(start) = text.find("```json") {
        let body = &text[start + "```json".len()..];
        return body.find("```").map_or(body, |end| &body[..end]).trim();
    }
    if let Some(start) = text.find("```") {
        let body = &text[start + 3..];
        return body.find("```").map_or(body, |end| &body[..end]).trim();
    }
    text.trim()
}

/// Extract and parse the JSON value in a model response.
pub fn extract_json_payload(text: &str) -> Result<serde_json::Value, JsonExtractError> {
    parse_json_payload(text)
}

/// Extract the JSON in a model response and deserialize it into `T`.
pub fn parse_json_payload<T: DeserializeOwned>(text: &str) -> Result<T, JsonExtractError> {
    let body = strip_code_fence(text);
    if body.is_empty() {
        return Err(JsonExtractError::Empty);
    }
    serde_json::from_str(body).map_err(|source| JsonExtractError::Malformed {
        source,
        excerpt: body.chars().take(EXCERPT_CHARS).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_extract_json_plain() {
        let value = extract_json_payload(r#"  {"analysis": "test"}  "#).unwrap();
        assert_eq!(value["analysis"], "test");
    }

    #[test]
    fn test_extract_json_code_block() {
        let input = "Here you go:\n```json\n{\"analysis\": \"test\"}\n```\nAnything else?";
        assert_eq!(strip_code_fence(input), r#"{"analysis": "test"}"#);
    }

    #[test]
    fn test_extract_json_bare_fence() {
        let input = "```\n[1, 2, 3]\n```";
        let value = extract_json_payload(input).unwrap();
        assert_eq!(value, serde_json::json!([1, 2, 3]));
    }

    #[test]
    fn test_json_fence_preferred_over_bare() {
        let input = "```\nnot this\n```\n```json\n{\"a\": 1}\n```";
        assert_eq!(strip_code_fence(input), r#"{"a": 1}"#);
    }

    #[test]
    fn test_unclosed_fence() {
        let input = "```json\n{\"a\": 1}";
        assert_eq!(strip_code_fence(input), r#"{"a": 1}"#);
    }

    #[test]
    fn test_empty_payload() {
        assert!(matches!(
            extract_json_payload("```json\n```"),
            Err(JsonExtractError::Empty)
        ));
        assert!(matches!(extract_json_payload("   "), Err(JsonExtractError::Empty)));
    }

    #[test]
    fn test_malformed_payload() {
        let err = extract_json_payload("I think they are duplicates").unwrap_err();
        match err {
            JsonExtractError::Malformed { excerpt, .. } => {
                assert_eq!(excerpt, "I think they are duplicates");
            }
            other => panic!("expected malformed, got {other:?}"),
        }
    }

    #[test]
    fn test_typed_parse() {
        #[derive(Deserialize)]
        struct Answer {
            ok: bool,
        }
        let answer: Answer = parse_json_payload("```json\n{\"ok\": true}\n```").unwrap();
        assert!(answer.ok);
    }

    #[test]
    fn test_failure_kind() {
        let call: CapabilityFailure = SubstrateError::EmptyResponse.into();
        assert_eq!(call.kind(), FailureKind::Call);
        let response: CapabilityFailure = JsonExtractError::Empty.into();
        assert_eq!(response.kind().to_string(), "malformed_response");
    }
}
