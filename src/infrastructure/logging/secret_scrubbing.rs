//! Redaction of credentials before text reaches a log line or an error message.
//!
//! Upstream error bodies are echoed into [`SubstrateError`](crate::domain::ports::SubstrateError)
//! messages, and those end up in warnings. Anything key-shaped is replaced first.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static API_KEY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"sk-ant-[a-zA-Z0-9_-]{8,}").expect("valid api key pattern"));

static FIELD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(["']?(?:x-api-key|api_key|apikey|token|secret|password)["']?\s*[:=]\s*)["']?[^"'\s,}]+["']?"#)
        .expect("valid secret field pattern")
});

static BEARER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Bearer\s+[a-zA-Z0-9._-]+").expect("valid bearer pattern"));

/// Replace API keys, bearer tokens and secret-looking fields in `message`.
///
/// Borrows when nothing needed redacting.
pub fn scrub_secrets(message: &str) -> Cow<'_, str> {
    if !API_KEY_PATTERN.is_match(message)
        && !FIELD_PATTERN.is_match(message)
        && !BEARER_PATTERN.is_match(message)
    {
        return Cow::Borrowed(message);
    }

    let scrubbed = API_KEY_PATTERN.replace_all(message, "[API_KEY_REDACTED]");
    let scrubbed = BEARER_PATTERN.replace_all(&scrubbed, "Bearer [TOKEN_REDACTED]");
    let scrubbed = FIELD_PATTERN.replace_all(&scrubbed, |caps: &Captures<'_>| {
        format!("{}[REDACTED]", &caps[1])
    });
    Cow::Owned(scrubbed.into_owned())
}

/// Scrub a configured key out of `message` as well as the generic patterns.
///
/// Keys that do not follow the `sk-ant-` shape would otherwise slip through.
pub fn scrub_with_key(message: &str, key: Option<&str>) -> String {
    let scrubbed = scrub_secrets(message);
    match key {
        Some(key) if key.len() >= 8 && scrubbed.contains(key) => {
            scrubbed.replace(key, "[API_KEY_REDACTED]")
        }
        _ => scrubbed.into_owned(),
    }
}
