//! Scripted substrate for tests and offline demos.
//!
//! Answers come from three places, checked in order: routing rules keyed on a
//! substring of the prompt, a FIFO queue, and a default reply. Every request is
//! recorded so tests can inspect what the pipeline sent.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::ports::{
    LlmSubstrate, RequestPurpose, StopReason, SubstrateError, SubstrateRequest, SubstrateResponse,
    TokenUsage,
};

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Failure(SubstrateError),
}

impl ScriptedReply {
    pub fn text(output: impl Into<String>) -> Self {
        Self::Text(output.into())
    }

    pub fn failure(error: SubstrateError) -> Self {
        Self::Failure(error)
    }
}

#[derive(Debug, Clone)]
struct Rule {
    purpose: Option<RequestPurpose>,
    needle: String,
    reply: ScriptedReply,
}

/// Substrate that replays canned answers.
pub struct ScriptedSubstrate {
    model_id: String,
    rules: Vec<Rule>,
    queue: Arc<RwLock<VecDeque<ScriptedReply>>>,
    default_reply: Option<ScriptedReply>,
    requests: Arc<RwLock<Vec<SubstrateRequest>>>,
}

impl ScriptedSubstrate {
    pub fn new() -> Self {
        Self {
            model_id: "scripted-model".to_string(),
            rules: Vec::new(),
            queue: Arc::new(RwLock::new(VecDeque::new())),
            default_reply: None,
            requests: Arc::new(RwLock::new(Vec::new())),
        }
    }

    #[must_use]
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// Answer any request whose prompt contains `needle`.
    #[must_use]
    pub fn respond_when(mut self, needle: impl Into<String>, reply: ScriptedReply) -> Self {
        self.rules.push(Rule {
            purpose: None,
            needle: needle.into(),
            reply,
        });
        self
    }

    /// Answer requests of one purpose whose prompt contains `needle`.
    #[must_use]
    pub fn respond_to(
        mut self,
        purpose: RequestPurpose,
        needle: impl Into<String>,
        reply: ScriptedReply,
    ) -> Self {
        self.rules.push(Rule {
            purpose: Some(purpose),
            needle: needle.into(),
            reply,
        });
        self
    }

    /// Reply used when no rule matches and the queue is empty.
    #[must_use]
    pub fn with_default_reply(mut self, reply: ScriptedReply) -> Self {
        self.default_reply = Some(reply);
        self
    }

    /// Append a reply to the FIFO queue.
    pub async fn push_reply(&self, reply: ScriptedReply) {
        self.queue.write().await.push_back(reply);
    }

    /// Every request received so far, in arrival order.
    pub async fn requests(&self) -> Vec<SubstrateRequest> {
        self.requests.read().await.clone()
    }

    pub async fn request_count(&self) -> usize {
        self.requests.read().await.len()
    }

    /// Requests received for one purpose.
    pub async fn requests_for(&self, purpose: RequestPurpose) -> Vec<SubstrateRequest> {
        self.requests
            .read()
            .await
            .iter()
            .filter(|r| r.purpose == purpose)
            .cloned()
            .collect()
    }

    async fn next_reply(&self, request: &SubstrateRequest) -> Option<ScriptedReply> {
        let routed = self.rules.iter().find(|rule| {
            rule.purpose.map_or(true, |p| p == request.purpose)
                && request.prompt.contains(&rule.needle)
        });
        if let Some(rule) = routed {
            return Some(rule.reply.clone());
        }
        if let Some(queued) = self.queue.write().await.pop_front() {
            return Some(queued);
        }
        self.default_reply.clone()
    }
}

impl Default for ScriptedSubstrate {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmSubstrate for ScriptedSubstrate {
    fn substrate_id(&self) -> &'static str {
        "scripted"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn execute(&self, request: SubstrateRequest) -> Result<SubstrateResponse, SubstrateError> {
        self.requests.write().await.push(request.clone());

        match self.next_reply(&request).await {
            Some(ScriptedReply::Text(content)) => Ok(SubstrateResponse {
                request_id: request.request_id,
                stop_reason: StopReason::EndTurn,
                usage: Some(TokenUsage {
                    input_tokens: u32::try_from(request.prompt.len()).unwrap_or(u32::MAX),
                    output_tokens: u32::try_from(content.len()).unwrap_or(u32::MAX),
                }),
                content,
            }),
            Some(ScriptedReply::Failure(error)) => Err(error),
            None => Err(SubstrateError::Unavailable(
                "no scripted reply left".to_string(),
            )),
        }
    }
}
