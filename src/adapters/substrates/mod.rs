//! LLM substrate implementations.

pub mod anthropic_api;
pub mod scripted;

pub use anthropic_api::AnthropicApiSubstrate;
pub use scripted::{ScriptedReply, ScriptedSubstrate};
