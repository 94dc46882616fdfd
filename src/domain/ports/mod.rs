pub mod llm_substrate;

pub use llm_substrate::{
    ExecutionParameters, LlmSubstrate, RequestPurpose, StopReason, SubstrateError,
    SubstrateRequest, SubstrateResponse, TokenUsage,
};
