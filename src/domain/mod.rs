//! Domain layer for the story merge engine
//!
//! Story records, pair identifiers, configuration, and the LLM capability port.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
