//! Infrastructure layer module
//!
//! Configuration loading and logging setup. The HTTP-facing capability
//! adapters live in [`crate::adapters`].

pub mod config;
pub mod logging;
