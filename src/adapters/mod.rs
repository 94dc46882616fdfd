//! Adapters for external systems.

pub mod substrates;
