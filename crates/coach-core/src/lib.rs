//! Coach core crate - configuration, error taxonomy, and shared domain types.
//!
//! Everything here is consumed by the pipeline, model, API, and app crates.

pub mod config;
pub mod error;
pub mod types;
