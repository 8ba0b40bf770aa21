//! # MetricFlow Domain
//!
//! Shared vocabulary for the MetricFlow engine.
//!
//! This crate contains:
//! - The engine-wide error type and `Result` alias
//! - The serde configuration model
//! - Metric kind and overflow policy enums
//! - Defaults and well-known names
//!
//! ## Architecture
//! - No dependencies on other MetricFlow crates
//! - Only external dependencies allowed
//! - Pure data types; no I/O and no async runtime

pub mod config;
pub mod constants;
pub mod errors;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
