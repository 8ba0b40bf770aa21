//! Shared HTTP plumbing for the push-based sinks.

pub mod client;

pub use client::{HttpClient, HttpClientBuilder};
