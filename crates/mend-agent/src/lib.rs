//! # mend-agent
//!
//! Generation service client for the mend patch pipeline.
//!
//! This crate provides:
//! - Provider backends (Anthropic messages API, OpenAI-compatible chat completions)
//! - Circuit breaker for rate limit protection
//! - A response cache keyed by the exact (prompt, temperature) pair
//!
//! ## Key Pattern
//!
//! Identical prompts at identical temperatures never hit the network twice.
//! That gives the pipeline deterministic replay, and lets callers treat any
//! failure as "no proposal available" instead of retrying blindly.

mod auth;
mod backend;
mod cache;
mod circuit_breaker;
mod client;
mod types;

pub use auth::get_api_key;
pub use backend::{GenerationBackend, HttpBackend, MockBackend};
pub use cache::{CacheKey, ResponseCache};
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use client::GenerationClient;
pub use types::*;
