//! Lead acquisition and scoring pipeline.
//!
//! Discovers property-management professionals from pluggable sources,
//! normalizes and deduplicates them, scores them against a weighted rubric
//! refined by a language model, and returns a ranked, exportable list.
//!
//! # Modules
//!
//! - `adapters`: Source adapters and per-fetch network contexts.
//! - `circuit_breaker`: Breaker guarding language-model calls.
//! - `config`: Configuration management.
//! - `errors`: Error handling types.
//! - `export`: Flattened CSV/JSON export.
//! - `fetch_policy`: Retry, backoff, timeout and rate limiting for outbound requests.
//! - `handlers`: HTTP request handlers.
//! - `models`: Core data models.
//! - `normalizer`: Raw record to lead mapping and dedup keys.
//! - `pipeline`: Run orchestration.
//! - `rate_limiter`: Rolling-window per-identity limiter.
//! - `scoring`: Rule-based and model-assisted scoring.

pub mod adapters;
pub mod circuit_breaker;
pub mod config;
pub mod errors;
pub mod export;
pub mod fetch_policy;
pub mod handlers;
pub mod models;
pub mod normalizer;
pub mod pipeline;
pub mod rate_limiter;
pub mod scoring;
