//! Error types shared across the configuration, trace-ingest, and
//! simulation-core surfaces.

/// Fatal error types (`ConfigError`, `TraceError`, `SimError`).
pub mod error;

pub use error::{ConfigError, SimError, TraceError};
