//! Error types for Sanchaya

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Sanchaya error types.
///
/// Only configuration and startup errors surface through this type. Runtime
/// problems on the ingest path (evictions, stale samples, engine failures)
/// are logged and counted instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error (config file, thread spawn)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Stream name not present in the configuration
    #[error("Unknown stream: {0}")]
    UnknownStream(String),

    /// Failed to spawn a worker thread
    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        /// Thread name
        name: String,
        /// Underlying OS error
        source: std::io::Error,
    },
}

/// Failure reported by a mapping engine call.
///
/// The sample that caused it is dropped and never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Camera intrinsics are unusable
    #[error("Invalid intrinsics: {0}")]
    InvalidIntrinsics(String),

    /// Payload dimensions disagree with its metadata
    #[error("Dimension mismatch: expected {expected} values, got {actual}")]
    DimensionMismatch {
        /// Expected number of values
        expected: usize,
        /// Actual number of values
        actual: usize,
    },

    /// Payload carried nothing to integrate
    #[error("Empty input")]
    EmptyInput,

    /// Engine specific failure
    #[error("{0}")]
    Other(String),
}
