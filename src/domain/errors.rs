//! Domain error types
//!
//! The error hierarchy for Strata. Source and sink errors carry their own
//! transient/fatal classification so retry wrappers can decide without
//! inspecting third-party error types.

use thiserror::Error;

/// Main Strata error type
///
/// Wraps the stage-specific errors and provides context for the CLI boundary.
#[derive(Debug, Error)]
pub enum StrataError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Source adapter errors
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Sink (warehouse) errors
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// Database errors (generic)
    #[error("Database error: {0}")]
    Database(String),

    /// Pipeline orchestration errors
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Network/connection errors
    #[error("Connection error: {0}")]
    Connection(String),

    /// Checkpoint and failure store errors
    #[error("State management error: {0}")]
    State(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic errors with context
    #[error("{0}")]
    Other(String),
}

/// Errors raised by source adapters
///
/// `Transient` errors are retried by the retrying wrapper, `Fatal` errors
/// are not. `RetriesExhausted` is what a transient error becomes once the
/// attempt budget is spent.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// Temporary failure (timeouts, 5xx, dropped connections)
    #[error("Transient source error: {0}")]
    Transient(String),

    /// Non-recoverable failure (bad credentials, malformed payload, missing file)
    #[error("Fatal source error: {0}")]
    Fatal(String),

    /// Transient failures persisted past the retry budget
    #[error("Source retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl SourceError {
    /// Creates a transient error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Creates a fatal error
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Returns true when the operation may succeed if retried
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Errors raised while committing batches to the warehouse
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SinkError {
    /// Temporary failure (connection reset, serialization conflict, throttling)
    #[error("Transient sink error: {0}")]
    Transient(String),

    /// Non-recoverable failure (schema mismatch, constraint errors)
    #[error("Fatal sink error: {0}")]
    Fatal(String),

    /// Retryable commit results persisted past the retry budget
    #[error("Sink retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl SinkError {
    /// Creates a transient error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Creates a fatal error
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Returns true when the operation may succeed if retried
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

// Conversion from std::io::Error
impl From<std::io::Error> for StrataError {
    fn from(err: std::io::Error) -> Self {
        StrataError::Io(err.to_string())
    }
}

// Conversion from serde_json::Error
impl From<serde_json::Error> for StrataError {
    fn from(err: serde_json::Error) -> Self {
        StrataError::Serialization(err.to_string())
    }
}

// Conversion from toml parse errors
impl From<toml::de::Error> for StrataError {
    fn from(err: toml::de::Error) -> Self {
        StrataError::Configuration(format!("TOML parse error: {err}"))
    }
}
