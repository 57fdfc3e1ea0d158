//! Logging and observability
//!
//! Structured logging via `tracing`, with console output and an optional
//! rotating JSON log file. The macros below keep the field names of the
//! most frequent pipeline events consistent.
//!
//! # Example
//!
//! ```no_run
//! use strata::logging::init_logging;
//! use strata::config::LoggingConfig;
//!
//! let config = LoggingConfig::default();
//! let _guard = init_logging("info", &config).expect("Failed to initialize logging");
//!
//! tracing::info!(source_id = "chr_herds", "Source started");
//! ```

pub mod structured;

pub use structured::{init_logging, LoggingGuard};

/// Log a committed batch
///
/// ```no_run
/// use strata::log_batch_committed;
///
/// log_batch_committed!("chr_herds", 4, 500, 2);
/// ```
#[macro_export]
macro_rules! log_batch_committed {
    ($source_id:expr, $sequence:expr, $rows:expr, $attempts:expr) => {
        tracing::info!(
            source_id = %$source_id,
            sequence = $sequence,
            rows = $rows,
            attempts = $attempts,
            "Batch committed"
        );
    };
}

/// Log a retry attempt
///
/// ```no_run
/// use strata::log_retry_attempt;
///
/// log_retry_attempt!("soap next", 2, 3, "HTTP 503");
/// ```
#[macro_export]
macro_rules! log_retry_attempt {
    ($operation:expr, $attempt:expr, $max_attempts:expr, $reason:expr) => {
        tracing::warn!(
            operation = %$operation,
            attempt = $attempt,
            max_attempts = $max_attempts,
            reason = %$reason,
            "Retrying operation"
        );
    };
}

/// Log a source that stopped with a fatal error
///
/// ```no_run
/// use strata::log_source_failed;
///
/// log_source_failed!("chr_herds", "Committing", "Fatal sink error: bad column");
/// ```
#[macro_export]
macro_rules! log_source_failed {
    ($source_id:expr, $state:expr, $error:expr) => {
        tracing::error!(
            source_id = %$source_id,
            state = %$state,
            error = %$error,
            "Source failed"
        );
    };
}
