//! Error types for the Floodgate limiter core.

use thiserror::Error;

/// Main error type for Floodgate operations.
///
/// An error always means the evaluation did not complete; it is never a
/// substitute for a denial. A denial is a successful evaluation with a
/// negative [`Decision`](crate::ratelimit::Decision).
#[derive(Error, Debug)]
pub enum FloodgateError {
    /// The policy was rejected before any store round-trip was made.
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    /// The counter store could not complete the evaluation, either
    /// immediately or after the configured retries.
    #[error("Counter store unavailable: {0}")]
    StoreUnavailable(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Floodgate operations.
pub type Result<T> = std::result::Result<T, FloodgateError>;
