//! Error types for turnstile.

use thiserror::Error;

/// Main error type for turnstile operations.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors, raised at construction time only
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The wait context was cancelled before every limiter granted a token
    #[error("Wait cancelled")]
    Cancelled,

    /// The wait context's deadline passed before every limiter granted a token
    #[error("Wait deadline exceeded")]
    DeadlineExceeded,

    /// A sweep is already running against this store
    #[error("Sweep already running")]
    SweepAlreadyRunning,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
