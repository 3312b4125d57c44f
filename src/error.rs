// Error handling module
// Defines datastore and load-test error types

use thiserror::Error;

/// Errors raised while talking to the datastore
#[derive(Error, Debug)]
pub enum DatastoreError {
    /// The backend does not support the requested query feature
    #[error("Unsupported query feature: {0}")]
    Unsupported(String),

    /// Error response from the Datastore API
    #[error("Datastore API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    /// Transport-level failure (connect, timeout, body)
    #[error("Transport error ({kind}): {message}")]
    Transport { kind: String, message: String },

    /// Entity or response payload could not be decoded
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Errors raised by the load-test driver
#[derive(Error, Debug)]
pub enum LoadTestError {
    /// Rejected before any work starts
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// CSV export failed
    #[error("Export error: {0}")]
    Export(#[from] std::io::Error),
}

/// Result type alias for datastore operations
pub type Result<T> = std::result::Result<T, DatastoreError>;
