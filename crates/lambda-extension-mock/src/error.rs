//! Error types for the mock host.

use thiserror::Error;

/// Errors that can occur while starting or running the mock host.
#[derive(Error, Debug)]
pub enum MockError {
    /// Error binding to the specified address.
    #[error("Failed to bind to address: {0}")]
    BindError(String),

    /// Error serving HTTP.
    #[error("Server error: {0}")]
    Server(String),
}

/// Result type for mock host operations.
pub type MockResult<T> = Result<T, MockError>;
