//! Error types for the extensions client.

use crate::config::ConfigError;
use crate::event::DecodeError;
use thiserror::Error;

/// Boxed error returned by event handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A specialised Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur while talking to the host APIs.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ClientError {
    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// HTTP request failed.
    #[error("HTTP request failed")]
    Http(#[from] reqwest::Error),

    /// Host returned a non-success status.
    #[error("host returned {status}: {body}")]
    Status {
        /// HTTP status code returned by the host.
        status: u16,
        /// Response body returned by the host.
        body: String,
    },

    /// The registration response body is not valid JSON.
    #[error("failed to decode register response")]
    RegisterResponse(#[source] serde_json::Error),

    /// The registration response carried no extension identifier.
    #[error("host returned no extension identifier (status {status})")]
    MissingExtensionId {
        /// HTTP status code of the registration response.
        status: u16,
    },

    /// An event payload could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The operation requires a successful registration first.
    #[error("extension is not registered")]
    NotRegistered,

    /// The extension already holds an identifier.
    #[error("extension is already registered")]
    AlreadyRegistered,

    /// The shutdown handler failed.
    #[error("shutdown handler failed")]
    ShutdownHandler(#[source] BoxError),

    /// The request was abandoned because cancellation was requested.
    #[error("operation cancelled")]
    Cancelled,
}

impl ClientError {
    pub(crate) fn status(status: reqwest::StatusCode, body: &[u8]) -> Self {
        Self::Status {
            status: status.as_u16(),
            body: String::from_utf8_lossy(body).into_owned(),
        }
    }

    /// Returns true for an event whose type this client does not know.
    pub fn is_unknown_event(&self) -> bool {
        matches!(self, ClientError::Decode(DecodeError::UnknownEventType(_)))
    }
}
