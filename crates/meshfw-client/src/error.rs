//! Error types for the registry HTTP client.

use thiserror::Error;

/// Errors that can occur when talking to the registry or a peer service.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Failed to build the underlying HTTP client.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// HTTP request failed.
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Server returned an invalid or unparseable response.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The requested record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Server returned a non-success status.
    #[error("Server error ({status}): {message}")]
    ServerError {
        /// HTTP status code.
        status: u16,
        /// Error message from server.
        message: String,
    },
}
