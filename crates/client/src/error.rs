//! Client errors

use thiserror::Error;

/// Errors from the signaling client
#[derive(Error, Debug)]
pub enum ClientError {
    /// Microphone or capture device unavailable
    #[error("Media access failed: {0}")]
    MediaAccess(String),

    /// Signaling endpoint returned a non-success status
    #[error("Signaling error: {0}")]
    Signaling(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Bad server response: {0}")]
    InvalidResponse(String),

    /// Client already disconnected
    #[error("Connection closed")]
    Closed,
}
