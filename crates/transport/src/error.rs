//! Transport errors

use thiserror::Error;

/// Errors from the WebRTC session layer
#[derive(Error, Debug)]
pub enum TransportError {
    /// The remote SDP could not be parsed or applied
    #[error("Bad session description: {0}")]
    BadDescription(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Media error: {0}")]
    Media(String),

    /// The event data channel is not open yet (or any more)
    #[error("Event channel not open")]
    ChannelNotOpen,

    #[error("Session closed")]
    SessionClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}
