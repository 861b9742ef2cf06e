//! Voicebridge signaling server
//!
//! HTTP endpoints for WebRTC offer/answer exchange and trickle ICE, plus one
//! bot task per accepted connection.

pub mod auth;
pub mod http;
pub mod metrics;
pub mod registry;
pub mod signaling;
pub mod state;

pub use auth::auth_middleware;
pub use http::create_router;
pub use metrics::{init_metrics, record_candidate_batch, record_offer};
pub use registry::{Connection, ConnectionRegistry};
pub use state::AppState;

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    /// Offer was not parseable or not an offer
    #[error("Invalid offer: {0}")]
    BadOffer(String),

    /// No live connection for the given id
    #[error("Unknown connection: {0}")]
    UnknownConnection(String),

    /// Connection capacity reached
    #[error("Server at capacity")]
    Capacity,

    #[error("Authentication error: {0}")]
    Auth(String),

    /// Pipeline stage could not be built (missing credentials etc)
    #[error("Pipeline setup failed: {0}")]
    PipelineSetup(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ServerError> for axum::http::StatusCode {
    fn from(err: ServerError) -> Self {
        Self::from(&err)
    }
}

impl From<&ServerError> for axum::http::StatusCode {
    fn from(err: &ServerError) -> Self {
        match err {
            ServerError::BadOffer(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::UnknownConnection(_) => axum::http::StatusCode::NOT_FOUND,
            ServerError::Capacity => axum::http::StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Auth(_) => axum::http::StatusCode::UNAUTHORIZED,
            ServerError::PipelineSetup(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Internal(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            StatusCode::from(ServerError::BadOffer("not an offer".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            StatusCode::from(ServerError::UnknownConnection("abc".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            StatusCode::from(ServerError::Capacity),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            StatusCode::from(ServerError::PipelineSetup("no key".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
