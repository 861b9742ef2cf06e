//! Pipeline errors

use thiserror::Error;

/// Errors from pipeline stages
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Missing or invalid stage configuration; fatal, reject the connection
    #[error("Pipeline setup failed: {0}")]
    Setup(String),

    /// Service returned a non-success status
    #[error("Service error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Per-call deadline exceeded
    #[error("Service call timed out after {0}s")]
    Timeout(u64),
}

impl PipelineError {
    /// Transient failures are reported in-band and the turn loop recovers;
    /// everything else tears the session down.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Setup(_) => false,
            PipelineError::Api(_)
            | PipelineError::Network(_)
            | PipelineError::InvalidResponse(_)
            | PipelineError::Timeout(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_errors_are_fatal() {
        assert!(!PipelineError::Setup("no key".into()).is_transient());
        assert!(PipelineError::Timeout(30).is_transient());
        assert!(PipelineError::Api("HTTP 500".into()).is_transient());
    }
}
