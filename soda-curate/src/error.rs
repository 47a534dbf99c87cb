//! Error types for soda-curate
//!
//! Errors are grouped by how the pipeline reacts to them:
//! - transient service errors are retried with backoff
//! - malformed responses and timeouts count as failed attempts
//! - invalid geometry is fatal to the figure that produced it

use thiserror::Error;

/// Result alias used throughout the curation core
pub type CurationResult<T> = std::result::Result<T, CurationError>;

/// Curation error type
#[derive(Debug, Error)]
pub enum CurationError {
    /// AI output failed strict validation at the service boundary
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Detector produced NaN, infinite or inverted coordinates
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Detection model failure or undecodable image
    #[error("Detector error: {0}")]
    Detector(String),

    /// Completion service failure that retrying will not fix
    #[error("Completion service error: {0}")]
    Completion(String),

    /// Completion service asked us to slow down
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Network-level failure talking to a collaborator
    #[error("Transport error: {0}")]
    Transport(String),

    /// Attempt exceeded its time budget (milliseconds)
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid caller input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// soda-common error
    #[error("Common error: {0}")]
    Common(#[from] soda_common::Error),

    /// Image decoding/encoding error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CurationError {
    /// Whether the error is worth retrying with backoff inside one attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, CurationError::RateLimited(_) | CurationError::Transport(_))
    }

    /// Whether the error invalidates the whole figure rather than one stage
    pub fn is_fatal_to_figure(&self) -> bool {
        matches!(self, CurationError::InvalidGeometry(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(CurationError::RateLimited("429".into()).is_transient());
        assert!(CurationError::Transport("reset".into()).is_transient());
        assert!(!CurationError::Timeout(100).is_transient());
        assert!(!CurationError::MalformedResponse("x".into()).is_transient());
    }

    #[test]
    fn test_only_geometry_is_fatal() {
        assert!(CurationError::InvalidGeometry("NaN".into()).is_fatal_to_figure());
        assert!(!CurationError::Detector("corrupt".into()).is_fatal_to_figure());
    }

    #[test]
    fn test_common_error_conversion() {
        let err: CurationError = soda_common::Error::Config("bad".into()).into();
        assert!(err.to_string().contains("bad"));
    }
}
