//! Envelope error types.

use thiserror::Error;

/// Errors raised while parsing or serializing wire frames.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The frame was not valid JSON or did not match any known shape.
    #[error("invalid frame JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// A required field was absent or empty.
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// Result type for envelope operations.
pub type Result<T> = std::result::Result<T, EnvelopeError>;
