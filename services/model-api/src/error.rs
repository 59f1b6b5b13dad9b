//! Request-level error taxonomy.
//!
//! The serving process never dies over a model problem: availability errors
//! map to 503, load and scoring faults stay scoped to the request that hit
//! them.

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServeError {
    /// Neither local disk nor the remote store produced the artifact.
    #[error("model artifact unavailable: {0}")]
    ArtifactUnavailable(String),
    /// The artifact resolved but could not be turned into a servable
    /// pipeline. The previous registry state is left untouched.
    #[error("model load failed: {0}")]
    LoadFailed(String),
    /// No model could be obtained at prediction time.
    #[error("Model not available")]
    ModelUnavailable,
    /// The loaded model rejected the shaped input at inference time.
    #[error("scoring failed: {0}")]
    Scoring(String),
}

impl ServeError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServeError::ArtifactUnavailable(_) | ServeError::ModelUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ServeError::LoadFailed(_) | ServeError::Scoring(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}
