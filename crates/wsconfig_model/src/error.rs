//! Error types for model decoding.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors that can occur while decoding a configuration response.
#[derive(Error, Debug)]
pub enum ModelError {
    /// The response body is not valid JSON for the model.
    #[error("failed to decode workspace configs: {0}")]
    Decode(#[from] serde_json::Error),
}
