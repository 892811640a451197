//! Error types for the Roborock integration

use ha_config_entries::SetupError;
use thiserror::Error;

use crate::api::ApiError;

/// Result type for Roborock operations
pub type RoborockResult<T> = Result<T, RoborockError>;

#[derive(Debug, Error)]
pub enum RoborockError {
    /// Entry data is missing a key or holds the wrong type
    #[error("invalid config entry: {0}")]
    InvalidEntry(String),

    /// A cloud call failed
    #[error("Roborock API error: {0}")]
    Api(#[from] ApiError),

    /// The blocking worker running a cloud call panicked or was cancelled
    #[error("worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl From<RoborockError> for SetupError {
    fn from(err: RoborockError) -> Self {
        SetupError::Failed(err.to_string())
    }
}
