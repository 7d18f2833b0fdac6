use bridge_traits::BridgeError;
use core_resilience::ApiError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OfflineError {
    #[error("Offline storage error: {0}")]
    Storage(#[from] BridgeError),

    #[error("Record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Item lookup failed: {0}")]
    Fetch(#[from] ApiError),

    #[error("Download cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, OfflineError>;
