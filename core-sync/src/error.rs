use bridge_traits::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Queue storage error: {0}")]
    Storage(#[from] BridgeError),

    #[error("Queue serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid operation ID: {0}")]
    InvalidOperationId(String),

    #[error("Invalid operation kind: {0}")]
    InvalidKind(String),

    #[error("API base URL is not configured")]
    MissingBaseUrl,
}

pub type Result<T> = std::result::Result<T, SyncError>;
