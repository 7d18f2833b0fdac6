use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Connectivity error: {0}")]
    Connectivity(#[from] core_connectivity::ConnectivityError),

    #[error("Cache error: {0}")]
    Cache(#[from] core_cache::CacheError),

    #[error("Sync error: {0}")]
    Sync(#[from] core_sync::SyncError),

    #[error("Offline content error: {0}")]
    Offline(#[from] core_offline::OfflineError),

    #[error("Core has been shut down")]
    ShutDown,
}

pub type Result<T> = std::result::Result<T, CoreError>;
