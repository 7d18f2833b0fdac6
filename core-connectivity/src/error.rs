use bridge_traits::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectivityError {
    #[error("Network monitor failed: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Connectivity monitor is already running")]
    AlreadyRunning,
}

pub type Result<T> = std::result::Result<T, ConnectivityError>;
