//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! This crate provides the capabilities the offline core needs when it runs
//! outside a mobile host:
//! - `HttpClient` using `reqwest` (one attempt per call; retry lives in the core)
//! - `FileSystemAccess` using `tokio::fs` with temp-file-and-rename writes
//! - `NetworkMonitor` using a periodic TCP reachability probe
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{DesktopNetworkMonitor, ReqwestHttpClient, TokioFileSystem};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let http_client = ReqwestHttpClient::new()?;
//!     let fs = TokioFileSystem::new();
//!     let network = DesktopNetworkMonitor::new();
//!
//!     // Use in core configuration
//!     Ok(())
//! }
//! ```

mod filesystem;
mod http;
mod network;

pub use filesystem::TokioFileSystem;
pub use http::ReqwestHttpClient;
pub use network::{DesktopNetworkMonitor, ProbeConfig};
