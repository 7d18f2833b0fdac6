//! # Connectivity Monitor
//!
//! Observes the platform's network path and classifies it into a
//! [`ConnectivityState`]. This is the leaf the rest of the core reacts to:
//! the resilience controller recomputes health from it and the sync queue
//! replays on its back-online edge.
//!
//! ## Usage
//!
//! ```ignore
//! use core_connectivity::{ConnectivityMonitor, ConnectivityObserver};
//! use tokio_util::sync::CancellationToken;
//!
//! let monitor = Arc::new(ConnectivityMonitor::new(network_monitor, event_bus));
//! monitor.register_observer(queue_replayer);
//! let task = monitor.clone().spawn(CancellationToken::new());
//!
//! if monitor.handle().is_connected() { /* ... */ }
//! ```

pub mod error;
pub mod monitor;
pub mod state;

pub use error::{ConnectivityError, Result};
pub use monitor::{ConnectivityHandle, ConnectivityMonitor, ConnectivityObserver};
pub use state::{classify, ConnectivityState, InterfaceKind};
