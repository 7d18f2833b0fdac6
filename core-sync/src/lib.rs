//! # Sync Queue
//!
//! Records user mutations (favorites, event registrations) that could not be
//! sent, persists them, and replays them once the device is back online.
//!
//! ## Components
//!
//! - [`SyncQueue`]: the ordered, durable list and its replay loop
//! - [`QueueStore`]: where the list lives ([`FileQueueStore`] by default)
//! - [`OperationExecutor`]: how one operation reaches the server
//!   ([`HttpOperationExecutor`] by default)
//! - [`ReplayOnReconnect`]: connectivity observer that triggers replay
//!
//! ## Usage
//!
//! ```ignore
//! let executor = Arc::new(HttpOperationExecutor::from_config(&config)?.with_resilience(controller));
//! let queue = Arc::new(
//!     SyncQueue::from_config(&config, executor, event_bus).with_connectivity(monitor.handle()),
//! );
//! queue.initialize().await?;
//! monitor.register_observer(Arc::new(ReplayOnReconnect::new(queue.clone())));
//!
//! // Favorite failed to send:
//! queue.enqueue_for_target(OperationKind::AddFavorite, 42).await?;
//! ```

pub mod error;
pub mod executor;
pub mod operation;
pub mod queue;
pub mod store;

pub use error::{Result, SyncError};
pub use executor::{HttpOperationExecutor, OperationExecutor};
pub use operation::{OperationFamily, OperationId, OperationKind, PendingOperation, TARGET_ID_KEY};
pub use queue::{
    ReplayOnReconnect, ReplayOutcome, ReplayReport, SkipReason, SyncQueue, DEFAULT_MAX_RETRIES,
};
pub use store::{FileQueueStore, LoadedQueue, MemoryQueueStore, QueueStore};
