//! Persistence of the ordered operation list.

use crate::error::Result;
use crate::operation::PendingOperation;
use async_trait::async_trait;
use bridge_traits::FileSystemAccess;
use bytes::Bytes;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of reading the stored queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedQueue {
    /// Readable operations in insertion order.
    pub operations: Vec<PendingOperation>,
    /// Ids (or `#index` when no id was readable) of stored entries that could
    /// not be decoded and were left out.
    pub discarded: Vec<String>,
}

impl LoadedQueue {
    pub fn intact(operations: Vec<PendingOperation>) -> Self {
        Self {
            operations,
            discarded: Vec::new(),
        }
    }
}

/// Storage for the whole queue.
///
/// `save` replaces the stored list in one step. A reader never sees a list
/// that is half old and half new.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Stored list in insertion order. Empty when nothing was saved yet.
    ///
    /// An undecodable entry is reported in [`LoadedQueue::discarded`] and
    /// does not affect the others.
    async fn load(&self) -> Result<LoadedQueue>;

    async fn save(&self, operations: &[PendingOperation]) -> Result<()>;
}

/// One JSON array in one file, written through the atomic
/// [`FileSystemAccess::write_file`].
pub struct FileQueueStore {
    fs: Arc<dyn FileSystemAccess>,
    path: PathBuf,
}

impl FileQueueStore {
    pub fn new(fs: Arc<dyn FileSystemAccess>, path: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl QueueStore for FileQueueStore {
    async fn load(&self) -> Result<LoadedQueue> {
        let bytes = match self.fs.read_file(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Ok(LoadedQueue::default()),
            Err(e) => return Err(e.into()),
        };

        // Only a file that is not a JSON array at all is an error.
        let entries: Vec<serde_json::Value> = serde_json::from_slice(&bytes)?;
        let mut loaded = LoadedQueue::default();
        for (index, entry) in entries.into_iter().enumerate() {
            let label = entry
                .get("id")
                .and_then(serde_json::Value::as_str)
                .map_or_else(|| format!("#{}", index), str::to_string);
            match serde_json::from_value::<PendingOperation>(entry) {
                Ok(operation) => loaded.operations.push(operation),
                Err(e) => {
                    warn!(entry = %label, error = %e, "Discarding unreadable queued operation");
                    loaded.discarded.push(label);
                }
            }
        }
        Ok(loaded)
    }

    async fn save(&self, operations: &[PendingOperation]) -> Result<()> {
        let bytes = Bytes::from(serde_json::to_vec(operations)?);
        self.fs.write_file(&self.path, bytes).await?;
        debug!(count = operations.len(), "Queue persisted");
        Ok(())
    }
}

/// Volatile store for hosts without a writable disk, and for tests.
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    operations: Mutex<Vec<PendingOperation>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn load(&self) -> Result<LoadedQueue> {
        Ok(LoadedQueue::intact(self.operations.lock().clone()))
    }

    async fn save(&self, operations: &[PendingOperation]) -> Result<()> {
        *self.operations.lock() = operations.to_vec();
        Ok(())
    }
}
