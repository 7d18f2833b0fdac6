//! # Sync Queue
//!
//! Durable FIFO of user mutations that could not reach the server, replayed
//! when connectivity returns.
//!
//! ## Guarantees
//!
//! - `enqueue` returns only after the new list is persisted.
//! - Every change to the list is a single [`QueueStore::save`]; a replay never
//!   persists half of its outcome.
//! - Replay runs operations in insertion order and at most one replay runs at
//!   a time.
//! - An operation that fails `max_retries` replays is abandoned. An operation
//!   with an unusable payload is dropped on its first replay.
//!
//! No lock is held while an operation executes. Operations enqueued during a
//! replay are kept and picked up by the next one.

use crate::error::Result;
use crate::executor::OperationExecutor;
use crate::operation::{OperationId, OperationKind, PendingOperation};
use crate::store::{FileQueueStore, QueueStore};
use async_trait::async_trait;
use bridge_traits::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use core_connectivity::{ConnectivityHandle, ConnectivityObserver};
use core_resilience::ApiError;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use core_runtime::logging::redact_if_sensitive;
use core_runtime::CoreConfig;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Default replay budget per operation.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Why a replay did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Empty,
    Offline,
    InProgress,
}

/// Summary of one replay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub succeeded: usize,
    /// Failed but still within budget.
    pub retained: usize,
    /// Failed for the last time and removed.
    pub abandoned: Vec<OperationId>,
    /// Removed because they could never be sent.
    pub invalid: Vec<OperationId>,
    /// Left untouched because connectivity dropped mid-replay.
    pub deferred: usize,
    pub pending_count: usize,
}

impl ReplayReport {
    pub fn is_fully_successful(&self) -> bool {
        self.retained == 0 && self.abandoned.is_empty() && self.invalid.is_empty()
    }

    fn dropped_ids(&self) -> Vec<String> {
        self.abandoned
            .iter()
            .chain(self.invalid.iter())
            .map(ToString::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
    Completed(ReplayReport),
    Skipped(SkipReason),
}

impl ReplayOutcome {
    pub fn report(&self) -> Option<&ReplayReport> {
        match self {
            ReplayOutcome::Completed(report) => Some(report),
            ReplayOutcome::Skipped(_) => None,
        }
    }
}

/// Clears the in-progress flag however the replay ends.
struct ReplayGuard<'a>(&'a AtomicBool);

impl Drop for ReplayGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct SyncQueue {
    store: Arc<dyn QueueStore>,
    executor: Arc<dyn OperationExecutor>,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
    connectivity: Option<ConnectivityHandle>,
    max_retries: u32,
    coalesce: bool,
    operations: Mutex<Vec<PendingOperation>>,
    /// Serializes list changes together with their write.
    persist_lock: tokio::sync::Mutex<()>,
    replaying: AtomicBool,
    sync_failures: AtomicBool,
}

impl SyncQueue {
    pub fn new(
        store: Arc<dyn QueueStore>,
        executor: Arc<dyn OperationExecutor>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            store,
            executor,
            event_bus,
            clock: Arc::new(SystemClock),
            connectivity: None,
            max_retries: DEFAULT_MAX_RETRIES,
            coalesce: false,
            operations: Mutex::new(Vec::new()),
            persist_lock: tokio::sync::Mutex::new(()),
            replaying: AtomicBool::new(false),
            sync_failures: AtomicBool::new(false),
        }
    }

    /// File-backed queue at `config.queue_path()` with the configured retry
    /// budget and coalescing.
    pub fn from_config(
        config: &CoreConfig,
        executor: Arc<dyn OperationExecutor>,
        event_bus: EventBus,
    ) -> Self {
        let store = Arc::new(FileQueueStore::new(
            config.file_system.clone(),
            config.queue_path(),
        ));
        Self::new(store, executor, event_bus)
            .with_clock(config.clock.clone())
            .with_max_retries(config.sync_max_retries)
            .with_coalescing(config.coalesce_queued_operations)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Keeps only the latest operation per (kind family, target id).
    pub fn with_coalescing(mut self, enabled: bool) -> Self {
        self.coalesce = enabled;
        self
    }

    /// Makes replay a no-op while the handle reports offline.
    pub fn with_connectivity(mut self, handle: ConnectivityHandle) -> Self {
        self.connectivity = Some(handle);
        self
    }

    /// Loads the persisted list, replacing whatever is in memory.
    ///
    /// Stored entries that cannot be decoded are dropped, reported as
    /// abandoned, and the cleaned list is written back.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        let loaded = self.store.load().await?;

        if !loaded.discarded.is_empty() {
            if let Err(e) = self.store.save(&loaded.operations).await {
                warn!(error = %e, "Could not rewrite queue without unreadable entries");
            }
            warn!(
                discarded = loaded.discarded.len(),
                "Unreadable queued operations abandoned"
            );
            self.sync_failures.store(true, Ordering::SeqCst);
            self.event_bus
                .emit(CoreEvent::Sync(SyncEvent::OperationsAbandoned {
                    operation_ids: loaded.discarded.clone(),
                }))
                .ok();
        }

        info!(
            pending = loaded.operations.len(),
            discarded = loaded.discarded.len(),
            "Sync queue loaded"
        );
        *self.operations.lock() = loaded.operations;
        Ok(())
    }

    /// Appends a new operation and persists the list before returning.
    #[instrument(skip(self, payload))]
    pub async fn enqueue(
        &self,
        kind: OperationKind,
        payload: HashMap<String, String>,
    ) -> Result<OperationId> {
        let operation = PendingOperation::new(kind, payload, self.clock.now());
        self.push(operation).await
    }

    /// Enqueues `{ "id": target_id }`.
    pub async fn enqueue_for_target(&self, kind: OperationKind, target_id: i64) -> Result<OperationId> {
        let operation = PendingOperation::for_target(kind, target_id, self.clock.now());
        self.push(operation).await
    }

    async fn push(&self, operation: PendingOperation) -> Result<OperationId> {
        let id = operation.id;
        let kind = operation.kind;
        let fields: Vec<String> = operation
            .payload
            .iter()
            .map(|(key, value)| format!("{}={}", key, redact_if_sensitive(key, value)))
            .collect();
        let coalesce_key = operation.coalesce_key().filter(|_| self.coalesce);

        let (pending_count, superseded) = self
            .commit(|operations| {
                let before = operations.len();
                if let Some(key) = coalesce_key {
                    operations.retain(|existing| existing.coalesce_key() != Some(key));
                }
                let superseded = before - operations.len();
                operations.push(operation);
                (operations.len(), superseded)
            })
            .await?;

        info!(
            operation_id = %id,
            kind = %kind,
            payload = ?fields,
            superseded,
            pending = pending_count,
            "Operation queued"
        );
        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::Enqueued {
                operation_id: id.to_string(),
                kind: kind.to_string(),
                pending_count,
            }))
            .ok();
        Ok(id)
    }

    /// Applies `change` to a copy of the list, persists the copy and only
    /// then makes it current.
    async fn commit<R>(&self, change: impl FnOnce(&mut Vec<PendingOperation>) -> R) -> Result<R> {
        let _guard = self.persist_lock.lock().await;
        let mut next = self.operations.lock().clone();
        let out = change(&mut next);
        self.store.save(&next).await?;
        *self.operations.lock() = next;
        Ok(out)
    }

    /// Replays every pending operation in insertion order.
    ///
    /// Skipped when the queue is empty, when offline, or when another replay
    /// is running. Execution failures never surface here; they only move
    /// retry counters. The `Err` case is a failure to persist the outcome, in
    /// which case the stored list is left as it was.
    #[instrument(skip(self))]
    pub async fn replay_all(&self) -> Result<ReplayOutcome> {
        if self.pending_count() == 0 {
            debug!("Replay skipped: queue empty");
            return Ok(ReplayOutcome::Skipped(SkipReason::Empty));
        }
        if !self.is_online() {
            debug!("Replay skipped: offline");
            return Ok(ReplayOutcome::Skipped(SkipReason::Offline));
        }
        if self.replaying.swap(true, Ordering::SeqCst) {
            debug!("Replay skipped: already running");
            return Ok(ReplayOutcome::Skipped(SkipReason::InProgress));
        }
        let _replay = ReplayGuard(&self.replaying);

        let snapshot = self.pending_operations();
        info!(pending = snapshot.len(), "Replay started");
        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::ReplayStarted {
                pending_count: snapshot.len(),
            }))
            .ok();

        let mut report = ReplayReport::default();
        let mut removed: HashSet<OperationId> = HashSet::new();
        let mut updated: HashMap<OperationId, u32> = HashMap::new();

        for (index, operation) in snapshot.iter().enumerate() {
            if !self.is_online() {
                report.deferred = snapshot.len() - index;
                warn!(deferred = report.deferred, "Connectivity lost during replay");
                break;
            }

            match self.executor.execute(operation).await {
                Ok(()) => {
                    debug!(operation_id = %operation.id, kind = %operation.kind, "Operation replayed");
                    report.succeeded += 1;
                    removed.insert(operation.id);
                }
                Err(ApiError::InvalidState(reason)) => {
                    warn!(operation_id = %operation.id, reason = %reason, "Dropping invalid operation");
                    report.invalid.push(operation.id);
                    removed.insert(operation.id);
                }
                Err(e) => {
                    let mut failed = operation.clone();
                    if failed.record_failure(self.max_retries) {
                        warn!(
                            operation_id = %operation.id,
                            kind = %operation.kind,
                            attempts = failed.retry_count,
                            error = %e,
                            "Operation abandoned"
                        );
                        report.abandoned.push(operation.id);
                        removed.insert(operation.id);
                    } else {
                        debug!(
                            operation_id = %operation.id,
                            retry_count = failed.retry_count,
                            error = %e,
                            "Operation kept for next replay"
                        );
                        report.retained += 1;
                        updated.insert(operation.id, failed.retry_count);
                    }
                }
            }
        }

        let persisted = self
            .commit(|operations| {
                operations.retain(|op| !removed.contains(&op.id));
                for op in operations.iter_mut() {
                    if let Some(retry_count) = updated.get(&op.id) {
                        op.retry_count = *retry_count;
                    }
                }
                operations.len()
            })
            .await;

        report.pending_count = match persisted {
            Ok(pending_count) => pending_count,
            Err(e) => {
                error!(error = %e, "Failed to persist replay outcome");
                return Err(e);
            }
        };

        self.finish_replay(&report);
        Ok(ReplayOutcome::Completed(report))
    }

    fn finish_replay(&self, report: &ReplayReport) {
        let dropped = report.dropped_ids();
        if !dropped.is_empty() {
            self.sync_failures.store(true, Ordering::SeqCst);
            warn!(count = dropped.len(), "Some operations could not sync");
            self.event_bus
                .emit(CoreEvent::Sync(SyncEvent::OperationsAbandoned {
                    operation_ids: dropped.clone(),
                }))
                .ok();
        } else if report.is_fully_successful() && report.deferred == 0 {
            self.sync_failures.store(false, Ordering::SeqCst);
        }

        info!(
            succeeded = report.succeeded,
            retained = report.retained,
            abandoned = dropped.len(),
            deferred = report.deferred,
            pending = report.pending_count,
            "Replay completed"
        );
        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::ReplayCompleted {
                succeeded: report.succeeded,
                retained: report.retained,
                abandoned: dropped.len(),
                pending_count: report.pending_count,
            }))
            .ok();
    }

    fn is_online(&self) -> bool {
        self.connectivity
            .as_ref()
            .map_or(true, ConnectivityHandle::is_connected)
    }

    /// Snapshot in insertion order.
    pub fn pending_operations(&self) -> Vec<PendingOperation> {
        self.operations.lock().clone()
    }

    pub fn pending_count(&self) -> usize {
        self.operations.lock().len()
    }

    pub fn oldest_pending_at(&self) -> Option<DateTime<Utc>> {
        self.operations.lock().first().map(|op| op.created_at)
    }

    /// Set when a replay had to give up on some operation.
    pub fn has_sync_failures(&self) -> bool {
        self.sync_failures.load(Ordering::SeqCst)
    }

    pub fn is_replaying(&self) -> bool {
        self.replaying.load(Ordering::SeqCst)
    }

    /// Drops every pending operation without replaying it.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<usize> {
        let dropped = self
            .commit(|operations| {
                let dropped = operations.len();
                operations.clear();
                dropped
            })
            .await?;
        self.sync_failures.store(false, Ordering::SeqCst);

        info!(dropped, "Sync queue cleared");
        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::Cleared { dropped }))
            .ok();
        Ok(dropped)
    }
}

/// Starts a replay on every back-online edge.
///
/// The replay runs on its own task so the connectivity delivery task is not
/// held up by backoff waits.
pub struct ReplayOnReconnect {
    queue: Arc<SyncQueue>,
}

impl ReplayOnReconnect {
    pub fn new(queue: Arc<SyncQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl ConnectivityObserver for ReplayOnReconnect {
    async fn on_back_online(&self) {
        let queue = self.queue.clone();
        tokio::spawn(async move {
            if let Err(e) = queue.replay_all().await {
                error!(error = %e, "Replay after reconnect failed");
            }
        });
    }
}
