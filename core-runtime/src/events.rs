//! # Event Bus System
//!
//! Provides the observable surface of the offline core using `tokio::sync::broadcast`.
//! Components publish typed events; UI layers and the service façade subscribe
//! without any component knowing who listens.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: One enum per component, wrapped by [`CoreEvent`]
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Wrapper for consuming events with filtering
//!
//! Events describe transitions. Components that own a piece of current state
//! (connectivity, health, retry progress) additionally expose it through a
//! `tokio::sync::watch` receiver, so late subscribers can read the latest value
//! without replaying history.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   emit    ┌───────────┐
//! │ Connectivity ├──────────>│           │
//! └──────────────┘           │           │
//! ┌──────────────┐   emit    │ EventBus  │   subscribe   ┌────────────┐
//! │ Resilience   ├──────────>│ (broadcast├──────────────>│ Subscriber │
//! └──────────────┘           │  channel) │               └────────────┘
//! ┌──────────────┐   emit    │           │   subscribe   ┌────────────┐
//! │ Sync/Offline ├──────────>│           ├──────────────>│ Subscriber │
//! └──────────────┘           └───────────┘               └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Sync(SyncEvent::ReplayStarted { pending_count: 2 }))
//!     .ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert!(matches!(event, CoreEvent::Sync(_)));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   Non-fatal; the subscriber continues with newer events.
//! - **`RecvError::Closed`**: All senders have been dropped. Treat as shutdown.
//!
//! `emit` fails only when nobody is subscribed. Publishers ignore that case.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Network path transitions
    Connectivity(ConnectivityEvent),
    /// Process-wide health changes
    Health(HealthEvent),
    /// Progress of one resilient operation
    Retry(RetryEvent),
    /// Pending mutation queue activity
    Sync(SyncEvent),
    /// Explicit offline downloads
    Offline(OfflineEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Connectivity(e) => e.description(),
            CoreEvent::Health(e) => e.description(),
            CoreEvent::Retry(e) => e.description(),
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Offline(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Health(HealthEvent::Changed { status, .. }) => match status {
                HealthStatus::Healthy => EventSeverity::Info,
                HealthStatus::Degraded | HealthStatus::Offline => EventSeverity::Warning,
                HealthStatus::Error => EventSeverity::Error,
            },
            CoreEvent::Sync(SyncEvent::OperationsAbandoned { .. }) => EventSeverity::Warning,
            CoreEvent::Offline(OfflineEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Connectivity(ConnectivityEvent::BackOnline) => EventSeverity::Info,
            CoreEvent::Sync(SyncEvent::ReplayCompleted { .. }) => EventSeverity::Info,
            CoreEvent::Offline(OfflineEvent::Completed { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Connectivity Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ConnectivityEvent {
    /// Reachability flipped.
    Changed {
        is_connected: bool,
        /// Classified interface: "wifi", "cellular", "wired" or "unknown"
        interface: String,
        is_expensive: bool,
        is_constrained: bool,
    },
    /// Reachability went from disconnected to connected.
    BackOnline,
}

impl ConnectivityEvent {
    fn description(&self) -> &str {
        match self {
            ConnectivityEvent::Changed {
                is_connected: true, ..
            } => "Network reachable",
            ConnectivityEvent::Changed { .. } => "Network unreachable",
            ConnectivityEvent::BackOnline => "Back online",
        }
    }
}

// ============================================================================
// Health Events
// ============================================================================

/// Discriminant of the health state, carried on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Offline,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum HealthEvent {
    Changed {
        status: HealthStatus,
        /// Degraded reason or error message
        message: Option<String>,
    },
}

impl HealthEvent {
    fn description(&self) -> &str {
        match self {
            HealthEvent::Changed {
                status: HealthStatus::Healthy,
                ..
            } => "Service healthy",
            HealthEvent::Changed {
                status: HealthStatus::Degraded,
                ..
            } => "Service degraded",
            HealthEvent::Changed {
                status: HealthStatus::Offline,
                ..
            } => "Offline",
            HealthEvent::Changed {
                status: HealthStatus::Error,
                ..
            } => "Service error",
        }
    }
}

// ============================================================================
// Retry Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum RetryEvent {
    StateChanged {
        /// Caller-supplied label of the operation, e.g. "load events"
        context: String,
        /// UI text for the new state; `None` when idle
        status_message: Option<String>,
    },
}

impl RetryEvent {
    fn description(&self) -> &str {
        match self {
            RetryEvent::StateChanged { .. } => "Retry state changed",
        }
    }
}

// ============================================================================
// Sync Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A mutation was persisted for later replay.
    Enqueued {
        operation_id: String,
        kind: String,
        pending_count: usize,
    },
    /// A replay pass began.
    ReplayStarted { pending_count: usize },
    /// A replay pass finished and the queue was persisted.
    ReplayCompleted {
        succeeded: usize,
        retained: usize,
        abandoned: usize,
        pending_count: usize,
    },
    /// Some operations exhausted their retry budget and were dropped.
    OperationsAbandoned { operation_ids: Vec<String> },
    /// The queue was emptied without replay.
    Cleared { dropped: usize },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Enqueued { .. } => "Operation queued",
            SyncEvent::ReplayStarted { .. } => "Replay started",
            SyncEvent::ReplayCompleted { .. } => "Replay completed",
            SyncEvent::OperationsAbandoned { .. } => "Some operations could not sync",
            SyncEvent::Cleared { .. } => "Queue cleared",
        }
    }
}

// ============================================================================
// Offline Content Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum OfflineEvent {
    /// Download progress for one item, in `0.0..=1.0`.
    Progress { item_id: i64, progress: f32 },
    Completed {
        item_id: i64,
        file_size_bytes: u64,
        total_storage_used: u64,
    },
    Failed { item_id: i64, message: String },
    Removed {
        item_id: i64,
        total_storage_used: u64,
    },
    Cleared,
}

impl OfflineEvent {
    fn description(&self) -> &str {
        match self {
            OfflineEvent::Progress { .. } => "Download progress",
            OfflineEvent::Completed { .. } => "Download completed",
            OfflineEvent::Failed { .. } => "Download failed",
            OfflineEvent::Removed { .. } => "Offline item removed",
            OfflineEvent::Cleared => "Offline content cleared",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to core events.
///
/// Cloning is cheap: every clone publishes into the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// A subscriber that falls behind by more than `capacity` events receives
    /// `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// when there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let sync_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Sync(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without waiting.
    ///
    /// Returns `None` if no matching events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
