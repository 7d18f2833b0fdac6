//! Connectivity monitor: turns raw path snapshots into [`ConnectivityState`]
//! transitions and delivers them to observers.

use crate::error::{ConnectivityError, Result};
use crate::state::ConnectivityState;
use async_trait::async_trait;
use bridge_traits::{NetworkInfo, NetworkMonitor};
use core_runtime::events::{ConnectivityEvent, CoreEvent, EventBus};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Receives reachability transitions.
///
/// All callbacks run one after another on the monitor's delivery task, so an
/// observer never races another observer or itself.
#[async_trait]
pub trait ConnectivityObserver: Send + Sync {
    /// Called with the first snapshot and then whenever `is_connected` flips.
    async fn on_connectivity_change(&self, _state: ConnectivityState) {}

    /// Called on a disconnected to connected edge, after `on_connectivity_change`.
    async fn on_back_online(&self) {}
}

/// Cheap, clonable read side of the monitor.
#[derive(Debug, Clone)]
pub struct ConnectivityHandle {
    receiver: watch::Receiver<ConnectivityState>,
}

impl ConnectivityHandle {
    pub fn from_receiver(receiver: watch::Receiver<ConnectivityState>) -> Self {
        Self { receiver }
    }

    pub fn current(&self) -> ConnectivityState {
        *self.receiver.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.receiver.borrow().is_connected
    }

    /// Waits for the next state change and returns the new state.
    ///
    /// Returns `None` once the monitor is dropped.
    pub async fn changed(&mut self) -> Option<ConnectivityState> {
        self.receiver.changed().await.ok()?;
        Some(*self.receiver.borrow_and_update())
    }
}

pub struct ConnectivityMonitor {
    network: Arc<dyn NetworkMonitor>,
    event_bus: EventBus,
    state_tx: watch::Sender<ConnectivityState>,
    observers: RwLock<Vec<Arc<dyn ConnectivityObserver>>>,
    running: AtomicBool,
    /// Set once the first snapshot has been delivered.
    initialized: AtomicBool,
}

impl ConnectivityMonitor {
    pub fn new(network: Arc<dyn NetworkMonitor>, event_bus: EventBus) -> Self {
        let (state_tx, _) = watch::channel(ConnectivityState::offline());
        Self {
            network,
            event_bus,
            state_tx,
            observers: RwLock::new(Vec::new()),
            running: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn handle(&self) -> ConnectivityHandle {
        ConnectivityHandle::from_receiver(self.state_tx.subscribe())
    }

    pub fn current(&self) -> ConnectivityState {
        *self.state_tx.borrow()
    }

    pub fn register_observer(&self, observer: Arc<dyn ConnectivityObserver>) {
        self.observers.write().push(observer);
    }

    /// Spawns [`run`](Self::run) on the current runtime.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Consumes the platform's change stream until it closes or `cancel` fires.
    ///
    /// This is the single delivery task: every observer callback is awaited
    /// here, in order. A second concurrent call fails with
    /// [`ConnectivityError::AlreadyRunning`].
    #[instrument(skip(self, cancel))]
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ConnectivityError::AlreadyRunning);
        }

        let result = self.run_inner(cancel).await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn run_inner(&self, cancel: CancellationToken) -> Result<()> {
        match self.network.get_network_info().await {
            Ok(info) => self.apply(info).await,
            Err(e) => warn!(error = %e, "Initial network snapshot unavailable"),
        }

        let mut changes = self.network.subscribe_changes().await?;
        info!("Connectivity monitor started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Connectivity monitor cancelled");
                    return Ok(());
                }
                next = changes.next() => match next {
                    Some(info) => self.apply(info).await,
                    None => {
                        info!("Network change stream closed");
                        return Ok(());
                    }
                },
            }
        }
    }

    async fn apply(&self, info: NetworkInfo) {
        let next = ConnectivityState::from_network_info(&info);
        let previous = self.state_tx.send_replace(next);
        // The first snapshot is always delivered so observers learn the
        // starting reachability, even when it matches the offline default.
        let first = !self.initialized.swap(true, Ordering::SeqCst);
        if previous == next && !first {
            debug!("Network snapshot unchanged");
            return;
        }

        info!(
            is_connected = next.is_connected,
            interface = %next.interface_kind,
            is_expensive = next.is_expensive,
            is_constrained = next.is_constrained,
            "Connectivity changed"
        );
        self.event_bus
            .emit(CoreEvent::Connectivity(ConnectivityEvent::Changed {
                is_connected: next.is_connected,
                interface: next.interface_kind.to_string(),
                is_expensive: next.is_expensive,
                is_constrained: next.is_constrained,
            }))
            .ok();

        if previous.is_connected == next.is_connected && !first {
            return;
        }

        let back_online = next.is_connected && !previous.is_connected;
        if back_online {
            self.event_bus
                .emit(CoreEvent::Connectivity(ConnectivityEvent::BackOnline))
                .ok();
        }

        let observers = self.observers.read().clone();
        for observer in &observers {
            observer.on_connectivity_change(next).await;
        }
        if back_online {
            info!(observers = observers.len(), "Back online");
            for observer in &observers {
                observer.on_back_online().await;
            }
        }
    }
}
