//! Core service façade.
//!
//! [`OfflineCore`] builds every component from one [`CoreConfig`] and wires
//! them together:
//!
//! - connectivity transitions feed the resilience controller's health state
//! - each back-online edge replays the sync queue
//! - queued operations are sent through the resilience controller's retry loop
//!
//! Desktop hosts enable `desktop-shims` so the config builder can fall back to
//! the `bridge-desktop` capabilities. Mobile hosts inject their own.
//!
//! ```ignore
//! let config = CoreConfig::builder()
//!     .data_dir(app_data_dir)
//!     .api_base_url("https://api.example.com/v1")
//!     .build()?;
//!
//! let core = OfflineCore::new(config)?;
//! core.start().await?;
//!
//! let mut health = core.resilience().subscribe_health();
//! core.sync_queue().enqueue_for_target(OperationKind::AddFavorite, 42).await?;
//!
//! core.shutdown().await;
//! ```

pub mod error;

pub use error::{CoreError, Result};

pub use core_cache::{CacheStore, ContentType, Freshness};
pub use core_connectivity::{ConnectivityHandle, ConnectivityMonitor, ConnectivityState};
pub use core_offline::{OfflineContentStore, OfflineItem};
pub use core_resilience::{ApiError, HealthState, ResilienceController, RetryState};
pub use core_runtime::{CoreConfig, CoreEvent, EventBus};
pub use core_sync::{OperationExecutor, OperationKind, SyncQueue};

use core_runtime::events::Receiver;
use core_sync::{HttpOperationExecutor, ReplayOnReconnect, SyncError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Every component of the offline core, built from one configuration.
pub struct OfflineCore {
    config: CoreConfig,
    event_bus: EventBus,
    connectivity: Arc<ConnectivityMonitor>,
    cache: Arc<CacheStore>,
    resilience: Arc<ResilienceController>,
    sync_queue: Arc<SyncQueue>,
    offline: Arc<OfflineContentStore>,
    started: AtomicBool,
    cancel: CancellationToken,
    monitor_task: Mutex<Option<JoinHandle<core_connectivity::Result<()>>>>,
}

impl OfflineCore {
    /// Builds the core with the REST operation executor.
    ///
    /// Fails with [`SyncError::MissingBaseUrl`] when `api_base_url` is not
    /// configured; use [`with_executor`](Self::with_executor) instead then.
    pub fn new(config: CoreConfig) -> Result<Self> {
        let event_bus = EventBus::new(config.event_buffer_size);
        let resilience = Arc::new(ResilienceController::from_config(
            &config,
            event_bus.clone(),
        ));
        let executor = Arc::new(
            HttpOperationExecutor::from_config(&config)?.with_resilience(resilience.clone()),
        );
        Self::assemble(config, event_bus, resilience, executor)
    }

    /// Builds the core with a host-provided executor for queued operations.
    pub fn with_executor(
        config: CoreConfig,
        executor: Arc<dyn OperationExecutor>,
    ) -> Result<Self> {
        let event_bus = EventBus::new(config.event_buffer_size);
        let resilience = Arc::new(ResilienceController::from_config(
            &config,
            event_bus.clone(),
        ));
        Self::assemble(config, event_bus, resilience, executor)
    }

    fn assemble(
        config: CoreConfig,
        event_bus: EventBus,
        resilience: Arc<ResilienceController>,
        executor: Arc<dyn OperationExecutor>,
    ) -> Result<Self> {
        let connectivity = Arc::new(ConnectivityMonitor::new(
            config.network_monitor.clone(),
            event_bus.clone(),
        ));
        let cache = Arc::new(CacheStore::from_config(&config)?);
        let sync_queue = Arc::new(
            SyncQueue::from_config(&config, executor, event_bus.clone())
                .with_connectivity(connectivity.handle()),
        );
        let offline = Arc::new(OfflineContentStore::from_config(&config, event_bus.clone()));

        // Health must see a transition before the replay it triggers.
        connectivity.register_observer(resilience.clone());
        connectivity.register_observer(Arc::new(ReplayOnReconnect::new(sync_queue.clone())));

        Ok(Self {
            config,
            event_bus,
            connectivity,
            cache,
            resilience,
            sync_queue,
            offline,
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            monitor_task: Mutex::new(None),
        })
    }

    /// Loads persisted state and starts the connectivity monitor.
    ///
    /// An unreadable cache index or queue file is logged and the component
    /// starts empty. Calling `start` again is a no-op.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(CoreError::ShutDown);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Offline core already started");
            return Ok(());
        }

        if let Err(e) = self.cache.initialize().await {
            warn!(error = %e, "Cache index unavailable, starting empty");
        }
        match self.sync_queue.initialize().await {
            Ok(()) => {}
            Err(SyncError::Serialization(e)) => {
                warn!(error = %e, "Sync queue file unreadable, starting empty")
            }
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        }
        if let Err(e) = self.offline.initialize().await {
            self.started.store(false, Ordering::SeqCst);
            return Err(e.into());
        }

        let task = self.connectivity.clone().spawn(self.cancel.child_token());
        *self.monitor_task.lock() = Some(task);

        info!(
            pending_operations = self.sync_queue.pending_count(),
            offline_items = self.offline.downloaded_ids().len(),
            "Offline core started"
        );
        Ok(())
    }

    /// Stops the connectivity monitor and waits for it to exit.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.monitor_task.lock().take();
        if let Some(task) = task {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Connectivity monitor stopped with error"),
                Err(e) => warn!(error = %e, "Connectivity monitor task failed"),
            }
        }
        info!("Offline core shut down");
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn subscribe_events(&self) -> Receiver<CoreEvent> {
        self.event_bus.subscribe()
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    pub fn connectivity_handle(&self) -> ConnectivityHandle {
        self.connectivity.handle()
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn resilience(&self) -> &Arc<ResilienceController> {
        &self.resilience
    }

    pub fn sync_queue(&self) -> &Arc<SyncQueue> {
        &self.sync_queue
    }

    pub fn offline_content(&self) -> &Arc<OfflineContentStore> {
        &self.offline
    }
}

impl Drop for OfflineCore {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::testing::{ChannelNetworkMonitor, MemoryFileSystem};
    use bridge_traits::{
        FileSystemAccess, HttpClient, HttpRequest, HttpResponse, ManualClock, NetworkInfo,
    };
    use bytes::Bytes;
    use core_runtime::config::CoreConfigBuilder;
    use mockall::mock;

    mock! {
        HttpClient {}

        #[async_trait::async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        }
    }

    fn builder(fs: Arc<MemoryFileSystem>) -> CoreConfigBuilder {
        let (network, _controller) = ChannelNetworkMonitor::new(NetworkInfo::connected(vec![bridge_traits::network::NetworkType::WiFi]));
        CoreConfig::builder()
            .data_dir("/data")
            .http_client(Arc::new(MockHttpClient::new()))
            .file_system(fs)
            .network_monitor(Arc::new(network))
            .clock(Arc::new(ManualClock::default()))
    }

    #[test]
    fn test_rest_executor_needs_base_url() {
        let config = builder(Arc::new(MemoryFileSystem::new("/data")))
            .build()
            .unwrap();

        let err = OfflineCore::new(config).err().unwrap();
        assert!(matches!(err, CoreError::Sync(SyncError::MissingBaseUrl)));
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_shutdown_is_final() {
        let config = builder(Arc::new(MemoryFileSystem::new("/data")))
            .api_base_url("https://api.example.com")
            .build()
            .unwrap();
        let core = OfflineCore::new(config).unwrap();

        core.start().await.unwrap();
        core.start().await.unwrap();
        assert!(core.is_running());

        core.shutdown().await;
        assert!(!core.is_running());
        assert!(matches!(core.start().await, Err(CoreError::ShutDown)));
    }

    #[tokio::test]
    async fn test_corrupt_queue_file_starts_empty() {
        let fs = Arc::new(MemoryFileSystem::new("/data"));
        fs.write_file(
            std::path::Path::new("/data/sync_queue.json"),
            Bytes::from_static(b"[{ broken"),
        )
        .await
        .unwrap();
        let config = builder(fs)
            .api_base_url("https://api.example.com")
            .build()
            .unwrap();
        let core = OfflineCore::new(config).unwrap();

        core.start().await.unwrap();

        assert_eq!(core.sync_queue().pending_count(), 0);
        core.shutdown().await;
    }
}
