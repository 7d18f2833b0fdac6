//! # Core Configuration Module
//!
//! Provides configuration management for the offline core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds every injected capability and tuning knob. It enforces
//! fail-fast validation so a misconfigured core never starts.
//!
//! ## Required
//!
//! - `data_dir` - Root for cache entries, the queue file and offline content
//!
//! ## Capabilities (with platform defaults)
//!
//! - `HttpClient` - transport (desktop default: reqwest)
//! - `FileSystemAccess` - file I/O (desktop default: tokio fs)
//! - `NetworkMonitor` - path monitoring (desktop default: reachability probe)
//! - `Clock` - time source (default: system clock)
//!
//! Without the `desktop-shims` feature, a missing capability fails the build
//! with [`Error::CapabilityMissing`].
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, RetryPolicy};
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .data_dir("/path/to/app-data")
//!     .api_base_url("https://api.example.com")
//!     .retry(RetryPolicy::default().with_initial_delay(Duration::from_secs(1)))
//!     .cache_ttl_override("events", Duration::from_secs(30 * 60))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{Clock, FileSystemAccess, HttpClient, NetworkMonitor, SystemClock};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Bounded exponential backoff settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Wait after the first failed attempt
    pub initial_delay: Duration,
    /// Growth factor applied per further attempt
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Wait before the retry that follows failed attempt `attempt` (1-based):
    /// `initial_delay * multiplier^(attempt - 1)`, saturating at
    /// [`Duration::MAX`].
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        if self.initial_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config(
                "Retry policy needs at least one attempt".to_string(),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(Error::Config(format!(
                "Backoff multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }
}

/// Core configuration for the offline core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Root directory for all persisted state
    pub data_dir: PathBuf,

    pub http_client: Arc<dyn HttpClient>,
    pub file_system: Arc<dyn FileSystemAccess>,
    pub network_monitor: Arc<dyn NetworkMonitor>,
    pub clock: Arc<dyn Clock>,

    pub retry: RetryPolicy,
    /// Consecutive failures that flip health to degraded
    pub degraded_threshold: u32,
    /// How long `succeeded` stays visible before the retry state returns to idle
    pub success_settle_delay: Duration,

    /// Failed replays after which a queued operation is abandoned
    pub sync_max_retries: u32,
    /// Last-write-wins coalescing of queued operations per target
    pub coalesce_queued_operations: bool,
    /// Base URL for replayed mutations
    pub api_base_url: Option<String>,

    /// TTL overrides keyed by content type name ("events", "articles", ...)
    pub cache_ttl_overrides: HashMap<String, Duration>,
    /// How long a finished download's progress entry stays visible
    pub download_progress_linger: Duration,

    pub event_buffer_size: usize,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("data_dir", &self.data_dir)
            .field("http_client", &"HttpClient { ... }")
            .field("file_system", &"FileSystemAccess { ... }")
            .field("network_monitor", &"NetworkMonitor { ... }")
            .field("retry", &self.retry)
            .field("degraded_threshold", &self.degraded_threshold)
            .field("success_settle_delay", &self.success_settle_delay)
            .field("sync_max_retries", &self.sync_max_retries)
            .field("coalesce_queued_operations", &self.coalesce_queued_operations)
            .field("api_base_url", &self.api_base_url)
            .field("cache_ttl_overrides", &self.cache_ttl_overrides)
            .field("download_progress_linger", &self.download_progress_linger)
            .field("event_buffer_size", &self.event_buffer_size)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Directory holding one JSON file per cached content type.
    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    /// File holding the pending operation list.
    pub fn queue_path(&self) -> PathBuf {
        self.data_dir.join("sync_queue.json")
    }

    /// Directory tree for explicitly downloaded items.
    pub fn offline_dir(&self) -> PathBuf {
        self.data_dir.join("offline_content")
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Data directory is not empty
    /// - Retry policy allows at least one attempt and never shrinks delays
    /// - Thresholds and buffer sizes are at least 1
    /// - TTL overrides name a content type and are non-zero
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::Config("Data directory cannot be empty".to_string()));
        }

        self.retry.validate()?;

        if self.degraded_threshold == 0 {
            return Err(Error::Config(
                "Degraded threshold must be at least 1".to_string(),
            ));
        }

        if self.sync_max_retries == 0 {
            return Err(Error::Config(
                "Sync max retries must be at least 1".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be at least 1".to_string(),
            ));
        }

        if let Some(url) = &self.api_base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::Config(format!(
                    "API base URL must be http(s), got '{}'",
                    url
                )));
            }
        }

        for (content_type, ttl) in &self.cache_ttl_overrides {
            if content_type.trim().is_empty() {
                return Err(Error::Config(
                    "Cache TTL override needs a content type name".to_string(),
                ));
            }
            if ttl.is_zero() {
                return Err(Error::Config(format!(
                    "Cache TTL for '{}' must be non-zero",
                    content_type
                )));
            }
        }

        Ok(())
    }
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    data_dir: Option<PathBuf>,
    http_client: Option<Arc<dyn HttpClient>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    clock: Option<Arc<dyn Clock>>,
    retry: Option<RetryPolicy>,
    degraded_threshold: Option<u32>,
    success_settle_delay: Option<Duration>,
    sync_max_retries: Option<u32>,
    coalesce_queued_operations: bool,
    api_base_url: Option<String>,
    cache_ttl_overrides: HashMap<String, Duration>,
    download_progress_linger: Option<Duration>,
    event_buffer_size: Option<usize>,
}

impl CoreConfigBuilder {
    /// Sets the root directory for persisted state (required).
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder().data_dir("/path/to/app-data");
    /// ```
    pub fn data_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.data_dir = Some(path.into());
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    pub fn network_monitor(mut self, monitor: Arc<dyn NetworkMonitor>) -> Self {
        self.network_monitor = Some(monitor);
        self
    }

    /// Overrides the time source (tests inject a manual clock).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn degraded_threshold(mut self, threshold: u32) -> Self {
        self.degraded_threshold = Some(threshold);
        self
    }

    /// Zero disables the cosmetic pause after a success.
    pub fn success_settle_delay(mut self, delay: Duration) -> Self {
        self.success_settle_delay = Some(delay);
        self
    }

    pub fn sync_max_retries(mut self, max_retries: u32) -> Self {
        self.sync_max_retries = Some(max_retries);
        self
    }

    pub fn coalesce_queued_operations(mut self, enabled: bool) -> Self {
        self.coalesce_queued_operations = enabled;
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into().trim_end_matches('/').to_string());
        self
    }

    pub fn cache_ttl_override(mut self, content_type: impl Into<String>, ttl: Duration) -> Self {
        self.cache_ttl_overrides.insert(content_type.into(), ttl);
        self
    }

    pub fn download_progress_linger(mut self, linger: Duration) -> Self {
        self.download_progress_linger = Some(linger);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// Returns an error with an actionable message when the data directory or
    /// a capability is missing, or when a value fails validation.
    pub fn build(self) -> Result<CoreConfig> {
        let data_dir = self.data_dir.ok_or_else(|| {
            Error::Config("Data directory is required. Use .data_dir() to set it.".to_string())
        })?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let file_system = match self.file_system {
            Some(fs) => fs,
            None => provide_default_file_system(&data_dir)?,
        };

        let network_monitor = match self.network_monitor {
            Some(monitor) => monitor,
            None => provide_default_network_monitor()?,
        };

        let config = CoreConfig {
            data_dir,
            http_client,
            file_system,
            network_monitor,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            retry: self.retry.unwrap_or_default(),
            degraded_threshold: self.degraded_threshold.unwrap_or(3),
            success_settle_delay: self
                .success_settle_delay
                .unwrap_or(Duration::from_secs(1)),
            sync_max_retries: self.sync_max_retries.unwrap_or(3),
            coalesce_queued_operations: self.coalesce_queued_operations,
            api_base_url: self.api_base_url,
            cache_ttl_overrides: self.cache_ttl_overrides,
            download_progress_linger: self
                .download_progress_linger
                .unwrap_or(Duration::from_secs(3)),
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    let client = bridge_desktop::ReqwestHttpClient::new().map_err(|e| Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: format!("Default reqwest client could not be created: {}", e),
    })?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "HttpClient implementation is required for retries, replay and downloads. \
                  Desktop: enable the 'desktop-shims' feature to use ReqwestHttpClient. \
                  Mobile: inject the platform URL session."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system(data_dir: &std::path::Path) -> Result<Arc<dyn FileSystemAccess>> {
    Ok(Arc::new(bridge_desktop::TokioFileSystem::with_directories(
        data_dir.join("cache"),
        data_dir.to_path_buf(),
    )))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system(_data_dir: &std::path::Path) -> Result<Arc<dyn FileSystemAccess>> {
    Err(Error::CapabilityMissing {
        capability: "FileSystemAccess".to_string(),
        message: "FileSystemAccess implementation is required for the cache, queue and \
                  offline stores. Desktop: enable the 'desktop-shims' feature to use \
                  TokioFileSystem. Mobile: inject sandboxed app storage."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_network_monitor() -> Result<Arc<dyn NetworkMonitor>> {
    Ok(Arc::new(bridge_desktop::DesktopNetworkMonitor::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_network_monitor() -> Result<Arc<dyn NetworkMonitor>> {
    Err(Error::CapabilityMissing {
        capability: "NetworkMonitor".to_string(),
        message: "NetworkMonitor implementation is required to detect offline periods. \
                  Desktop: enable the 'desktop-shims' feature to use DesktopNetworkMonitor. \
                  Mobile: inject NWPathMonitor / ConnectivityManager."
            .to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{
        FileMetadata, HttpRequest, HttpResponse, NetworkChangeStream, NetworkInfo,
    };
    use bytes::Bytes;
    use std::path::Path;

    struct NullHttp;

    #[async_trait]
    impl HttpClient for NullHttp {
        async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
            Ok(HttpResponse::new(204, Bytes::new()))
        }
    }

    struct NullFs;

    #[async_trait]
    impl FileSystemAccess for NullFs {
        async fn get_cache_directory(&self) -> BridgeResult<PathBuf> {
            Ok(PathBuf::from("/tmp/cache"))
        }
        async fn get_data_directory(&self) -> BridgeResult<PathBuf> {
            Ok(PathBuf::from("/tmp/data"))
        }
        async fn exists(&self, _path: &Path) -> BridgeResult<bool> {
            Ok(false)
        }
        async fn metadata(&self, _path: &Path) -> BridgeResult<FileMetadata> {
            Ok(FileMetadata {
                size: 0,
                created_at: None,
                modified_at: None,
                is_directory: false,
            })
        }
        async fn create_dir_all(&self, _path: &Path) -> BridgeResult<()> {
            Ok(())
        }
        async fn read_file(&self, _path: &Path) -> BridgeResult<Bytes> {
            Ok(Bytes::new())
        }
        async fn write_file(&self, _path: &Path, _data: Bytes) -> BridgeResult<()> {
            Ok(())
        }
        async fn delete_file(&self, _path: &Path) -> BridgeResult<()> {
            Ok(())
        }
        async fn delete_dir_all(&self, _path: &Path) -> BridgeResult<()> {
            Ok(())
        }
        async fn list_directory(&self, _path: &Path) -> BridgeResult<Vec<PathBuf>> {
            Ok(Vec::new())
        }
    }

    struct StaticNetwork;

    #[async_trait]
    impl NetworkMonitor for StaticNetwork {
        async fn get_network_info(&self) -> BridgeResult<NetworkInfo> {
            Ok(NetworkInfo::disconnected())
        }
        async fn subscribe_changes(&self) -> BridgeResult<Box<dyn NetworkChangeStream>> {
            Err(bridge_traits::BridgeError::NotAvailable(
                "static network".to_string(),
            ))
        }
    }

    fn injected() -> CoreConfigBuilder {
        CoreConfig::builder()
            .data_dir("/tmp/offline-core")
            .http_client(Arc::new(NullHttp))
            .file_system(Arc::new(NullFs))
            .network_monitor(Arc::new(StaticNetwork))
    }

    #[test]
    fn test_defaults() {
        let config = injected().build().unwrap();

        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.degraded_threshold, 3);
        assert_eq!(config.success_settle_delay, Duration::from_secs(1));
        assert_eq!(config.sync_max_retries, 3);
        assert!(!config.coalesce_queued_operations);
        assert_eq!(config.download_progress_linger, Duration::from_secs(3));
        assert_eq!(config.event_buffer_size, DEFAULT_EVENT_BUFFER_SIZE);
        assert_eq!(config.queue_path(), PathBuf::from("/tmp/offline-core/sync_queue.json"));
    }

    #[test]
    fn test_backoff_delays_follow_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(8));

        let flat = policy.with_backoff_multiplier(1.0);
        assert_eq!(flat.backoff_delay(3), Duration::from_secs(2));
    }

    #[test]
    fn test_backoff_saturates_for_large_attempts() {
        let policy = RetryPolicy::default()
            .with_max_attempts(10_000)
            .with_backoff_multiplier(10.0);
        assert_eq!(policy.backoff_delay(400), Duration::MAX);
        assert_eq!(policy.backoff_delay(u32::MAX), Duration::MAX);

        let instant = policy.with_initial_delay(Duration::ZERO);
        assert_eq!(instant.backoff_delay(u32::MAX), Duration::ZERO);
    }

    #[test]
    fn test_builder_requires_data_dir() {
        let result = CoreConfig::builder()
            .http_client(Arc::new(NullHttp))
            .file_system(Arc::new(NullFs))
            .network_monitor(Arc::new(StaticNetwork))
            .build();

        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("data_dir")));
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_builder_requires_http_client_without_shims() {
        let result = CoreConfig::builder()
            .data_dir("/tmp/offline-core")
            .file_system(Arc::new(NullFs))
            .network_monitor(Arc::new(StaticNetwork))
            .build();

        assert!(matches!(
            result,
            Err(Error::CapabilityMissing { capability, .. }) if capability == "HttpClient"
        ));
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_build_with_desktop_defaults() {
        let config = CoreConfig::builder()
            .data_dir(std::env::temp_dir().join("offline-core-config-test"))
            .build()
            .unwrap();
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let result = injected()
            .retry(RetryPolicy::default().with_max_attempts(0))
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_shrinking_backoff() {
        let result = injected()
            .retry(RetryPolicy::default().with_backoff_multiplier(0.5))
            .build();
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("multiplier")));
    }

    #[test]
    fn test_validate_rejects_zero_thresholds() {
        assert!(injected().degraded_threshold(0).build().is_err());
        assert!(injected().sync_max_retries(0).build().is_err());
        assert!(injected().event_buffer_size(0).build().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_ttl_override() {
        let result = injected()
            .cache_ttl_override("events", Duration::ZERO)
            .build();
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("events")));
    }

    #[test]
    fn test_api_base_url_is_normalized_and_checked() {
        let config = injected()
            .api_base_url("https://api.example.com/")
            .build()
            .unwrap();
        assert_eq!(config.api_base_url.as_deref(), Some("https://api.example.com"));

        assert!(injected().api_base_url("ftp://example.com").build().is_err());
    }

    #[test]
    fn test_zero_settle_delay_is_allowed() {
        let config = injected()
            .success_settle_delay(Duration::ZERO)
            .build()
            .unwrap();
        assert!(config.success_settle_delay.is_zero());
    }
}
