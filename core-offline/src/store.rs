//! # Offline Content Store
//!
//! Explicit, user-requested downloads of full records plus their image.
//!
//! ## Layout
//!
//! ```text
//! {offline_dir}/
//!   metadata.json        [OfflineContentMetadata]
//!   {item_id}/
//!     record.json
//!     image.{ext}        optional
//! ```
//!
//! ## Download phases
//!
//! | Phase                      | Progress after |
//! |----------------------------|----------------|
//! | write record               | 0.3            |
//! | fetch and write image      | 0.8            |
//! | write metadata             | 1.0            |
//!
//! A failed image fetch is logged and the item is stored without an image.
//! Any other failure, or cancellation, removes the item directory and leaves
//! the metadata untouched. [`OfflineContentStore::remove`] and
//! [`OfflineContentStore::clear_all`] cancel running downloads of the items
//! they delete.

use crate::error::{OfflineError, Result};
use crate::item::{ItemFetcher, OfflineItem};
use crate::metadata::{DownloadProgress, DownloadStatus, MetadataIndex, OfflineContentMetadata};
use bridge_traits::{Clock, FileSystemAccess, HttpClient, HttpRequest};
use bytes::Bytes;
use core_resilience::ApiError;
use core_runtime::events::{CoreEvent, EventBus, OfflineEvent};
use core_runtime::logging::strip_path;
use core_runtime::CoreConfig;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

const METADATA_FILE: &str = "metadata.json";
const RECORD_FILE: &str = "record.json";
const IMAGE_STEM: &str = "image";
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "heic"];

const PROGRESS_RECORD: f32 = 0.3;
const PROGRESS_IMAGE: f32 = 0.8;
const PROGRESS_DONE: f32 = 1.0;

/// Default time a completed progress entry stays visible.
pub const DEFAULT_PROGRESS_LINGER: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded(OfflineContentMetadata),
    /// Already stored; nothing was fetched.
    AlreadyAvailable,
    /// Another download of the same item is running.
    InProgress,
}

/// Result of [`OfflineContentStore::download_all_favorites`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub downloaded: Vec<i64>,
    pub skipped: Vec<i64>,
    pub failed: Vec<(i64, String)>,
}

/// Removes the item from the in-flight map when the download ends.
struct InFlight<'a> {
    map: &'a Mutex<HashMap<i64, CancellationToken>>,
    item_id: i64,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.map.lock().remove(&self.item_id);
    }
}

pub struct OfflineContentStore {
    fs: Arc<dyn FileSystemAccess>,
    http: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
    dir: PathBuf,
    progress_linger: Duration,
    index: RwLock<MetadataIndex>,
    progress: Arc<RwLock<HashMap<i64, DownloadProgress>>>,
    /// Running downloads and the token that aborts each one.
    in_flight: Mutex<HashMap<i64, CancellationToken>>,
    /// One metadata write at a time.
    write_lock: tokio::sync::Mutex<()>,
}

impl OfflineContentStore {
    pub fn new(
        fs: Arc<dyn FileSystemAccess>,
        http: Arc<dyn HttpClient>,
        clock: Arc<dyn Clock>,
        event_bus: EventBus,
        dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            fs,
            http,
            clock,
            event_bus,
            dir: dir.into(),
            progress_linger: DEFAULT_PROGRESS_LINGER,
            index: RwLock::new(MetadataIndex::default()),
            progress: Arc::new(RwLock::new(HashMap::new())),
            in_flight: Mutex::new(HashMap::new()),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn from_config(config: &CoreConfig, event_bus: EventBus) -> Self {
        Self::new(
            config.file_system.clone(),
            config.http_client.clone(),
            config.clock.clone(),
            event_bus,
            config.offline_dir(),
        )
        .with_progress_linger(config.download_progress_linger)
    }

    pub fn with_progress_linger(mut self, linger: Duration) -> Self {
        self.progress_linger = linger;
        self
    }

    fn item_dir(&self, item_id: i64) -> PathBuf {
        self.dir.join(item_id.to_string())
    }

    fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    /// Loads the metadata index.
    ///
    /// When the index file is missing or unreadable but item directories
    /// exist, entries are rebuilt from the directories and their sizes.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<()> {
        self.fs.create_dir_all(&self.dir).await?;

        let loaded = match self.fs.read_file(&self.metadata_path()).await {
            Ok(bytes) => match serde_json::from_slice::<Vec<OfflineContentMetadata>>(&bytes) {
                Ok(entries) => Some(MetadataIndex::from_entries(entries)),
                Err(e) => {
                    warn!(error = %e, "Offline metadata unreadable, rebuilding");
                    None
                }
            },
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };

        let index = match loaded {
            Some(index) => index,
            None => {
                let rebuilt = self.rebuild_index().await?;
                if !rebuilt.is_empty() {
                    self.persist(&rebuilt).await?;
                }
                rebuilt
            }
        };

        info!(
            items = index.len(),
            total_storage_used = index.total_storage_used(),
            "Offline content store initialized"
        );
        *self.index.write() = index;
        Ok(())
    }

    async fn rebuild_index(&self) -> Result<MetadataIndex> {
        let mut entries = Vec::new();
        for path in self.fs.list_directory(&self.dir).await? {
            let Some(item_id) = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.parse::<i64>().ok())
            else {
                continue;
            };
            if !self.fs.exists(&path.join(RECORD_FILE)).await? {
                debug!(item_id, "Skipping directory without record");
                continue;
            }

            let image_file_name = self
                .fs
                .list_directory(&path)
                .await?
                .into_iter()
                .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
                .find(|name| name.starts_with(IMAGE_STEM));

            entries.push(OfflineContentMetadata {
                item_id,
                downloaded_at: self.clock.now(),
                file_size_bytes: self.fs.directory_size(&path).await?,
                image_file_name,
            });
        }

        if !entries.is_empty() {
            info!(items = entries.len(), "Rebuilt offline metadata from directories");
        }
        Ok(MetadataIndex::from_entries(entries))
    }

    async fn persist(&self, index: &MetadataIndex) -> Result<()> {
        let bytes = Bytes::from(serde_json::to_vec(&index.to_vec())?);
        self.fs.write_file(&self.metadata_path(), bytes).await?;
        Ok(())
    }

    pub fn is_available_offline(&self, item_id: i64) -> bool {
        self.index.read().contains(item_id)
    }

    pub fn metadata(&self, item_id: i64) -> Option<OfflineContentMetadata> {
        self.index.read().get(item_id).cloned()
    }

    /// Downloaded item ids, ascending.
    pub fn downloaded_ids(&self) -> Vec<i64> {
        self.index.read().ids()
    }

    pub fn all_metadata(&self) -> Vec<OfflineContentMetadata> {
        self.index.read().to_vec()
    }

    pub fn total_storage_used(&self) -> u64 {
        self.index.read().total_storage_used()
    }

    pub fn progress(&self, item_id: i64) -> Option<DownloadProgress> {
        self.progress.read().get(&item_id).cloned()
    }

    pub fn all_progress(&self) -> Vec<DownloadProgress> {
        let mut all: Vec<_> = self.progress.read().values().cloned().collect();
        all.sort_by_key(|p| p.item_id);
        all
    }

    /// Reads a stored record back. `None` if the item is not downloaded.
    pub async fn load_record<T: DeserializeOwned>(&self, item_id: i64) -> Result<Option<T>> {
        if !self.is_available_offline(item_id) {
            return Ok(None);
        }
        match self.fs.read_file(&self.item_dir(item_id).join(RECORD_FILE)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Path of the stored image, if the item has one.
    pub fn image_path(&self, item_id: i64) -> Option<PathBuf> {
        let name = self.index.read().get(item_id)?.image_file_name.clone()?;
        Some(self.item_dir(item_id).join(name))
    }

    pub async fn download<T: OfflineItem>(&self, item: &T) -> Result<DownloadOutcome> {
        self.download_cancellable(item, &CancellationToken::new())
            .await
    }

    /// Stores `item` and its image.
    ///
    /// A no-op when the item is already stored or being downloaded. On
    /// cancellation, by `cancel` or by a concurrent `remove`/`clear_all`, the
    /// partial files are removed and no metadata is written.
    #[instrument(skip(self, item, cancel), fields(item_id = item.item_id()))]
    pub async fn download_cancellable<T: OfflineItem>(
        &self,
        item: &T,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome> {
        let item_id = item.item_id();
        if self.is_available_offline(item_id) {
            debug!("Already available offline");
            return Ok(DownloadOutcome::AlreadyAvailable);
        }
        let abort = cancel.child_token();
        {
            let mut in_flight = self.in_flight.lock();
            if in_flight.contains_key(&item_id) {
                debug!("Download already running");
                return Ok(DownloadOutcome::InProgress);
            }
            in_flight.insert(item_id, abort.clone());
        }
        let _flight = InFlight {
            map: &self.in_flight,
            item_id,
        };

        self.set_progress(DownloadProgress::pending(item_id));
        match self.run_download(item, &abort).await {
            Ok(metadata) => {
                self.set_progress(DownloadProgress::completed(item_id));
                self.schedule_progress_removal(item_id);
                info!(
                    file_size_bytes = metadata.file_size_bytes,
                    has_image = metadata.image_file_name.is_some(),
                    "Item available offline"
                );
                self.event_bus
                    .emit(CoreEvent::Offline(OfflineEvent::Completed {
                        item_id,
                        file_size_bytes: metadata.file_size_bytes,
                        total_storage_used: self.total_storage_used(),
                    }))
                    .ok();
                Ok(DownloadOutcome::Downloaded(metadata))
            }
            Err(OfflineError::Cancelled) => {
                self.discard_partial(item_id).await;
                self.progress.write().remove(&item_id);
                info!("Download cancelled");
                Err(OfflineError::Cancelled)
            }
            Err(e) => {
                self.discard_partial(item_id).await;
                let reached = self.progress(item_id).map_or(0.0, |p| p.progress);
                self.set_progress(DownloadProgress::failed(item_id, reached, e.to_string()));
                error!(error = %e, "Download failed");
                self.event_bus
                    .emit(CoreEvent::Offline(OfflineEvent::Failed {
                        item_id,
                        message: e.to_string(),
                    }))
                    .ok();
                Err(e)
            }
        }
    }

    async fn run_download<T: OfflineItem>(
        &self,
        item: &T,
        cancel: &CancellationToken,
    ) -> Result<OfflineContentMetadata> {
        let item_id = item.item_id();
        let item_dir = self.item_dir(item_id);
        self.set_progress(DownloadProgress::downloading(item_id, 0.0));

        let record = Bytes::from(serde_json::to_vec(item)?);
        let record_path = item_dir.join(RECORD_FILE);
        self.fs.write_file(&record_path, record.clone()).await?;
        let shown = record_path.to_string_lossy();
        debug!(file = strip_path(&shown), bytes = record.len(), "Record stored");
        Self::check_cancelled(cancel)?;
        self.advance(item_id, PROGRESS_RECORD);

        let mut file_size_bytes = record.len() as u64;
        let mut image_file_name = None;
        if let Some(url) = item.image_url() {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(OfflineError::Cancelled),
                fetched = self.fetch_image(&url) => fetched,
            };
            match fetched {
                Ok(bytes) => {
                    let name = format!("{}.{}", IMAGE_STEM, image_extension(&url));
                    let image_path = item_dir.join(&name);
                    match self.fs.write_file(&image_path, bytes.clone()).await {
                        Ok(()) => {
                            debug!(file = %name, bytes = bytes.len(), "Image stored");
                            file_size_bytes += bytes.len() as u64;
                            image_file_name = Some(name);
                        }
                        Err(e) => warn!(error = %e, "Image write failed, continuing without image"),
                    }
                }
                Err(e) => warn!(error = %e, "Image fetch failed, continuing without image"),
            }
        }
        Self::check_cancelled(cancel)?;
        self.advance(item_id, PROGRESS_IMAGE);

        let metadata = OfflineContentMetadata {
            item_id,
            downloaded_at: self.clock.now(),
            file_size_bytes,
            image_file_name,
        };

        // remove and clear_all cancel under this lock, so a download they
        // raced with stops here.
        let _guard = self.write_lock.lock().await;
        Self::check_cancelled(cancel)?;
        let mut next = self.index.read().clone();
        next.insert(metadata.clone());
        self.persist(&next).await?;
        *self.index.write() = next;
        self.advance(item_id, PROGRESS_DONE);

        Ok(metadata)
    }

    async fn fetch_image(&self, url: &str) -> core_resilience::Result<Bytes> {
        let response = self.http.execute(HttpRequest::get(url)).await?;
        Ok(ApiError::check_response(response)?.body)
    }

    fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            Err(OfflineError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn discard_partial(&self, item_id: i64) {
        if let Err(e) = self.fs.delete_dir_all(&self.item_dir(item_id)).await {
            if !e.is_not_found() {
                warn!(item_id, error = %e, "Failed to remove partial download");
            }
        }
    }

    fn set_progress(&self, progress: DownloadProgress) {
        self.progress.write().insert(progress.item_id, progress);
    }

    fn advance(&self, item_id: i64, value: f32) {
        self.set_progress(DownloadProgress::downloading(item_id, value));
        self.event_bus
            .emit(CoreEvent::Offline(OfflineEvent::Progress {
                item_id,
                progress: value,
            }))
            .ok();
    }

    /// Drops a completed progress entry after the linger period, unless a new
    /// download of the same item has replaced it.
    fn schedule_progress_removal(&self, item_id: i64) {
        let progress = self.progress.clone();
        let linger = self.progress_linger;
        let remove = move || {
            let mut map = progress.write();
            if map
                .get(&item_id)
                .is_some_and(|p| p.status == DownloadStatus::Completed)
            {
                map.remove(&item_id);
            }
        };

        if linger.is_zero() {
            remove();
            return;
        }
        tokio::spawn(async move {
            tokio::time::sleep(linger).await;
            remove();
        });
    }

    /// Deletes the item's files and metadata. Removing an absent item is a
    /// no-op.
    #[instrument(skip(self))]
    pub async fn remove(&self, item_id: i64) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if let Some(download) = self.in_flight.lock().get(&item_id) {
            debug!("Cancelling running download");
            download.cancel();
        }
        self.progress.write().remove(&item_id);

        let item_dir = self.item_dir(item_id);
        if let Err(e) = self.fs.delete_dir_all(&item_dir).await {
            if !e.is_not_found() {
                return Err(e.into());
            }
        }

        let mut next = self.index.read().clone();
        if next.remove(item_id).is_none() {
            debug!("Item was not stored");
            return Ok(());
        }
        self.persist(&next).await?;
        let total_storage_used = next.total_storage_used();
        *self.index.write() = next;

        info!(total_storage_used, "Offline item removed");
        self.event_bus
            .emit(CoreEvent::Offline(OfflineEvent::Removed {
                item_id,
                total_storage_used,
            }))
            .ok();
        Ok(())
    }

    /// Downloads every favorite that is not stored yet, one after another.
    ///
    /// Records come from `known` when present there, otherwise from
    /// `fetcher`. A failing item is reported and the batch continues.
    #[instrument(skip(self, favorite_ids, known, fetcher), fields(favorites = favorite_ids.len()))]
    pub async fn download_all_favorites<T>(
        &self,
        favorite_ids: &[i64],
        known: &[T],
        fetcher: &dyn ItemFetcher<T>,
    ) -> BatchReport
    where
        T: OfflineItem,
    {
        let mut report = BatchReport::default();

        for &item_id in favorite_ids {
            if self.is_available_offline(item_id) {
                report.skipped.push(item_id);
                continue;
            }

            let result = match known.iter().find(|item| item.item_id() == item_id) {
                Some(item) => self.download(item).await,
                None => match fetcher.fetch_item(item_id).await {
                    Ok(item) => self.download(&item).await,
                    Err(e) => Err(OfflineError::Fetch(e)),
                },
            };

            match result {
                Ok(DownloadOutcome::Downloaded(_)) => report.downloaded.push(item_id),
                Ok(_) => report.skipped.push(item_id),
                Err(e) => {
                    warn!(item_id, error = %e, "Favorite download failed");
                    report.failed.push((item_id, e.to_string()));
                }
            }
        }

        info!(
            downloaded = report.downloaded.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Favorites download finished"
        );
        report
    }

    /// Deletes every stored item and resets the bookkeeping.
    #[instrument(skip(self))]
    pub async fn clear_all(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        for download in self.in_flight.lock().values() {
            download.cancel();
        }
        if let Err(e) = self.fs.delete_dir_all(&self.dir).await {
            if !e.is_not_found() {
                return Err(e.into());
            }
        }
        self.fs.create_dir_all(&self.dir).await?;

        *self.index.write() = MetadataIndex::default();
        self.progress.write().clear();

        info!("Offline content cleared");
        self.event_bus
            .emit(CoreEvent::Offline(OfflineEvent::Cleared))
            .ok();
        Ok(())
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }
}

/// Extension of the image URL's last path segment, if it is a known image
/// type. Falls back to `jpg`.
fn image_extension(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next().unwrap_or(path);
    let ext = last
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    IMAGE_EXTENSIONS
        .iter()
        .find(|known| **known == ext)
        .copied()
        .unwrap_or("jpg")
}
