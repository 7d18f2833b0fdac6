//! # Cache Store
//!
//! Persists one JSON snapshot per [`ContentType`] and classifies its age.
//!
//! ## Layout
//!
//! ```text
//! {cache_dir}/
//!   formations.json      CacheEntry<T>
//!   events.json          CacheEntry<T>
//!   ...
//!   cache_index.json     content type -> cached_at
//! ```
//!
//! The index lets [`CacheStore::freshness`] and [`CacheStore::age`] answer
//! without reading a payload. It is rebuilt from the entry files when missing
//! or unreadable.
//!
//! ## Failure policy
//!
//! `save`, `load`, `remove` and `clear_all` never return errors. Storage and
//! decoding failures are logged and behave like a cache miss.

use crate::content::{ContentType, TtlTable};
use crate::error::{CacheError, Result};
use crate::freshness::Freshness;
use bridge_traits::{Clock, FileSystemAccess};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use core_runtime::CoreConfig;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

const INDEX_FILE: &str = "cache_index.json";

/// A cached server collection with its fetch timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub content_type: ContentType,
    pub payload: T,
    pub cached_at: DateTime<Utc>,
}

/// Diagnostics row for one existing entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntryInfo {
    pub content_type: ContentType,
    pub cached_at: DateTime<Utc>,
    pub age: Duration,
    pub ttl: Duration,
    pub freshness: Freshness,
}

/// Header-only view of an entry file, used to rebuild the index.
#[derive(Deserialize)]
struct EntryHeader {
    cached_at: DateTime<Utc>,
}

pub struct CacheStore {
    fs: Arc<dyn FileSystemAccess>,
    clock: Arc<dyn Clock>,
    dir: PathBuf,
    ttl: TtlTable,
    index: RwLock<HashMap<ContentType, DateTime<Utc>>>,
    /// One writer per entry file.
    entry_locks: HashMap<ContentType, Mutex<()>>,
    index_lock: Mutex<()>,
}

impl CacheStore {
    pub fn new(
        fs: Arc<dyn FileSystemAccess>,
        clock: Arc<dyn Clock>,
        dir: impl Into<PathBuf>,
        ttl: TtlTable,
    ) -> Self {
        Self {
            fs,
            clock,
            dir: dir.into(),
            ttl,
            index: RwLock::new(HashMap::new()),
            entry_locks: ContentType::ALL
                .into_iter()
                .map(|ct| (ct, Mutex::new(())))
                .collect(),
            index_lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &CoreConfig) -> Result<Self> {
        Ok(Self::new(
            config.file_system.clone(),
            config.clock.clone(),
            config.cache_dir(),
            TtlTable::from_overrides(&config.cache_ttl_overrides)?,
        ))
    }

    pub fn ttl(&self, content_type: ContentType) -> Duration {
        self.ttl.ttl(content_type)
    }

    fn entry_path(&self, content_type: ContentType) -> PathBuf {
        self.dir.join(content_type.file_name())
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    fn entry_lock(&self, content_type: ContentType) -> &Mutex<()> {
        // Every ContentType is inserted in `new`.
        &self.entry_locks[&content_type]
    }

    /// Loads the timestamp index, rebuilding it from entry files if needed.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<()> {
        self.fs.create_dir_all(&self.dir).await?;

        let loaded = match self.fs.read_file(&self.index_path()).await {
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<ContentType, DateTime<Utc>>>(&bytes)
            {
                Ok(index) => Some(index),
                Err(e) => {
                    warn!(error = %e, "Cache index unreadable, rebuilding");
                    None
                }
            },
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };

        let index = match loaded {
            Some(index) => index.into_iter().collect(),
            None => self.rebuild_index().await,
        };

        info!(entries = index.len(), dir = ?self.dir, "Cache store initialized");
        *self.index.write() = index;
        Ok(())
    }

    async fn rebuild_index(&self) -> HashMap<ContentType, DateTime<Utc>> {
        let mut index = HashMap::new();
        for content_type in ContentType::ALL {
            if let Some(cached_at) = self.read_header(content_type).await {
                index.insert(content_type, cached_at);
            }
        }
        index
    }

    async fn read_header(&self, content_type: ContentType) -> Option<DateTime<Utc>> {
        let bytes = self.fs.read_file(&self.entry_path(content_type)).await.ok()?;
        serde_json::from_slice::<EntryHeader>(&bytes)
            .ok()
            .map(|header| header.cached_at)
    }

    /// Writes `value` as the entry for `content_type`, replacing any previous one.
    ///
    /// Failures are logged, never returned.
    #[instrument(skip(self, value))]
    pub async fn save<T: Serialize>(&self, content_type: ContentType, value: &T) {
        if let Err(e) = self.try_save(content_type, value).await {
            warn!(content_type = %content_type, error = %e, "Cache write failed");
        }
    }

    async fn try_save<T: Serialize>(&self, content_type: ContentType, value: &T) -> Result<()> {
        let entry = CacheEntry {
            content_type,
            payload: value,
            cached_at: self.clock.now(),
        };
        let bytes = Bytes::from(serde_json::to_vec(&entry)?);

        {
            let _guard = self.entry_lock(content_type).lock().await;
            self.fs
                .write_file(&self.entry_path(content_type), bytes)
                .await?;
            self.index.write().insert(content_type, entry.cached_at);
        }

        debug!(content_type = %content_type, cached_at = %entry.cached_at, "Cache entry saved");
        self.persist_index().await
    }

    /// Reads the payload for `content_type`.
    ///
    /// Returns `None` when nothing is cached or the stored data does not decode
    /// as `T`.
    #[instrument(skip(self))]
    pub async fn load<T: DeserializeOwned>(&self, content_type: ContentType) -> Option<T> {
        self.load_entry(content_type).await.map(|entry| entry.payload)
    }

    /// Like [`load`](Self::load) but keeps the timestamp.
    pub async fn load_entry<T: DeserializeOwned>(
        &self,
        content_type: ContentType,
    ) -> Option<CacheEntry<T>> {
        let read = {
            let _guard = self.entry_lock(content_type).lock().await;
            self.fs.read_file(&self.entry_path(content_type)).await
        };

        let bytes = match read {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => {
                debug!(content_type = %content_type, "Cache miss");
                return None;
            }
            Err(e) => {
                warn!(content_type = %content_type, error = %e, "Cache read failed");
                return None;
            }
        };

        match serde_json::from_slice::<CacheEntry<T>>(&bytes) {
            Ok(entry) => {
                self.index
                    .write()
                    .entry(content_type)
                    .or_insert(entry.cached_at);
                Some(entry)
            }
            Err(e) => {
                warn!(content_type = %content_type, error = %e, "Cache entry undecodable, treating as miss");
                None
            }
        }
    }

    pub fn cached_at(&self, content_type: ContentType) -> Option<DateTime<Utc>> {
        self.index.read().get(&content_type).copied()
    }

    /// Time since the entry was cached. Never negative.
    pub fn age(&self, content_type: ContentType) -> Option<Duration> {
        let cached_at = self.cached_at(content_type)?;
        Some(
            (self.clock.now() - cached_at)
                .to_std()
                .unwrap_or(Duration::ZERO),
        )
    }

    pub fn freshness(&self, content_type: ContentType) -> Freshness {
        match self.cached_at(content_type) {
            Some(cached_at) => {
                Freshness::classify(self.clock.now() - cached_at, self.ttl(content_type))
            }
            None => Freshness::None,
        }
    }

    /// One row per existing entry, in [`ContentType::ALL`] order.
    pub fn entry_info(&self) -> Vec<CacheEntryInfo> {
        ContentType::ALL
            .into_iter()
            .filter_map(|content_type| {
                let cached_at = self.cached_at(content_type)?;
                Some(CacheEntryInfo {
                    content_type,
                    cached_at,
                    age: self.age(content_type).unwrap_or(Duration::ZERO),
                    ttl: self.ttl(content_type),
                    freshness: self.freshness(content_type),
                })
            })
            .collect()
    }

    /// Deletes a single entry.
    #[instrument(skip(self))]
    pub async fn remove(&self, content_type: ContentType) {
        {
            let _guard = self.entry_lock(content_type).lock().await;
            if let Err(e) = self.fs.delete_file(&self.entry_path(content_type)).await {
                if !e.is_not_found() {
                    warn!(content_type = %content_type, error = %e, "Cache delete failed");
                }
            }
            self.index.write().remove(&content_type);
        }

        if let Err(e) = self.persist_index().await {
            warn!(error = %e, "Cache index write failed");
        }
    }

    /// Deletes every entry and the index.
    ///
    /// Takes every entry lock (in a fixed order) first, so no concurrent save
    /// or load observes a half-cleared store.
    #[instrument(skip(self))]
    pub async fn clear_all(&self) {
        let mut guards = Vec::with_capacity(ContentType::ALL.len());
        for content_type in ContentType::ALL {
            guards.push(self.entry_lock(content_type).lock().await);
        }
        let _index_guard = self.index_lock.lock().await;

        for content_type in ContentType::ALL {
            if let Err(e) = self.fs.delete_file(&self.entry_path(content_type)).await {
                if !e.is_not_found() {
                    warn!(content_type = %content_type, error = %e, "Cache delete failed");
                }
            }
        }
        if let Err(e) = self.fs.delete_file(&self.index_path()).await {
            if !e.is_not_found() {
                warn!(error = %e, "Cache index delete failed");
            }
        }
        self.index.write().clear();

        info!("Cache cleared");
    }

    async fn persist_index(&self) -> Result<()> {
        let _guard = self.index_lock.lock().await;
        let snapshot: BTreeMap<ContentType, DateTime<Utc>> = self
            .index
            .read()
            .iter()
            .map(|(ct, at)| (*ct, *at))
            .collect();
        let bytes = Bytes::from(serde_json::to_vec(&snapshot).map_err(CacheError::from)?);
        self.fs.write_file(&self.index_path(), bytes).await?;
        Ok(())
    }
}
