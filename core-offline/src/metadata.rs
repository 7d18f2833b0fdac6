//! Bookkeeping for downloaded items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One downloaded item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineContentMetadata {
    pub item_id: i64,
    pub downloaded_at: DateTime<Utc>,
    /// Record plus image, in bytes.
    pub file_size_bytes: u64,
    pub image_file_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
}

/// Transient progress of one download. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub item_id: i64,
    /// `0.0..=1.0`
    pub progress: f32,
    pub status: DownloadStatus,
    pub error: Option<String>,
}

impl DownloadProgress {
    pub fn pending(item_id: i64) -> Self {
        Self {
            item_id,
            progress: 0.0,
            status: DownloadStatus::Pending,
            error: None,
        }
    }

    pub fn downloading(item_id: i64, progress: f32) -> Self {
        Self {
            item_id,
            progress,
            status: DownloadStatus::Downloading,
            error: None,
        }
    }

    pub fn completed(item_id: i64) -> Self {
        Self {
            item_id,
            progress: 1.0,
            status: DownloadStatus::Completed,
            error: None,
        }
    }

    pub fn failed(item_id: i64, progress: f32, error: impl Into<String>) -> Self {
        Self {
            item_id,
            progress,
            status: DownloadStatus::Failed,
            error: Some(error.into()),
        }
    }
}

/// Metadata entries keyed by item id, with the running size total.
///
/// `total_storage_used` always equals the sum of the entries' sizes,
/// saturating at `u64::MAX`; it is only changed together with an entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataIndex {
    entries: BTreeMap<i64, OfflineContentMetadata>,
    total_storage_used: u64,
}

impl MetadataIndex {
    pub fn from_entries(entries: impl IntoIterator<Item = OfflineContentMetadata>) -> Self {
        let mut index = Self::default();
        for entry in entries {
            index.insert(entry);
        }
        index
    }

    /// Adds or replaces an entry.
    pub fn insert(&mut self, entry: OfflineContentMetadata) {
        if let Some(previous) = self.entries.remove(&entry.item_id) {
            self.subtract(previous.file_size_bytes);
        }
        self.total_storage_used = self
            .total_storage_used
            .saturating_add(entry.file_size_bytes);
        self.entries.insert(entry.item_id, entry);
    }

    pub fn remove(&mut self, item_id: i64) -> Option<OfflineContentMetadata> {
        let removed = self.entries.remove(&item_id)?;
        self.subtract(removed.file_size_bytes);
        Some(removed)
    }

    /// A saturated total no longer says how much was added, so it is summed
    /// again from the remaining entries.
    fn subtract(&mut self, size: u64) {
        self.total_storage_used = if self.total_storage_used == u64::MAX {
            self.entries
                .values()
                .fold(0u64, |total, e| total.saturating_add(e.file_size_bytes))
        } else {
            self.total_storage_used.saturating_sub(size)
        };
    }

    pub fn get(&self, item_id: i64) -> Option<&OfflineContentMetadata> {
        self.entries.get(&item_id)
    }

    pub fn contains(&self, item_id: i64) -> bool {
        self.entries.contains_key(&item_id)
    }

    pub fn ids(&self) -> Vec<i64> {
        self.entries.keys().copied().collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &OfflineContentMetadata> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_storage_used(&self) -> u64 {
        self.total_storage_used
    }

    /// Persisted form: entries in id order.
    pub fn to_vec(&self) -> Vec<OfflineContentMetadata> {
        self.entries.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(item_id: i64, size: u64) -> OfflineContentMetadata {
        OfflineContentMetadata {
            item_id,
            downloaded_at: Utc::now(),
            file_size_bytes: size,
            image_file_name: None,
        }
    }

    fn sum(index: &MetadataIndex) -> u64 {
        index.entries().map(|e| e.file_size_bytes).sum()
    }

    #[test]
    fn test_total_tracks_inserts_and_removals() {
        let mut index = MetadataIndex::default();
        index.insert(entry(1, 100));
        index.insert(entry(2, 50));
        assert_eq!(index.total_storage_used(), 150);

        index.insert(entry(1, 10));
        assert_eq!(index.total_storage_used(), 60);
        assert_eq!(index.total_storage_used(), sum(&index));

        assert!(index.remove(2).is_some());
        assert!(index.remove(2).is_none());
        assert_eq!(index.total_storage_used(), 10);
        assert_eq!(index.total_storage_used(), sum(&index));
    }

    #[test]
    fn test_total_saturates_on_huge_sizes() {
        let mut index = MetadataIndex::default();
        index.insert(entry(1, u64::MAX - 10));
        index.insert(entry(2, 100));
        assert_eq!(index.total_storage_used(), u64::MAX);

        index.insert(entry(2, 5));
        assert_eq!(index.total_storage_used(), u64::MAX - 5);

        assert!(index.remove(1).is_some());
        assert_eq!(index.total_storage_used(), 5);
        assert!(index.remove(2).is_some());
        assert_eq!(index.total_storage_used(), 0);
    }

    #[test]
    fn test_from_entries_sums_sizes() {
        let index = MetadataIndex::from_entries(vec![entry(3, 7), entry(1, 5)]);
        assert_eq!(index.ids(), vec![1, 3]);
        assert_eq!(index.total_storage_used(), 12);
    }

    #[test]
    fn test_metadata_shape() {
        let value = serde_json::to_value(entry(9, 42)).unwrap();
        assert_eq!(value["itemId"], 9);
        assert_eq!(value["fileSizeBytes"], 42);
        assert!(value["imageFileName"].is_null());
    }
}
