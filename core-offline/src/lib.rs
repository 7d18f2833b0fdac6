//! # Offline Content Store
//!
//! Keeps user-chosen items (record plus image) on disk so they can be read
//! without a network connection, and tracks how much space they use.
//!
//! ## Usage
//!
//! ```ignore
//! let store = OfflineContentStore::from_config(&config, event_bus);
//! store.initialize().await?;
//!
//! store.download(&formation).await?;
//! assert!(store.is_available_offline(formation.item_id()));
//!
//! let report = store
//!     .download_all_favorites(&favorite_ids, &known_formations, &fetcher)
//!     .await;
//! ```

pub mod error;
pub mod item;
pub mod metadata;
pub mod store;

pub use error::{OfflineError, Result};
pub use item::{HttpItemFetcher, ItemFetcher, OfflineItem};
pub use metadata::{DownloadProgress, DownloadStatus, MetadataIndex, OfflineContentMetadata};
pub use store::{BatchReport, DownloadOutcome, OfflineContentStore, DEFAULT_PROGRESS_LINGER};
