//! # Cache Store
//!
//! Offline snapshots of server collections, one per [`ContentType`], with
//! age classification against a per-type TTL.
//!
//! ```ignore
//! let cache = CacheStore::from_config(&config)?;
//! cache.initialize().await?;
//!
//! cache.save(ContentType::Events, &events).await;
//! match cache.freshness(ContentType::Events) {
//!     Freshness::Fresh => {}
//!     Freshness::Stale | Freshness::Expired => refresh_in_background(),
//!     Freshness::None => fetch_now().await,
//! }
//! ```

pub mod content;
pub mod error;
pub mod freshness;
pub mod store;

pub use content::{ContentType, TtlTable};
pub use error::{CacheError, Result};
pub use freshness::Freshness;
pub use store::{CacheEntry, CacheEntryInfo, CacheStore};
