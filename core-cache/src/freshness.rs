use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Age classification of a cache entry relative to its TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// Elapsed time is at most half the TTL.
    Fresh,
    /// Past half the TTL, not past the TTL.
    Stale,
    /// Past the TTL. The entry still exists and can be loaded.
    Expired,
    /// No entry.
    None,
}

impl Freshness {
    /// Classifies `elapsed` against `ttl`.
    ///
    /// Both boundaries are inclusive on the younger side: exactly half the TTL
    /// is still fresh, exactly the TTL is still stale. A negative `elapsed`
    /// (clock moved backwards) counts as fresh.
    pub fn classify(elapsed: chrono::Duration, ttl: Duration) -> Self {
        let elapsed_ms = elapsed.num_milliseconds().max(0) as u128;
        let ttl_ms = ttl.as_millis();

        if elapsed_ms * 2 <= ttl_ms {
            Freshness::Fresh
        } else if elapsed_ms <= ttl_ms {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }

    /// Whether the entry should be refreshed in the background.
    pub fn needs_refresh(&self) -> bool {
        !matches!(self, Freshness::Fresh)
    }
}
