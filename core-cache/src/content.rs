use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const HOUR: u64 = 60 * 60;

/// Server collection kinds that get a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Formations,
    Services,
    Categories,
    Articles,
    Events,
}

impl ContentType {
    pub const ALL: [ContentType; 5] = [
        ContentType::Formations,
        ContentType::Services,
        ContentType::Categories,
        ContentType::Articles,
        ContentType::Events,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Formations => "formations",
            ContentType::Services => "services",
            ContentType::Categories => "categories",
            ContentType::Articles => "articles",
            ContentType::Events => "events",
        }
    }

    /// Built-in time-to-live. Taxonomies change rarely, events are time-sensitive.
    pub fn default_ttl(&self) -> Duration {
        match self {
            ContentType::Formations => Duration::from_secs(24 * HOUR),
            ContentType::Services => Duration::from_secs(24 * HOUR),
            ContentType::Categories => Duration::from_secs(168 * HOUR),
            ContentType::Articles => Duration::from_secs(6 * HOUR),
            ContentType::Events => Duration::from_secs(2 * HOUR),
        }
    }

    pub(crate) fn file_name(&self) -> String {
        format!("{}.json", self.as_str())
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        ContentType::ALL
            .into_iter()
            .find(|ct| ct.as_str() == s)
            .ok_or_else(|| CacheError::UnknownContentType(s.to_string()))
    }
}

/// TTL per content type: defaults plus configured overrides.
#[derive(Debug, Clone, Default)]
pub struct TtlTable {
    overrides: HashMap<ContentType, Duration>,
}

impl TtlTable {
    /// Resolves overrides keyed by content type name.
    pub fn from_overrides(overrides: &HashMap<String, Duration>) -> Result<Self> {
        let overrides = overrides
            .iter()
            .map(|(name, ttl)| Ok((name.parse::<ContentType>()?, *ttl)))
            .collect::<Result<HashMap<_, _>>>()?;
        Ok(Self { overrides })
    }

    pub fn with_override(mut self, content_type: ContentType, ttl: Duration) -> Self {
        self.overrides.insert(content_type, ttl);
        self
    }

    pub fn ttl(&self, content_type: ContentType) -> Duration {
        self.overrides
            .get(&content_type)
            .copied()
            .unwrap_or_else(|| content_type.default_ttl())
    }
}
