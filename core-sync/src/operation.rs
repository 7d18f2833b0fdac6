//! Queued user mutations.

use crate::error::{Result, SyncError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Payload key holding the numeric id of the item an operation targets.
pub const TARGET_ID_KEY: &str = "id";

/// Type-safe operation identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| SyncError::InvalidOperationId(e.to_string()))
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    AddFavorite,
    RemoveFavorite,
    AddServiceFavorite,
    RemoveServiceFavorite,
    RegisterEvent,
    UnregisterEvent,
}

/// Operations in the same family target the same remote toggle and cancel
/// each other out when coalesced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationFamily {
    Favorite,
    ServiceFavorite,
    EventRegistration,
}

impl OperationKind {
    pub const ALL: [OperationKind; 6] = [
        OperationKind::AddFavorite,
        OperationKind::RemoveFavorite,
        OperationKind::AddServiceFavorite,
        OperationKind::RemoveServiceFavorite,
        OperationKind::RegisterEvent,
        OperationKind::UnregisterEvent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::AddFavorite => "addFavorite",
            OperationKind::RemoveFavorite => "removeFavorite",
            OperationKind::AddServiceFavorite => "addServiceFavorite",
            OperationKind::RemoveServiceFavorite => "removeServiceFavorite",
            OperationKind::RegisterEvent => "registerEvent",
            OperationKind::UnregisterEvent => "unregisterEvent",
        }
    }

    pub fn family(&self) -> OperationFamily {
        match self {
            OperationKind::AddFavorite | OperationKind::RemoveFavorite => OperationFamily::Favorite,
            OperationKind::AddServiceFavorite | OperationKind::RemoveServiceFavorite => {
                OperationFamily::ServiceFavorite
            }
            OperationKind::RegisterEvent | OperationKind::UnregisterEvent => {
                OperationFamily::EventRegistration
            }
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        OperationKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| SyncError::InvalidKind(s.to_string()))
    }
}

/// A mutation waiting to be replayed against the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
    pub id: OperationId,
    pub kind: OperationKind,
    pub payload: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl PendingOperation {
    pub fn new(kind: OperationKind, payload: HashMap<String, String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: OperationId::new(),
            kind,
            payload,
            created_at,
            retry_count: 0,
        }
    }

    /// Convenience for the common `{ "id": <target> }` payload.
    pub fn for_target(kind: OperationKind, target_id: i64, created_at: DateTime<Utc>) -> Self {
        let payload = HashMap::from([(TARGET_ID_KEY.to_string(), target_id.to_string())]);
        Self::new(kind, payload, created_at)
    }

    /// Numeric target id, if the payload carries a valid one.
    pub fn target_id(&self) -> Option<i64> {
        self.payload.get(TARGET_ID_KEY)?.trim().parse().ok()
    }

    /// Key under which last-write-wins coalescing compares operations.
    pub fn coalesce_key(&self) -> Option<(OperationFamily, i64)> {
        Some((self.kind.family(), self.target_id()?))
    }

    /// Counts a failed replay. Returns `true` once the budget is spent.
    pub(crate) fn record_failure(&mut self, max_retries: u32) -> bool {
        self.retry_count = self.retry_count.saturating_add(1);
        self.retry_count >= max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_round_trip() {
        for kind in OperationKind::ALL {
            assert_eq!(kind.as_str().parse::<OperationKind>().unwrap(), kind);
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
        assert!("toggleFavorite".parse::<OperationKind>().is_err());
    }

    #[test]
    fn test_families_pair_up() {
        assert_eq!(
            OperationKind::AddFavorite.family(),
            OperationKind::RemoveFavorite.family()
        );
        assert_ne!(
            OperationKind::AddFavorite.family(),
            OperationKind::AddServiceFavorite.family()
        );
        assert_eq!(
            OperationKind::RegisterEvent.family(),
            OperationFamily::EventRegistration
        );
    }

    #[test]
    fn test_target_id() {
        let op = PendingOperation::for_target(OperationKind::AddFavorite, 42, Utc::now());
        assert_eq!(op.target_id(), Some(42));
        assert_eq!(op.retry_count, 0);

        let mut payload = HashMap::new();
        payload.insert("id".to_string(), "forty-two".to_string());
        let bad = PendingOperation::new(OperationKind::AddFavorite, payload, Utc::now());
        assert_eq!(bad.target_id(), None);
        assert_eq!(bad.coalesce_key(), None);
    }

    #[test]
    fn test_record_failure_reports_exhaustion() {
        let mut op = PendingOperation::for_target(OperationKind::RegisterEvent, 7, Utc::now());
        assert!(!op.record_failure(3));
        assert!(!op.record_failure(3));
        assert!(op.record_failure(3));
        assert_eq!(op.retry_count, 3);
    }

    #[test]
    fn test_persisted_shape() {
        let op = PendingOperation::for_target(OperationKind::RemoveServiceFavorite, 3, Utc::now());
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["kind"], "removeServiceFavorite");
        assert_eq!(value["payload"]["id"], "3");
        assert_eq!(value["retryCount"], 0);
        assert!(value["createdAt"].is_string());

        let parsed = OperationId::from_string(value["id"].as_str().unwrap()).unwrap();
        assert_eq!(parsed, op.id);
    }
}
