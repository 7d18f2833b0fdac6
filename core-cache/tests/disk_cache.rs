use bridge_desktop::TokioFileSystem;
use bridge_traits::{Clock, ManualClock};
use core_cache::{CacheStore, ContentType, Freshness, TtlTable};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Event {
    id: i64,
    title: String,
}

fn open(root: &TempDir, clock: Arc<ManualClock>, ttl: TtlTable) -> CacheStore {
    let fs = Arc::new(TokioFileSystem::with_directories(
        root.path().join("cache"),
        root.path().join("data"),
    ));
    CacheStore::new(fs, clock, root.path().join("data").join("cache"), ttl)
}

#[tokio::test]
async fn test_entries_survive_restart_on_disk() {
    let root = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::default());
    let events = vec![
        Event { id: 1, title: "Open day".into() },
        Event { id: 2, title: "Workshop".into() },
    ];

    {
        let store = open(&root, clock.clone(), TtlTable::default());
        store.initialize().await.unwrap();
        store.save(ContentType::Events, &events).await;
    }

    clock.advance(chrono::Duration::minutes(90));

    let store = open(&root, clock.clone(), TtlTable::default());
    store.initialize().await.unwrap();
    assert_eq!(store.load::<Vec<Event>>(ContentType::Events).await, Some(events));
    assert_eq!(store.freshness(ContentType::Events), Freshness::Stale);
    assert_eq!(store.age(ContentType::Events), Some(Duration::from_secs(90 * 60)));
}

#[tokio::test]
async fn test_ttl_override_changes_classification() {
    let root = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::default());
    let ttl = TtlTable::default().with_override(ContentType::Articles, Duration::from_secs(60));

    let store = open(&root, clock.clone(), ttl);
    store.initialize().await.unwrap();
    store.save(ContentType::Articles, &vec![1, 2]).await;
    clock.advance(chrono::Duration::seconds(61));

    assert_eq!(store.freshness(ContentType::Articles), Freshness::Expired);
    assert_eq!(store.entry_info()[0].cached_at, clock.now() - chrono::Duration::seconds(61));
}

#[tokio::test]
async fn test_concurrent_saves_and_clear_leave_consistent_state() {
    let root = TempDir::new().unwrap();
    let store = Arc::new(open(&root, Arc::new(ManualClock::default()), TtlTable::default()));
    store.initialize().await.unwrap();

    let mut tasks = Vec::new();
    for (i, content_type) in ContentType::ALL.into_iter().enumerate() {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            store.save(content_type, &vec![i as i64]).await;
        }));
    }
    let clearer = {
        let store = store.clone();
        tokio::spawn(async move { store.clear_all().await })
    };
    for task in tasks {
        task.await.unwrap();
    }
    clearer.await.unwrap();

    // Each entry is either fully present or fully absent, and the index agrees.
    for content_type in ContentType::ALL {
        let loaded = store.load::<Vec<i64>>(content_type).await;
        let indexed = store.freshness(content_type) != Freshness::None;
        assert_eq!(loaded.is_some(), indexed, "{}", content_type);
    }
}
