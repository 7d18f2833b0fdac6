use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::testing::{ChannelNetworkMonitor, MemoryFileSystem};
use bridge_traits::{HttpClient, HttpMethod, HttpRequest, HttpResponse, NetworkInfo};
use core_runtime::events::SyncEvent;
use core_service::{
    ContentType, CoreConfig, CoreEvent, Freshness, HealthState, OfflineCore, OperationKind,
};
use mockall::mock;
use std::sync::Arc;
use std::time::Duration;

mock! {
    HttpClient {}

    #[async_trait]
    impl HttpClient for HttpClient {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
    }
}

#[tokio::test]
async fn test_offline_session_recovers_on_reconnect() {
    let mut http = MockHttpClient::new();
    http.expect_execute()
        .withf(|request| {
            request.method == HttpMethod::Post
                && request.url == "https://api.example.com/favorites/42"
        })
        .times(1)
        .returning(|_| Ok(HttpResponse::new(201, "")));

    let (network, controller) = ChannelNetworkMonitor::new(NetworkInfo::disconnected());
    let config = CoreConfig::builder()
        .data_dir("/data")
        .http_client(Arc::new(http))
        .file_system(Arc::new(MemoryFileSystem::new("/data")))
        .network_monitor(Arc::new(network))
        .success_settle_delay(Duration::ZERO)
        .api_base_url("https://api.example.com")
        .build()
        .unwrap();

    let core = OfflineCore::new(config).unwrap();
    let mut events = core.subscribe_events();
    let mut health = core.resilience().subscribe_health();
    core.start().await.unwrap();

    tokio::time::timeout(
        Duration::from_secs(5),
        health.wait_for(|state| *state == HealthState::Offline),
    )
    .await
    .unwrap()
    .unwrap();

    core.cache()
        .save(ContentType::Formations, &vec!["Rust", "Tokio"])
        .await;
    let cached: Option<Vec<String>> = core.cache().load(ContentType::Formations).await;
    assert_eq!(cached.unwrap().len(), 2);
    assert_eq!(core.cache().freshness(ContentType::Formations), Freshness::Fresh);

    core.sync_queue()
        .enqueue_for_target(OperationKind::AddFavorite, 42)
        .await
        .unwrap();
    assert_eq!(core.sync_queue().pending_count(), 1);

    controller.go_online();

    let pending = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(CoreEvent::Sync(SyncEvent::ReplayCompleted { pending_count, .. })) =
                events.recv().await
            {
                return pending_count;
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(pending, 0);
    assert_eq!(core.sync_queue().pending_count(), 0);
    assert_eq!(core.resilience().health(), HealthState::Healthy);
    assert!(core.connectivity_handle().is_connected());

    core.shutdown().await;
}
