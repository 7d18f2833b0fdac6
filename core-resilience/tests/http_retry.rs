use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::{HttpClient, HttpRequest, HttpResponse};
use core_resilience::{ApiError, HealthState, ResilienceController};
use core_runtime::events::{CoreEvent, EventBus, HealthEvent, HealthStatus};
use core_runtime::RetryPolicy;
use mockall::{mock, Sequence};
use std::sync::Arc;
use std::time::Duration;

mock! {
    HttpClient {}

    #[async_trait]
    impl HttpClient for HttpClient {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
    }
}

fn controller(bus: EventBus) -> ResilienceController {
    ResilienceController::new(RetryPolicy::default(), 3, Duration::ZERO, bus)
}

async fn fetch(
    controller: &ResilienceController,
    http: Arc<dyn HttpClient>,
) -> Result<Vec<i64>, ApiError> {
    controller
        .execute_with_retry("load events", || {
            let http = http.clone();
            async move {
                let response = http
                    .execute(HttpRequest::get("https://api.example.com/events"))
                    .await?;
                ApiError::decode_response(response)
            }
        })
        .await
}

#[tokio::test(start_paused = true)]
async fn test_server_error_then_success() {
    let mut http = MockHttpClient::new();
    let mut seq = Sequence::new();
    http.expect_execute()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(HttpResponse::new(503, "")));
    http.expect_execute()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(HttpResponse::new(200, "[1,2,3]")));

    let controller = controller(EventBus::new(32));
    let events = fetch(&controller, Arc::new(http)).await.unwrap();

    assert_eq!(events, vec![1, 2, 3]);
    assert_eq!(controller.health(), HealthState::Healthy);
}

#[tokio::test(start_paused = true)]
async fn test_transport_timeouts_exhaust_attempts_and_degrade() {
    let mut http = MockHttpClient::new();
    http.expect_execute()
        .times(3)
        .returning(|_| Err(BridgeError::Timeout("30s elapsed".into())));

    let bus = EventBus::new(32);
    let mut events = bus.subscribe();
    let controller = controller(bus);

    let result = fetch(&controller, Arc::new(http)).await;
    assert_eq!(result, Err(ApiError::Timeout("30s elapsed".into())));
    assert_eq!(controller.health().status(), HealthStatus::Degraded);

    let mut saw_degraded = false;
    while let Ok(event) = events.try_recv() {
        if let CoreEvent::Health(HealthEvent::Changed { status, .. }) = event {
            saw_degraded |= status == HealthStatus::Degraded;
        }
    }
    assert!(saw_degraded);
}

#[tokio::test(start_paused = true)]
async fn test_unauthorized_is_not_retried() {
    let mut http = MockHttpClient::new();
    http.expect_execute()
        .times(1)
        .returning(|_| Ok(HttpResponse::new(401, "")));

    let controller = controller(EventBus::new(32));
    let result = fetch(&controller, Arc::new(http)).await;

    assert!(matches!(result, Err(ApiError::Client { status: 401, .. })));
    assert_eq!(controller.health(), HealthState::Healthy);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_body_is_not_retried() {
    let mut http = MockHttpClient::new();
    http.expect_execute()
        .times(1)
        .returning(|_| Ok(HttpResponse::new(200, "{\"not\":\"a list\"}")));

    let controller = controller(EventBus::new(32));
    let result = fetch(&controller, Arc::new(http)).await;

    assert!(matches!(result, Err(ApiError::Decoding(_))));
    assert_eq!(controller.health().status(), HealthStatus::Error);
}
