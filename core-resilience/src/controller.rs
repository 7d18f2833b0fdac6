//! Bounded retry with exponential backoff, plus health accounting.

use crate::error::{ApiError, Result};
use crate::state::{HealthInputs, HealthState, RetryState};
use async_trait::async_trait;
use core_connectivity::{ConnectivityObserver, ConnectivityState};
use core_runtime::events::{CoreEvent, EventBus, HealthEvent, RetryEvent};
use core_runtime::{CoreConfig, RetryPolicy};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Publishes [`RetryState`] and owns the generation counter that keeps a
/// delayed idle reset from clobbering a newer operation.
struct RetryPublisher {
    tx: watch::Sender<RetryState>,
    generation: AtomicU64,
    event_bus: EventBus,
}

impl RetryPublisher {
    fn publish(&self, context: &str, state: RetryState) {
        debug!(context, state = ?state, "Retry state");
        let status_message = state.status_message();
        self.tx.send_replace(state);
        self.event_bus
            .emit(CoreEvent::Retry(RetryEvent::StateChanged {
                context: context.to_string(),
                status_message,
            }))
            .ok();
    }

    fn begin(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }
}

pub struct ResilienceController {
    policy: RetryPolicy,
    degraded_threshold: u32,
    success_settle_delay: Duration,
    retry: Arc<RetryPublisher>,
    health_tx: watch::Sender<HealthState>,
    inputs: Mutex<HealthInputs>,
    event_bus: EventBus,
}

impl ResilienceController {
    pub fn new(
        policy: RetryPolicy,
        degraded_threshold: u32,
        success_settle_delay: Duration,
        event_bus: EventBus,
    ) -> Self {
        let (retry_tx, _) = watch::channel(RetryState::Idle);
        let (health_tx, _) = watch::channel(HealthState::Healthy);
        Self {
            policy,
            degraded_threshold,
            success_settle_delay,
            retry: Arc::new(RetryPublisher {
                tx: retry_tx,
                generation: AtomicU64::new(0),
                event_bus: event_bus.clone(),
            }),
            health_tx,
            inputs: Mutex::new(HealthInputs::new()),
            event_bus,
        }
    }

    pub fn from_config(config: &CoreConfig, event_bus: EventBus) -> Self {
        Self::new(
            config.retry,
            config.degraded_threshold,
            config.success_settle_delay,
            event_bus,
        )
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn retry_state(&self) -> RetryState {
        self.retry.tx.borrow().clone()
    }

    pub fn subscribe_retry_state(&self) -> watch::Receiver<RetryState> {
        self.retry.tx.subscribe()
    }

    pub fn health(&self) -> HealthState {
        self.health_tx.borrow().clone()
    }

    pub fn subscribe_health(&self) -> watch::Receiver<HealthState> {
        self.health_tx.subscribe()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inputs.lock().consecutive_failures
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error,
    /// or runs out of attempts.
    ///
    /// Between attempts it waits `policy.backoff_delay(attempt)`, publishing a
    /// [`RetryState::Waiting`] countdown once per second. No wait follows the
    /// last attempt.
    pub async fn execute_with_retry<T, F, Fut>(&self, context: &str, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with_retry_cancellable(context, &CancellationToken::new(), operation)
            .await
    }

    /// Like [`execute_with_retry`](Self::execute_with_retry), stopping with
    /// [`ApiError::Cancelled`] as soon as `cancel` fires.
    ///
    /// A cancelled call leaves [`RetryState::Idle`] and does not touch the
    /// failure counter.
    pub async fn execute_with_retry_cancellable<T, F, Fut>(
        &self,
        context: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let generation = self.retry.begin();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            if cancel.is_cancelled() {
                return Err(self.cancelled(context));
            }
            self.retry.publish(
                context,
                RetryState::Retrying {
                    attempt,
                    max_attempts,
                },
            );

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ApiError::Cancelled),
                result = operation() => result,
            };

            let error = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        info!(context, attempt, "Operation succeeded after retry");
                    }
                    self.record_success();
                    self.retry.publish(context, RetryState::Succeeded);
                    self.settle(context, generation);
                    return Ok(value);
                }
                Err(ApiError::Cancelled) => return Err(self.cancelled(context)),
                Err(error) => error,
            };

            self.record_failure(&error);

            if !error.is_retryable() {
                warn!(context, attempt, error = %error, "Operation failed without retry");
                return Err(self.fail(context, error));
            }
            if attempt >= max_attempts {
                warn!(context, attempts = attempt, error = %error, "Operation failed, attempts exhausted");
                return Err(self.fail(context, error));
            }

            let delay = self.policy.backoff_delay(attempt);
            warn!(
                context,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Operation failed, retrying"
            );
            if !self.countdown(context, delay, cancel).await {
                return Err(self.cancelled(context));
            }
            attempt += 1;
        }
    }

    /// Sleeps for `delay`, publishing the whole seconds remaining at each
    /// tick. Returns `false` if cancelled.
    async fn countdown(&self, context: &str, delay: Duration, cancel: &CancellationToken) -> bool {
        let mut remaining = delay;
        while !remaining.is_zero() {
            let seconds = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
            self.retry.publish(
                context,
                RetryState::Waiting {
                    seconds_remaining: seconds,
                },
            );

            // Fractional part first, so later ticks land on whole seconds.
            let step = remaining.saturating_sub(Duration::from_secs(seconds - 1));
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(step) => {}
            }
            remaining -= step;
        }
        true
    }

    fn fail(&self, context: &str, error: ApiError) -> ApiError {
        self.retry.publish(
            context,
            RetryState::Failed {
                message: format!("{} failed: {}", context, error),
            },
        );
        error
    }

    fn cancelled(&self, context: &str) -> ApiError {
        debug!(context, "Operation cancelled");
        self.retry.publish(context, RetryState::Idle);
        ApiError::Cancelled
    }

    /// Returns to idle after the settle delay unless another operation has
    /// started meanwhile.
    fn settle(&self, context: &str, generation: u64) {
        if self.success_settle_delay.is_zero() {
            self.retry.publish(context, RetryState::Idle);
            return;
        }

        let retry = self.retry.clone();
        let delay = self.success_settle_delay;
        let context = context.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if retry.is_current(generation) {
                retry.publish(&context, RetryState::Idle);
            }
        });
    }

    /// Counts a failure towards the degraded threshold.
    ///
    /// Cancellation is ignored. A decoding failure also puts health into
    /// [`HealthState::Error`] until the next success.
    pub fn record_failure(&self, error: &ApiError) {
        if !error.counts_as_failure() {
            return;
        }
        let next = {
            let mut inputs = self.inputs.lock();
            inputs.consecutive_failures = inputs.consecutive_failures.saturating_add(1);
            inputs.last_failure = Some(error.to_string());
            if matches!(error, ApiError::Decoding(_)) {
                inputs.fatal = Some(error.to_string());
            }
            debug!(
                consecutive_failures = inputs.consecutive_failures,
                "Failure recorded"
            );
            inputs.derive(self.degraded_threshold)
        };
        self.publish_health(next);
    }

    /// Resets the failure counter.
    pub fn record_success(&self) {
        let next = {
            let mut inputs = self.inputs.lock();
            inputs.consecutive_failures = 0;
            inputs.last_failure = None;
            inputs.fatal = None;
            inputs.derive(self.degraded_threshold)
        };
        self.publish_health(next);
    }

    /// Offline on disconnect. On reconnect, healthy or degraded depending on
    /// the failure counter; an error recorded before the disconnect is
    /// dropped.
    pub fn on_connectivity_change(&self, is_connected: bool) {
        let next = {
            let mut inputs = self.inputs.lock();
            if is_connected && !inputs.connected {
                inputs.fatal = None;
            }
            inputs.connected = is_connected;
            inputs.derive(self.degraded_threshold)
        };
        self.publish_health(next);
    }

    fn publish_health(&self, next: HealthState) {
        let changed = self.health_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next.clone();
                true
            }
        });
        if !changed {
            return;
        }

        info!(status = ?next.status(), message = ?next.message(), "Health changed");
        self.event_bus
            .emit(CoreEvent::Health(HealthEvent::Changed {
                status: next.status(),
                message: next.message(),
            }))
            .ok();
    }
}

#[async_trait]
impl ConnectivityObserver for ResilienceController {
    async fn on_connectivity_change(&self, state: ConnectivityState) {
        ResilienceController::on_connectivity_change(self, state.is_connected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientErrorKind;
    use core_runtime::events::HealthStatus;
    use std::sync::atomic::AtomicU32;
    use tokio::time::Instant;

    fn controller() -> ResilienceController {
        ResilienceController::new(
            RetryPolicy::default(),
            3,
            Duration::from_secs(1),
            EventBus::new(64),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_waits_two_then_four_seconds() {
        let controller = controller();
        let calls = Mutex::new(Vec::new());

        let result: Result<()> = controller
            .execute_with_retry("load events", || {
                calls.lock().push(Instant::now());
                async { Err(ApiError::Server { status: 503 }) }
            })
            .await;

        assert_eq!(result, Err(ApiError::Server { status: 503 }));
        let calls = calls.lock();
        assert_eq!(calls.len(), 3);
        assert_eq!((calls[1] - calls[0]).as_secs(), 2);
        assert_eq!((calls[2] - calls[1]).as_secs(), 4);
        assert!(matches!(
            controller.retry_state(),
            RetryState::Failed { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_invokes_operation_once() {
        let controller = controller();
        let calls = AtomicU32::new(0);

        let result: Result<()> = controller
            .execute_with_retry("load article", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ApiError::Client {
                        status: 404,
                        kind: ClientErrorKind::NotFound,
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(ApiError::Client { status: 404, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(controller.consecutive_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_retry_resets_counter() {
        let controller = controller();
        let calls = AtomicU32::new(0);

        let value = controller
            .execute_with_retry("load formations", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(ApiError::Timeout("30s".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(controller.consecutive_failures(), 0);
        assert_eq!(controller.retry_state(), RetryState::Succeeded);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(controller.retry_state(), RetryState::Idle);
    }

    #[tokio::test]
    async fn test_degraded_after_three_failures_then_healthy() {
        let controller = controller();
        let error = ApiError::Server { status: 500 };

        controller.record_failure(&error);
        controller.record_failure(&error);
        assert_eq!(controller.health(), HealthState::Healthy);

        controller.record_failure(&error);
        assert_eq!(controller.health().status(), HealthStatus::Degraded);

        controller.record_success();
        assert_eq!(controller.health(), HealthState::Healthy);
    }

    #[tokio::test]
    async fn test_connectivity_drives_health() {
        let controller = controller();
        let error = ApiError::Timeout("slow".into());

        controller.on_connectivity_change(false);
        assert_eq!(controller.health(), HealthState::Offline);

        for _ in 0..3 {
            controller.record_failure(&error);
        }
        assert_eq!(controller.health(), HealthState::Offline);

        controller.on_connectivity_change(true);
        assert_eq!(controller.health().status(), HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_decoding_failure_sets_error_until_success() {
        let controller = controller();
        controller.record_failure(&ApiError::Decoding("missing field".into()));
        assert_eq!(controller.health().status(), HealthStatus::Error);

        controller.record_success();
        assert_eq!(controller.health(), HealthState::Healthy);
    }

    #[tokio::test]
    async fn test_reconnect_after_decoding_failure_is_healthy() {
        let controller = controller();
        controller.record_failure(&ApiError::Decoding("missing field".into()));
        controller.on_connectivity_change(true);
        assert_eq!(controller.health().status(), HealthStatus::Error);

        controller.on_connectivity_change(false);
        assert_eq!(controller.health(), HealthState::Offline);

        controller.on_connectivity_change(true);
        assert_eq!(controller.health(), HealthState::Healthy);
    }

    #[tokio::test]
    async fn test_cancellation_is_not_a_failure() {
        let controller = controller();
        controller.record_failure(&ApiError::Cancelled);
        assert_eq!(controller.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_wait_leaves_idle() {
        let controller = Arc::new(controller());
        let cancel = CancellationToken::new();
        let mut retry_rx = controller.subscribe_retry_state();

        let task = {
            let controller = controller.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                controller
                    .execute_with_retry_cancellable("load services", &cancel, || async {
                        Err::<(), _>(ApiError::Connectivity("offline".into()))
                    })
                    .await
            })
        };

        loop {
            retry_rx.changed().await.unwrap();
            if matches!(*retry_rx.borrow_and_update(), RetryState::Waiting { .. }) {
                break;
            }
        }
        cancel.cancel();

        assert_eq!(task.await.unwrap(), Err(ApiError::Cancelled));
        assert_eq!(controller.retry_state(), RetryState::Idle);
        assert_eq!(controller.consecutive_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_publishes_each_second() {
        let controller = ResilienceController::new(
            RetryPolicy::default().with_max_attempts(2),
            3,
            Duration::ZERO,
            EventBus::new(64),
        );
        let bus = controller.event_bus.clone();
        let mut events = bus.subscribe();

        let _: Result<()> = controller
            .execute_with_retry("load categories", || async {
                Err(ApiError::Server { status: 502 })
            })
            .await;

        let mut messages = Vec::new();
        while let Ok(CoreEvent::Retry(RetryEvent::StateChanged { status_message, .. })) =
            events.try_recv()
        {
            messages.push(status_message);
        }
        assert_eq!(
            messages,
            vec![
                Some("Loading…".to_string()),
                Some("Retry in 2s…".to_string()),
                Some("Retry in 1s…".to_string()),
                Some("Retrying (2/2)…".to_string()),
                Some("load categories failed: Server error (HTTP 502)".to_string()),
            ]
        );
    }
}
