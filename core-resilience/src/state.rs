use core_runtime::events::HealthStatus;
use serde::Serialize;

/// Progress of the resilient operation currently in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RetryState {
    Idle,
    Retrying { attempt: u32, max_attempts: u32 },
    Waiting { seconds_remaining: u64 },
    Succeeded,
    Failed { message: String },
}

impl RetryState {
    /// Short text for a transient status line. `None` when there is nothing
    /// to show.
    pub fn status_message(&self) -> Option<String> {
        match self {
            RetryState::Idle | RetryState::Succeeded => None,
            RetryState::Retrying { attempt: 1, .. } => Some("Loading…".to_string()),
            RetryState::Retrying {
                attempt,
                max_attempts,
            } => Some(format!("Retrying ({}/{})…", attempt, max_attempts)),
            RetryState::Waiting { seconds_remaining } => {
                Some(format!("Retry in {}s…", seconds_remaining))
            }
            RetryState::Failed { message } => Some(message.clone()),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            RetryState::Retrying { .. } | RetryState::Waiting { .. }
        )
    }
}

/// Process-wide service health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    /// Online, but recent remote calls keep failing.
    Degraded { reason: String },
    Offline,
    /// The backend answered with something no retry can fix.
    Error { message: String },
}

impl HealthState {
    pub fn status(&self) -> HealthStatus {
        match self {
            HealthState::Healthy => HealthStatus::Healthy,
            HealthState::Degraded { .. } => HealthStatus::Degraded,
            HealthState::Offline => HealthStatus::Offline,
            HealthState::Error { .. } => HealthStatus::Error,
        }
    }

    pub fn message(&self) -> Option<String> {
        match self {
            HealthState::Degraded { reason } => Some(reason.clone()),
            HealthState::Error { message } => Some(message.clone()),
            HealthState::Healthy | HealthState::Offline => None,
        }
    }

    /// Whether the UI should warn that data may be stale.
    pub fn shows_stale_banner(&self) -> bool {
        !matches!(self, HealthState::Healthy)
    }
}

/// Everything health is derived from.
#[derive(Debug, Clone, Default)]
pub(crate) struct HealthInputs {
    pub connected: bool,
    pub consecutive_failures: u32,
    pub last_failure: Option<String>,
    pub fatal: Option<String>,
}

impl HealthInputs {
    pub fn new() -> Self {
        Self {
            connected: true,
            ..Default::default()
        }
    }

    /// Offline wins over everything, then a fatal backend error, then the
    /// failure threshold.
    pub fn derive(&self, degraded_threshold: u32) -> HealthState {
        if !self.connected {
            return HealthState::Offline;
        }
        if let Some(message) = &self.fatal {
            return HealthState::Error {
                message: message.clone(),
            };
        }
        if self.consecutive_failures >= degraded_threshold {
            let reason = match &self.last_failure {
                Some(last) => format!(
                    "{} consecutive failures (last: {})",
                    self.consecutive_failures, last
                ),
                None => format!("{} consecutive failures", self.consecutive_failures),
            };
            return HealthState::Degraded { reason };
        }
        HealthState::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_messages() {
        assert_eq!(RetryState::Idle.status_message(), None);
        assert_eq!(
            RetryState::Retrying {
                attempt: 2,
                max_attempts: 3
            }
            .status_message()
            .as_deref(),
            Some("Retrying (2/3)…")
        );
        assert_eq!(
            RetryState::Waiting {
                seconds_remaining: 4
            }
            .status_message()
            .as_deref(),
            Some("Retry in 4s…")
        );
    }

    #[test]
    fn test_health_precedence() {
        let mut inputs = HealthInputs::new();
        assert_eq!(inputs.derive(3), HealthState::Healthy);

        inputs.consecutive_failures = 3;
        inputs.last_failure = Some("Server error (HTTP 502)".into());
        assert!(matches!(inputs.derive(3), HealthState::Degraded { .. }));

        inputs.fatal = Some("Malformed response".into());
        assert_eq!(inputs.derive(3).status(), HealthStatus::Error);

        inputs.connected = false;
        assert_eq!(inputs.derive(3), HealthState::Offline);
    }

    #[test]
    fn test_below_threshold_is_healthy() {
        let inputs = HealthInputs {
            connected: true,
            consecutive_failures: 2,
            last_failure: Some("timeout".into()),
            fatal: None,
        };
        assert_eq!(inputs.derive(3), HealthState::Healthy);
    }
}
