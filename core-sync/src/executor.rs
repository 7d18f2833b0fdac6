//! Turns a queued operation into its remote call.

use crate::error::{Result, SyncError};
use crate::operation::{OperationKind, PendingOperation};
use async_trait::async_trait;
use bridge_traits::{HttpClient, HttpMethod, HttpRequest};
use core_resilience::{ApiError, ResilienceController};
use std::sync::Arc;
use tracing::debug;

/// Executes one queued operation against the server.
///
/// Return [`ApiError::InvalidState`] for an operation that can never be sent
/// (bad payload). The queue drops it instead of retrying.
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    async fn execute(&self, operation: &PendingOperation) -> core_resilience::Result<()>;
}

/// REST mapping of each [`OperationKind`].
///
/// | Kind                    | Request                              |
/// |-------------------------|--------------------------------------|
/// | `addFavorite`           | `POST   {base}/favorites/{id}`         |
/// | `removeFavorite`        | `DELETE {base}/favorites/{id}`         |
/// | `addServiceFavorite`    | `POST   {base}/favorites/services/{id}`|
/// | `removeServiceFavorite` | `DELETE {base}/favorites/services/{id}`|
/// | `registerEvent`         | `POST   {base}/events/{id}/register`   |
/// | `unregisterEvent`       | `DELETE {base}/events/{id}/register`   |
pub struct HttpOperationExecutor {
    http: Arc<dyn HttpClient>,
    base_url: String,
    resilience: Option<Arc<ResilienceController>>,
}

impl HttpOperationExecutor {
    pub fn new(http: Arc<dyn HttpClient>, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            resilience: None,
        }
    }

    /// Builds from the configured `api_base_url`.
    pub fn from_config(config: &core_runtime::CoreConfig) -> Result<Self> {
        let base_url = config
            .api_base_url
            .clone()
            .ok_or(SyncError::MissingBaseUrl)?;
        Ok(Self::new(config.http_client.clone(), base_url))
    }

    /// Runs each call through the controller's retry loop.
    pub fn with_resilience(mut self, controller: Arc<ResilienceController>) -> Self {
        self.resilience = Some(controller);
        self
    }

    pub fn request_for(&self, operation: &PendingOperation) -> core_resilience::Result<HttpRequest> {
        let id = operation.target_id().ok_or_else(|| {
            ApiError::InvalidState(format!(
                "{} operation {} has no numeric target id",
                operation.kind, operation.id
            ))
        })?;

        let (method, path) = match operation.kind {
            OperationKind::AddFavorite => (HttpMethod::Post, format!("favorites/{}", id)),
            OperationKind::RemoveFavorite => (HttpMethod::Delete, format!("favorites/{}", id)),
            OperationKind::AddServiceFavorite => {
                (HttpMethod::Post, format!("favorites/services/{}", id))
            }
            OperationKind::RemoveServiceFavorite => {
                (HttpMethod::Delete, format!("favorites/services/{}", id))
            }
            OperationKind::RegisterEvent => (HttpMethod::Post, format!("events/{}/register", id)),
            OperationKind::UnregisterEvent => {
                (HttpMethod::Delete, format!("events/{}/register", id))
            }
        };

        Ok(HttpRequest::new(method, format!("{}/{}", self.base_url, path)))
    }

    async fn send(&self, request: HttpRequest) -> core_resilience::Result<()> {
        let response = self.http.execute(request).await?;
        ApiError::check_response(response)?;
        Ok(())
    }
}

#[async_trait]
impl OperationExecutor for HttpOperationExecutor {
    async fn execute(&self, operation: &PendingOperation) -> core_resilience::Result<()> {
        let request = self.request_for(operation)?;
        debug!(operation_id = %operation.id, method = ?request.method, url = %request.url, "Replaying operation");

        match &self.resilience {
            Some(controller) => {
                let context = format!("sync {}", operation.kind);
                controller
                    .execute_with_retry(&context, || self.send(request.clone()))
                    .await
            }
            None => self.send(request).await,
        }
    }
}
