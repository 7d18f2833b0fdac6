//! What can be downloaded, and how to look it up remotely.

use async_trait::async_trait;
use bridge_traits::{HttpClient, HttpRequest};
use core_resilience::{ApiError, ResilienceController};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;

/// A content record that can be stored for offline use.
pub trait OfflineItem: Serialize + Send + Sync {
    fn item_id(&self) -> i64;

    /// Image stored next to the record, if any.
    fn image_url(&self) -> Option<String> {
        None
    }
}

/// Remote lookup of a full record by id.
#[async_trait]
pub trait ItemFetcher<T>: Send + Sync {
    async fn fetch_item(&self, item_id: i64) -> core_resilience::Result<T>;
}

/// `GET` against a URL template containing `{id}`, e.g.
/// `https://api.example.com/formations/{id}`.
pub struct HttpItemFetcher<T> {
    http: Arc<dyn HttpClient>,
    url_template: String,
    resilience: Option<Arc<ResilienceController>>,
    _item: PhantomData<fn() -> T>,
}

impl<T> HttpItemFetcher<T> {
    pub fn new(http: Arc<dyn HttpClient>, url_template: impl Into<String>) -> Self {
        Self {
            http,
            url_template: url_template.into(),
            resilience: None,
            _item: PhantomData,
        }
    }

    pub fn with_resilience(mut self, controller: Arc<ResilienceController>) -> Self {
        self.resilience = Some(controller);
        self
    }

    pub fn url_for(&self, item_id: i64) -> String {
        self.url_template.replace("{id}", &item_id.to_string())
    }
}

impl<T: DeserializeOwned> HttpItemFetcher<T> {
    async fn fetch_once(&self, url: &str) -> core_resilience::Result<T> {
        let response = self.http.execute(HttpRequest::get(url)).await?;
        ApiError::decode_response(response)
    }
}

#[async_trait]
impl<T: DeserializeOwned + Send + 'static> ItemFetcher<T> for HttpItemFetcher<T> {
    async fn fetch_item(&self, item_id: i64) -> core_resilience::Result<T> {
        let url = self.url_for(item_id);
        match &self.resilience {
            Some(controller) => {
                let context = format!("fetch item {}", item_id);
                controller
                    .execute_with_retry(&context, || self.fetch_once(&url))
                    .await
            }
            None => self.fetch_once(&url).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::HttpResponse;
    use mockall::mock;
    use serde::Deserialize;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        }
    }

    #[derive(Debug, PartialEq, Deserialize)]
    struct Formation {
        id: i64,
        title: String,
    }

    #[tokio::test]
    async fn test_fetch_by_template() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .withf(|request| request.url == "https://api.example.com/formations/12")
            .times(1)
            .returning(|_| Ok(HttpResponse::new(200, r#"{"id":12,"title":"Rust"}"#)));

        let fetcher: HttpItemFetcher<Formation> =
            HttpItemFetcher::new(Arc::new(http), "https://api.example.com/formations/{id}");
        let formation = fetcher.fetch_item(12).await.unwrap();

        assert_eq!(
            formation,
            Formation {
                id: 12,
                title: "Rust".into()
            }
        );
    }

    #[tokio::test]
    async fn test_not_found_is_client_error() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .returning(|_| Ok(HttpResponse::new(404, "")));

        let fetcher: HttpItemFetcher<Formation> =
            HttpItemFetcher::new(Arc::new(http), "https://api.example.com/formations/{id}");
        let err = fetcher.fetch_item(1).await.unwrap_err();
        assert!(matches!(err, ApiError::Client { status: 404, .. }));
    }
}
