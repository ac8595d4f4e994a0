//! Response cache for GET requests.

use super::{ApiRequest, ApiResponse, Method, Transport};
use crate::error::NetworkResult;
use async_trait::async_trait;
use moka::sync::Cache;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// A [`Transport`] that answers repeated GETs from memory.
///
/// A GET with a cached response returns it at once and refreshes the entry
/// from the network in the background. A GET without one waits for the
/// network and caches a successful answer. Other methods always go to the
/// network and are never cached. Entries are keyed by URL.
pub struct FallbackCache<T> {
    inner: Arc<T>,
    responses: Cache<String, ApiResponse>,
}

impl<T> Clone for FallbackCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            responses: self.responses.clone(),
        }
    }
}

impl<T> fmt::Debug for FallbackCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackCache")
            .field("entries", &self.responses.entry_count())
            .finish_non_exhaustive()
    }
}

impl<T: Transport + 'static> FallbackCache<T> {
    /// Wraps `inner`, keeping at most `capacity` responses.
    pub fn new(inner: T, capacity: u64) -> Self {
        Self {
            inner: Arc::new(inner),
            responses: Cache::new(capacity),
        }
    }

    /// The cached response for `url`, if any.
    pub fn cached(&self, url: &str) -> Option<ApiResponse> {
        self.responses.get(url)
    }

    /// Drops every cached response.
    pub fn invalidate_all(&self) {
        self.responses.invalidate_all();
    }

    /// The wrapped transport.
    pub fn inner(&self) -> &T {
        &self.inner
    }

    fn refresh(&self, request: ApiRequest) {
        let inner = Arc::clone(&self.inner);
        let responses = self.responses.clone();
        tokio::spawn(async move {
            let url = request.url.clone();
            match inner.send(request).await {
                Ok(response) if response.is_success() => {
                    debug!(%url, "refreshed cached response");
                    responses.insert(url, response);
                }
                Ok(response) => debug!(%url, status = response.status, "refresh not cached"),
                Err(e) => warn!(%url, error = %e, "background refresh failed"),
            }
        });
    }
}

#[async_trait]
impl<T: Transport + 'static> Transport for FallbackCache<T> {
    async fn send(&self, request: ApiRequest) -> NetworkResult<ApiResponse> {
        if request.method != Method::Get {
            return self.inner.send(request).await;
        }

        if let Some(cached) = self.responses.get(&request.url) {
            debug!(url = %request.url, "serving cached response");
            self.refresh(request);
            return Ok(cached);
        }

        let url = request.url.clone();
        let response = self.inner.send(request).await?;
        if response.is_success() {
            self.responses.insert(url, response.clone());
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkError;
    use crate::network::MockTransport;
    use serde_json::json;
    use std::time::Duration;

    const URL: &str = "http://localhost:1337/restaurants";

    #[tokio::test]
    async fn hit_is_served_then_refreshed() {
        let transport = MockTransport::new();
        transport.respond(Method::Get, URL, ApiResponse::ok(json!([1])));
        let cache = FallbackCache::new(transport, 16);

        assert_eq!(cache.send(ApiRequest::get(URL)).await.unwrap().body, json!([1]));

        cache.inner().respond(Method::Get, URL, ApiResponse::ok(json!([1, 2])));
        assert_eq!(cache.send(ApiRequest::get(URL)).await.unwrap().body, json!([1]));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.send(ApiRequest::get(URL)).await.unwrap().body, json!([1, 2]));
        assert_eq!(cache.inner().requests().len(), 3);
    }

    #[tokio::test]
    async fn hit_survives_network_loss() {
        let transport = MockTransport::new();
        transport.respond(Method::Get, URL, ApiResponse::ok(json!([1])));
        let cache = FallbackCache::new(transport, 16);
        cache.send(ApiRequest::get(URL)).await.unwrap();

        cache.inner().fail(Method::Get, URL, NetworkError::transport("connection refused"));
        assert_eq!(cache.send(ApiRequest::get(URL)).await.unwrap().body, json!([1]));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.cached(URL).unwrap().body, json!([1]));
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let transport = MockTransport::new();
        transport.respond(Method::Get, URL, ApiResponse::new(503, json!(null)));
        let cache = FallbackCache::new(transport, 16);
        assert_eq!(cache.send(ApiRequest::get(URL)).await.unwrap().status, 503);
        assert!(cache.cached(URL).is_none());
    }

    #[tokio::test]
    async fn writes_are_never_cached() {
        let url = "http://localhost:1337/reviews/";
        let transport = MockTransport::new();
        transport.respond(Method::Post, url, ApiResponse::new(201, json!({"id": 1})));
        let cache = FallbackCache::new(transport, 16);

        cache.send(ApiRequest::post(url, json!({}))).await.unwrap();
        cache.send(ApiRequest::post(url, json!({}))).await.unwrap();
        assert!(cache.cached(url).is_none());
        assert_eq!(cache.inner().requests().len(), 2);
    }
}
