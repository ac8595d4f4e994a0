//! Network boundary.
//!
//! [`RestaurantApi`] is what the rest of the crate talks to. [`HttpApi`]
//! implements it on top of a raw [`Transport`], which is either
//! [`ReqwestTransport`] or a [`FallbackCache`] wrapping one. [`MockApi`] and
//! [`MockTransport`] are scriptable stand-ins for tests.

mod fallback;
mod http;
mod mock;

pub use fallback::FallbackCache;
pub use http::{HttpApi, ReqwestTransport};
pub use mock::{ApiCall, MockApi, MockTransport};

use crate::error::{NetworkError, NetworkResult};
use crate::model::{NewReview, Restaurant, Review};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Calls the restaurant API.
#[async_trait]
pub trait RestaurantApi: Send + Sync {
    /// Every restaurant.
    async fn read_restaurants(&self) -> NetworkResult<Vec<Restaurant>>;

    /// Reviews of one restaurant.
    async fn read_reviews(&self, restaurant_id: i64) -> NetworkResult<Vec<Review>>;

    /// Posts a review. Any success status confirms the write; the stored
    /// record is returned when the server's answer can be read as one.
    async fn write_review(&self, review: &NewReview) -> NetworkResult<Option<Review>>;

    /// Sets the favorite flag. Returns the updated restaurant when the
    /// server sends one back.
    async fn set_favorite(&self, restaurant_id: i64, is_favorite: bool) -> NetworkResult<Option<Restaurant>>;
}

#[async_trait]
impl<A: RestaurantApi + ?Sized> RestaurantApi for Arc<A> {
    async fn read_restaurants(&self) -> NetworkResult<Vec<Restaurant>> {
        (**self).read_restaurants().await
    }

    async fn read_reviews(&self, restaurant_id: i64) -> NetworkResult<Vec<Review>> {
        (**self).read_reviews(restaurant_id).await
    }

    async fn write_review(&self, review: &NewReview) -> NetworkResult<Option<Review>> {
        (**self).write_review(review).await
    }

    async fn set_favorite(&self, restaurant_id: i64, is_favorite: bool) -> NetworkResult<Option<Restaurant>> {
        (**self).set_favorite(restaurant_id, is_favorite).await
    }
}

/// HTTP method of an [`ApiRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET.
    Get,
    /// POST.
    Post,
    /// PUT.
    Put,
}

impl Method {
    /// Upper-case method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw API request.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// Method.
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    /// JSON body, if any.
    pub body: Option<Value>,
}

impl ApiRequest {
    /// A GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            body: None,
        }
    }

    /// A POST request with a JSON body.
    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            body: Some(body),
        }
    }

    /// A PUT request without a body.
    pub fn put(url: impl Into<String>) -> Self {
        Self {
            method: Method::Put,
            url: url.into(),
            body: None,
        }
    }
}

/// A raw API response. Bodies that are empty decode as `null`.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// JSON body.
    pub body: Value,
}

impl ApiResponse {
    /// A response with `status` and `body`.
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// A 200 response.
    pub fn ok(body: Value) -> Self {
        Self::new(200, body)
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends raw requests.
///
/// Implementations report transport failures as errors and hand back every
/// response that arrived, whatever its status.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one request.
    async fn send(&self, request: ApiRequest) -> NetworkResult<ApiResponse>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: ApiRequest) -> NetworkResult<ApiResponse> {
        (**self).send(request).await
    }
}

/// Runs `call` with an optional deadline.
///
/// A call that misses the deadline fails with [`NetworkError::Timeout`]; if
/// it completes later anyway, its result is dropped.
///
/// # Errors
///
/// The call's own error, or [`NetworkError::Timeout`].
pub async fn with_timeout<T, F>(timeout: Option<Duration>, call: F) -> NetworkResult<T>
where
    F: Future<Output = NetworkResult<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| NetworkError::Timeout)?,
        None => call.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slow_call_times_out() {
        let result: NetworkResult<()> = with_timeout(Some(Duration::from_millis(10)), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(NetworkError::Timeout));
    }

    #[tokio::test]
    async fn no_deadline_waits() {
        let result = with_timeout(None, async { Ok::<_, NetworkError>(5) }).await;
        assert_eq!(result, Ok(5));
    }

    #[test]
    fn success_range() {
        assert!(ApiResponse::new(201, Value::Null).is_success());
        assert!(!ApiResponse::new(404, Value::Null).is_success());
        assert_eq!(Method::Put.to_string(), "PUT");
    }
}
