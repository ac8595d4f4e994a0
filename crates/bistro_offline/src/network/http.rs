//! HTTP implementation of the restaurant API.

use super::{ApiRequest, ApiResponse, Method, RestaurantApi, Transport};
use crate::error::{NetworkError, NetworkResult};
use crate::model::{NewReview, Restaurant, Review};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// [`Transport`] backed by a `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Builds a client with an optional overall request timeout.
    ///
    /// # Errors
    ///
    /// [`NetworkError::Transport`] if the TLS backend cannot be initialized.
    pub fn new(timeout: Option<Duration>) -> NetworkResult<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("bistro/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| NetworkError::transport(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: ApiRequest) -> NetworkResult<ApiResponse> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
            Method::Put => self.client.put(&request.url),
        };
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(map_reqwest)?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(map_reqwest)?;
        let body = if bytes.iter().all(u8::is_ascii_whitespace) {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).map_err(|e| NetworkError::decode(format!("{}: {e}", request.url)))?
        };
        debug!(method = %request.method, url = %request.url, status, "response received");
        Ok(ApiResponse { status, body })
    }
}

fn map_reqwest(err: reqwest::Error) -> NetworkError {
    if err.is_timeout() {
        NetworkError::Timeout
    } else {
        NetworkError::transport(err.to_string())
    }
}

/// The restaurant API spoken over a [`Transport`].
///
/// Endpoints, relative to the base URL:
///
/// | call               | request                                    |
/// |--------------------|--------------------------------------------|
/// | `read_restaurants` | `GET /restaurants`                         |
/// | `read_reviews`     | `GET /reviews/?restaurant_id={id}`         |
/// | `write_review`     | `POST /reviews/` with the review as JSON   |
/// | `set_favorite`     | `PUT /restaurants/{id}/?is_favorite={b}`   |
#[derive(Debug, Clone)]
pub struct HttpApi<T> {
    base_url: String,
    transport: T,
}

impl<T: Transport> HttpApi<T> {
    /// Creates an API client for `base_url`.
    pub fn new(base_url: impl Into<String>, transport: T) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            transport,
        }
    }

    /// The base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn call(&self, request: ApiRequest) -> NetworkResult<Value> {
        let url = request.url.clone();
        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(NetworkError::Status {
                status: response.status,
                url,
            });
        }
        Ok(response.body)
    }
}

fn decode<D: DeserializeOwned>(what: &str, body: Value) -> NetworkResult<D> {
    serde_json::from_value(body).map_err(|e| NetworkError::decode(format!("{what}: {e}")))
}

/// Overlays the fields the server echoed onto the payload that was sent.
fn merge_echo(payload: Value, echo: Value) -> Value {
    match (payload, echo) {
        (Value::Object(mut sent), Value::Object(echoed)) => {
            sent.extend(echoed);
            Value::Object(sent)
        }
        (sent, Value::Null) => sent,
        (_, echoed) => echoed,
    }
}

#[async_trait]
impl<T: Transport> RestaurantApi for HttpApi<T> {
    async fn read_restaurants(&self) -> NetworkResult<Vec<Restaurant>> {
        let body = self.call(ApiRequest::get(self.url("/restaurants"))).await?;
        decode("restaurants", body)
    }

    async fn read_reviews(&self, restaurant_id: i64) -> NetworkResult<Vec<Review>> {
        let url = self.url(&format!("/reviews/?restaurant_id={restaurant_id}"));
        let body = self.call(ApiRequest::get(url)).await?;
        decode("reviews", body)
    }

    async fn write_review(&self, review: &NewReview) -> NetworkResult<Option<Review>> {
        let payload = serde_json::to_value(review).map_err(|e| NetworkError::decode(e.to_string()))?;
        let body = self.call(ApiRequest::post(self.url("/reviews/"), payload.clone())).await?;
        // Past this point the server holds the review; only the echo can be wrong.
        let stored = merge_echo(payload, body);
        match serde_json::from_value(stored) {
            Ok(review) => Ok(Some(review)),
            Err(e) => {
                warn!(restaurant_id = review.restaurant_id, error = %e, "ignoring unreadable review response");
                Ok(None)
            }
        }
    }

    async fn set_favorite(&self, restaurant_id: i64, is_favorite: bool) -> NetworkResult<Option<Restaurant>> {
        let url = self.url(&format!("/restaurants/{restaurant_id}/?is_favorite={is_favorite}"));
        let body = self.call(ApiRequest::put(url)).await?;
        if body.is_null() {
            return Ok(None);
        }
        // The write already succeeded; an odd echo must not turn it into a failure.
        match serde_json::from_value(body) {
            Ok(restaurant) => Ok(Some(restaurant)),
            Err(e) => {
                warn!(restaurant_id, error = %e, "ignoring unreadable favorite response");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::MockTransport;
    use serde_json::json;

    fn api() -> HttpApi<MockTransport> {
        HttpApi::new("http://localhost:1337/", MockTransport::new())
    }

    #[tokio::test]
    async fn reads_restaurants() {
        let api = api();
        api.transport().respond(
            Method::Get,
            "http://localhost:1337/restaurants",
            ApiResponse::ok(json!([{"id": 1, "name": "Mission Chinese Food"}])),
        );
        let restaurants = api.read_restaurants().await.unwrap();
        assert_eq!(restaurants.len(), 1);
        assert_eq!(restaurants[0].name, "Mission Chinese Food");
    }

    #[tokio::test]
    async fn reviews_query_by_restaurant() {
        let api = api();
        api.transport().respond(
            Method::Get,
            "http://localhost:1337/reviews/?restaurant_id=7",
            ApiResponse::ok(json!([{"id": 3, "restaurant_id": "7", "name": "Ann", "rating": 5, "comments": "ok"}])),
        );
        let reviews = api.read_reviews(7).await.unwrap();
        assert_eq!(reviews[0].restaurant_id, 7);
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let api = api();
        api.transport().respond(
            Method::Get,
            "http://localhost:1337/restaurants",
            ApiResponse::new(500, Value::Null),
        );
        let err = api.read_restaurants().await.unwrap_err();
        assert_eq!(
            err,
            NetworkError::Status {
                status: 500,
                url: "http://localhost:1337/restaurants".into()
            }
        );
    }

    #[tokio::test]
    async fn posts_review_payload() {
        let api = api();
        api.transport().respond(
            Method::Post,
            "http://localhost:1337/reviews/",
            ApiResponse::new(201, json!({"id": 40, "restaurant_id": 7, "name": "Ann", "rating": 5, "comments": "great"})),
        );
        let review = api.write_review(&NewReview::new(7, "Ann", 5, "great")).await.unwrap().unwrap();
        assert_eq!(review.id, 40);

        let sent = api.transport().requests();
        assert_eq!(sent[0].body.as_ref().unwrap()["comments"], json!("great"));
    }

    #[tokio::test]
    async fn partial_review_echo_is_completed_from_payload() {
        let api = api();
        api.transport().respond(
            Method::Post,
            "http://localhost:1337/reviews/",
            ApiResponse::new(201, json!({"id": 9, "restaurant_id": 7})),
        );
        let review = api.write_review(&NewReview::new(7, "Ann", 5, "great")).await.unwrap().unwrap();
        assert_eq!(review.id, 9);
        assert_eq!(review.name, "Ann");
        assert_eq!(review.comments, "great");
    }

    #[tokio::test]
    async fn accepted_review_without_id_is_still_confirmed() {
        let api = api();
        api.transport().respond(
            Method::Post,
            "http://localhost:1337/reviews/",
            ApiResponse::new(201, json!({"status": "created"})),
        );
        assert_eq!(api.write_review(&NewReview::new(7, "Ann", 5, "great")).await, Ok(None));

        api.transport().respond(Method::Post, "http://localhost:1337/reviews/", ApiResponse::new(204, Value::Null));
        assert_eq!(api.write_review(&NewReview::new(7, "Ann", 5, "great")).await, Ok(None));
    }

    #[tokio::test]
    async fn favorite_tolerates_empty_response() {
        let api = api();
        api.transport().respond(
            Method::Put,
            "http://localhost:1337/restaurants/3/?is_favorite=true",
            ApiResponse::ok(Value::Null),
        );
        assert_eq!(api.set_favorite(3, true).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unrouted_request_fails() {
        let api = api();
        assert!(matches!(api.read_restaurants().await, Err(NetworkError::Transport(_))));
    }
}
