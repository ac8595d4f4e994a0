//! Scriptable stand-ins for the network.

use super::{ApiRequest, ApiResponse, Method, RestaurantApi, Transport};
use crate::error::{NetworkError, NetworkResult};
use crate::model::{NewReview, Restaurant, Review};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// A [`Transport`] that answers from a routing table.
///
/// Unrouted requests fail with a transport error.
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<(Method, String), NetworkResult<ApiResponse>>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl MockTransport {
    /// Creates a transport with no routes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `method url` with `response` from now on.
    pub fn respond(&self, method: Method, url: &str, response: ApiResponse) {
        self.routes.lock().insert((method, url.to_string()), Ok(response));
    }

    /// Fails `method url` with `error` from now on.
    pub fn fail(&self, method: Method, url: &str, error: NetworkError) {
        self.routes.lock().insert((method, url.to_string()), Err(error));
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: ApiRequest) -> NetworkResult<ApiResponse> {
        let route = (request.method, request.url.clone());
        self.requests.lock().push(request);
        self.routes
            .lock()
            .get(&route)
            .cloned()
            .unwrap_or_else(|| Err(NetworkError::transport(format!("no route for {} {}", route.0, route.1))))
    }
}

/// A call received by [`MockApi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    /// `read_restaurants`.
    ReadRestaurants,
    /// `read_reviews`.
    ReadReviews(i64),
    /// `write_review`.
    WriteReview(NewReview),
    /// `set_favorite`.
    SetFavorite {
        /// Target restaurant.
        restaurant_id: i64,
        /// Requested flag.
        is_favorite: bool,
    },
}

#[derive(Debug)]
struct MockState {
    online: bool,
    restaurants: Vec<Restaurant>,
    reviews: Vec<Review>,
    write_script: VecDeque<NetworkResult<()>>,
    calls: Vec<ApiCall>,
    next_review_id: i64,
}

/// An in-memory restaurant server.
///
/// Reads serve the seeded data. Writes succeed while online unless a
/// scripted outcome says otherwise; accepted reviews get increasing ids and
/// show up in later reads. Every call is recorded, including failed ones.
#[derive(Debug)]
pub struct MockApi {
    state: Mutex<MockState>,
}

impl Default for MockApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockApi {
    /// An empty, online server.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                online: true,
                restaurants: Vec::new(),
                reviews: Vec::new(),
                write_script: VecDeque::new(),
                calls: Vec::new(),
                next_review_id: 1,
            }),
        }
    }

    /// Seeds the restaurant list.
    #[must_use]
    pub fn with_restaurants(self, restaurants: Vec<Restaurant>) -> Self {
        self.state.lock().restaurants = restaurants;
        self
    }

    /// Seeds reviews. New reviews are numbered after the highest seeded id.
    #[must_use]
    pub fn with_reviews(self, reviews: Vec<Review>) -> Self {
        {
            let mut state = self.state.lock();
            state.next_review_id = reviews.iter().map(|r| r.id + 1).max().unwrap_or(1);
            state.reviews = reviews;
        }
        self
    }

    /// Makes every call fail with a transport error while `false`.
    pub fn set_online(&self, online: bool) {
        self.state.lock().online = online;
    }

    /// Queues the outcome of the next write. Scripted outcomes are consumed
    /// in order, one per write, before the online flag is consulted.
    pub fn script_write(&self, outcome: NetworkResult<()>) {
        self.state.lock().write_script.push_back(outcome);
    }

    /// Every call received, in order.
    pub fn calls(&self) -> Vec<ApiCall> {
        self.state.lock().calls.clone()
    }

    /// Number of calls received.
    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// Reviews the server has accepted, in order.
    pub fn reviews(&self) -> Vec<Review> {
        self.state.lock().reviews.clone()
    }

    /// The server's copy of a restaurant.
    pub fn restaurant(&self, id: i64) -> Option<Restaurant> {
        self.state.lock().restaurants.iter().find(|r| r.id == id).cloned()
    }

    fn read(&self, call: ApiCall) -> NetworkResult<parking_lot::MutexGuard<'_, MockState>> {
        let mut state = self.state.lock();
        state.calls.push(call);
        if !state.online {
            return Err(NetworkError::transport("connection refused"));
        }
        Ok(state)
    }

    fn write(&self, call: ApiCall) -> NetworkResult<parking_lot::MutexGuard<'_, MockState>> {
        let mut state = self.state.lock();
        state.calls.push(call);
        match state.write_script.pop_front() {
            Some(Err(e)) => return Err(e),
            Some(Ok(())) => {}
            None if !state.online => return Err(NetworkError::transport("connection refused")),
            None => {}
        }
        Ok(state)
    }
}

#[async_trait]
impl RestaurantApi for MockApi {
    async fn read_restaurants(&self) -> NetworkResult<Vec<Restaurant>> {
        Ok(self.read(ApiCall::ReadRestaurants)?.restaurants.clone())
    }

    async fn read_reviews(&self, restaurant_id: i64) -> NetworkResult<Vec<Review>> {
        let state = self.read(ApiCall::ReadReviews(restaurant_id))?;
        Ok(state
            .reviews
            .iter()
            .filter(|r| r.restaurant_id == restaurant_id)
            .cloned()
            .collect())
    }

    async fn write_review(&self, review: &NewReview) -> NetworkResult<Option<Review>> {
        let mut state = self.write(ApiCall::WriteReview(review.clone()))?;
        let id = state.next_review_id;
        state.next_review_id += 1;
        let stored = Review {
            id,
            restaurant_id: review.restaurant_id,
            name: review.name.clone(),
            rating: review.rating,
            comments: review.comments.clone(),
            created_at: None,
            updated_at: None,
        };
        state.reviews.push(stored.clone());
        Ok(Some(stored))
    }

    async fn set_favorite(&self, restaurant_id: i64, is_favorite: bool) -> NetworkResult<Option<Restaurant>> {
        let mut state = self.write(ApiCall::SetFavorite {
            restaurant_id,
            is_favorite,
        })?;
        Ok(state
            .restaurants
            .iter_mut()
            .find(|r| r.id == restaurant_id)
            .map(|r| {
                r.is_favorite = is_favorite;
                r.clone()
            }))
    }
}
