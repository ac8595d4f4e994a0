//! Cache-first reads.
//!
//! A read is answered from the entity cache whenever it has matching
//! records. Only an empty result goes to the network; what comes back is
//! written to the cache in one transaction before it is returned. Cached
//! data is never revalidated.

use crate::cache::EntityCache;
use crate::connectivity::Connectivity;
use crate::error::{FetchError, NetworkError, NetworkResult};
use crate::model::{Restaurant, Review};
use crate::network::{with_timeout, RestaurantApi};
use crate::schema::BY_RESTAURANT;
use bistro_store::Database;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Filter value that matches every cuisine or neighborhood.
pub const ANY: &str = "all";

/// Reads restaurants and reviews, cache first.
#[derive(Clone)]
pub struct FetchOrchestrator {
    restaurants: EntityCache<Restaurant>,
    reviews: EntityCache<Review>,
    api: Arc<dyn RestaurantApi>,
    connectivity: Connectivity,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for FetchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchOrchestrator")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl FetchOrchestrator {
    /// Creates an orchestrator over `db` and `api`.
    pub fn new(db: Database, api: Arc<dyn RestaurantApi>, connectivity: Connectivity, timeout: Option<Duration>) -> Self {
        Self {
            restaurants: EntityCache::new(db.clone()),
            reviews: EntityCache::new(db),
            api,
            connectivity,
            timeout,
        }
    }

    async fn network<T, F>(&self, call: F) -> NetworkResult<T>
    where
        F: Future<Output = NetworkResult<T>>,
    {
        if !self.connectivity.is_online() {
            return Err(NetworkError::Offline);
        }
        with_timeout(self.timeout, call).await
    }

    /// Every restaurant.
    ///
    /// # Errors
    ///
    /// [`FetchError::Unavailable`] if the cache is empty and the network read
    /// fails, or [`FetchError::Store`].
    pub async fn fetch_restaurants(&self) -> Result<Vec<Restaurant>, FetchError> {
        let cached = self.restaurants.get_all().await?;
        if !cached.is_empty() {
            debug!(count = cached.len(), "restaurants served from cache");
            return Ok(cached);
        }

        let fetched = self
            .network(self.api.read_restaurants())
            .await
            .map_err(|e| {
                warn!(error = %e, "restaurants unavailable");
                FetchError::Unavailable(e)
            })?;
        self.restaurants.put_all(&fetched).await?;
        info!(count = fetched.len(), "restaurants fetched and cached");
        Ok(fetched)
    }

    /// Reviews of one restaurant.
    ///
    /// # Errors
    ///
    /// [`FetchError::Unavailable`] if none are cached and the network read
    /// fails, or [`FetchError::Store`].
    pub async fn fetch_reviews(&self, restaurant_id: i64) -> Result<Vec<Review>, FetchError> {
        let cached = self.reviews.get_by_index(BY_RESTAURANT, restaurant_id).await?;
        if !cached.is_empty() {
            debug!(restaurant_id, count = cached.len(), "reviews served from cache");
            return Ok(cached);
        }

        let fetched = self
            .network(self.api.read_reviews(restaurant_id))
            .await
            .map_err(|e| {
                warn!(restaurant_id, error = %e, "reviews unavailable");
                FetchError::Unavailable(e)
            })?;
        self.reviews.put_all(&fetched).await?;
        info!(restaurant_id, count = fetched.len(), "reviews fetched and cached");
        Ok(fetched)
    }

    /// One restaurant.
    ///
    /// # Errors
    ///
    /// [`FetchError::NotFound`] if no restaurant has this id, or any error of
    /// [`fetch_restaurants`](Self::fetch_restaurants).
    pub async fn fetch_restaurant_by_id(&self, id: i64) -> Result<Restaurant, FetchError> {
        self.fetch_restaurants()
            .await?
            .into_iter()
            .find(|r| r.id == id)
            .ok_or(FetchError::NotFound(id))
    }

    /// Restaurants serving `cuisine`.
    ///
    /// # Errors
    ///
    /// As [`fetch_restaurants`](Self::fetch_restaurants).
    pub async fn fetch_restaurants_by_cuisine(&self, cuisine: &str) -> Result<Vec<Restaurant>, FetchError> {
        self.fetch_restaurants_by_cuisine_and_neighborhood(cuisine, ANY).await
    }

    /// Restaurants in `neighborhood`.
    ///
    /// # Errors
    ///
    /// As [`fetch_restaurants`](Self::fetch_restaurants).
    pub async fn fetch_restaurants_by_neighborhood(&self, neighborhood: &str) -> Result<Vec<Restaurant>, FetchError> {
        self.fetch_restaurants_by_cuisine_and_neighborhood(ANY, neighborhood).await
    }

    /// Restaurants matching both filters. [`ANY`] disables a filter.
    ///
    /// # Errors
    ///
    /// As [`fetch_restaurants`](Self::fetch_restaurants).
    pub async fn fetch_restaurants_by_cuisine_and_neighborhood(
        &self,
        cuisine: &str,
        neighborhood: &str,
    ) -> Result<Vec<Restaurant>, FetchError> {
        let mut restaurants = self.fetch_restaurants().await?;
        restaurants.retain(|r| {
            (cuisine == ANY || r.cuisine_type == cuisine) && (neighborhood == ANY || r.neighborhood == neighborhood)
        });
        Ok(restaurants)
    }

    /// Distinct neighborhoods, in first-seen order.
    ///
    /// # Errors
    ///
    /// As [`fetch_restaurants`](Self::fetch_restaurants).
    pub async fn fetch_neighborhoods(&self) -> Result<Vec<String>, FetchError> {
        let restaurants = self.fetch_restaurants().await?;
        Ok(distinct(restaurants.iter().map(|r| r.neighborhood.as_str())))
    }

    /// Distinct cuisines, in first-seen order.
    ///
    /// # Errors
    ///
    /// As [`fetch_restaurants`](Self::fetch_restaurants).
    pub async fn fetch_cuisines(&self) -> Result<Vec<String>, FetchError> {
        let restaurants = self.fetch_restaurants().await?;
        Ok(distinct(restaurants.iter().map(|r| r.cuisine_type.as_str())))
    }
}

fn distinct<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for value in values {
        if !seen.iter().any(|s| s == value) {
            seen.push(value.to_string());
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_keeps_first_seen_order() {
        let values = ["Manhattan", "Brooklyn", "Manhattan", "Queens", "Brooklyn"];
        assert_eq!(distinct(values.into_iter()), vec!["Manhattan", "Brooklyn", "Queens"]);
    }
}
