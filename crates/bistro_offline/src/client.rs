//! The client context object.

use crate::cache::EntityCache;
use crate::config::ClientConfig;
use crate::connectivity::Connectivity;
use crate::error::{FetchError, NetworkError, OfflineResult, WriteDeferred};
use crate::fetch::FetchOrchestrator;
use crate::model::{Mutation, NewReview, QueuedMutation, Restaurant, Review};
use crate::network::{with_timeout, FallbackCache, HttpApi, ReqwestTransport, RestaurantApi};
use crate::queue::{Confirmation, OfflineQueue, ReplayReport};
use crate::schema::{restaurant_schema, BY_RESTAURANT};
use bistro_storage::FileLog;
use bistro_store::{Database, Engine, EngineConfig, StoreError, StoreResult, TransactionMode};
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Result of a write that may have been deferred.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome<T> {
    /// The server accepted the write.
    Confirmed(T),
    /// The write was queued for replay.
    Deferred(WriteDeferred),
}

impl<T> WriteOutcome<T> {
    /// Whether the server accepted the write.
    pub fn is_confirmed(&self) -> bool {
        matches!(self, WriteOutcome::Confirmed(_))
    }

    /// The deferral, if the write was queued.
    pub fn deferred(&self) -> Option<&WriteDeferred> {
        match self {
            WriteOutcome::Deferred(d) => Some(d),
            WriteOutcome::Confirmed(_) => None,
        }
    }
}

struct ClientInner {
    db: Database,
    api: Arc<dyn RestaurantApi>,
    connectivity: Connectivity,
    config: ClientConfig,
    fetch: FetchOrchestrator,
    queue: OfflineQueue,
    restaurants: EntityCache<Restaurant>,
    reviews: EntityCache<Review>,
}

/// Offline-first access to restaurants and reviews.
///
/// Owns the database handle, the API, the connectivity flag and the
/// configuration. Cheap to clone; clones share everything.
///
/// ```rust,no_run
/// # async fn demo() -> bistro_offline::OfflineResult<()> {
/// use bistro_offline::{ClientConfig, NewReview, OfflineClient, WriteOutcome};
///
/// let client = OfflineClient::connect(ClientConfig::default().with_journal_path("bistro.journal")).await?;
/// let _listener = client.watch_connectivity();
///
/// let restaurants = client.fetch_restaurants().await?;
/// match client.submit_review(NewReview::new(restaurants[0].id, "Ann", 5, "great")).await? {
///     WriteOutcome::Confirmed(Some(review)) => println!("stored as {}", review.id),
///     WriteOutcome::Confirmed(None) => println!("stored"),
///     WriteOutcome::Deferred(deferred) => println!("{deferred}"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct OfflineClient {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for OfflineClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfflineClient")
            .field("db", &self.inner.db.name())
            .field("base_url", &self.inner.config.base_url)
            .field("online", &self.inner.connectivity.is_online())
            .finish_non_exhaustive()
    }
}

impl OfflineClient {
    /// Opens the restaurant database on `engine` and talks to `api`.
    ///
    /// # Errors
    ///
    /// [`OfflineError::Schema`](crate::OfflineError::Schema) if the database
    /// cannot be opened or migrated.
    pub async fn open(engine: &Engine, api: Arc<dyn RestaurantApi>, config: ClientConfig) -> OfflineResult<Self> {
        let db = restaurant_schema()?
            .open(engine, &config.db_name, config.db_version)
            .await?;
        info!(db = %config.db_name, version = db.version(), "offline client ready");

        let connectivity = Connectivity::default();
        let inner = ClientInner {
            fetch: FetchOrchestrator::new(db.clone(), Arc::clone(&api), connectivity.clone(), config.network_timeout),
            queue: OfflineQueue::new(db.clone()),
            restaurants: EntityCache::new(db.clone()),
            reviews: EntityCache::new(db.clone()),
            db,
            api,
            connectivity,
            config,
        };
        Ok(Self { inner: Arc::new(inner) })
    }

    /// Starts an engine and an HTTP client from `config` and opens the
    /// database.
    ///
    /// # Errors
    ///
    /// Journal, HTTP client or schema errors.
    pub async fn connect(config: ClientConfig) -> OfflineResult<Self> {
        let engine = match &config.journal_path {
            Some(path) => Engine::start(
                EngineConfig::new()
                    .journal(FileLog::open(path).map_err(StoreError::from)?)
                    .sync_on_commit(config.sync_on_commit),
            )?,
            None => Engine::in_memory()?,
        };

        let transport = ReqwestTransport::new(config.network_timeout)?;
        let api: Arc<dyn RestaurantApi> = if config.response_cache_capacity > 0 {
            Arc::new(HttpApi::new(
                config.base_url.clone(),
                FallbackCache::new(transport, config.response_cache_capacity),
            ))
        } else {
            Arc::new(HttpApi::new(config.base_url.clone(), transport))
        };
        Self::open(&engine, api, config).await
    }

    /// The database handle.
    pub fn database(&self) -> &Database {
        &self.inner.db
    }

    /// The connectivity flag. Flip it to report the network state.
    pub fn connectivity(&self) -> &Connectivity {
        &self.inner.connectivity
    }

    /// The configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// The offline write queue.
    pub fn queue(&self) -> &OfflineQueue {
        &self.inner.queue
    }

    /// The cache-first reader.
    pub fn fetcher(&self) -> &FetchOrchestrator {
        &self.inner.fetch
    }

    /// Every restaurant. See [`FetchOrchestrator::fetch_restaurants`].
    ///
    /// # Errors
    ///
    /// [`FetchError`] when neither cache nor network can answer.
    pub async fn fetch_restaurants(&self) -> Result<Vec<Restaurant>, FetchError> {
        self.inner.fetch.fetch_restaurants().await
    }

    /// Reviews of one restaurant. See [`FetchOrchestrator::fetch_reviews`].
    ///
    /// # Errors
    ///
    /// [`FetchError`] when neither cache nor network can answer.
    pub async fn fetch_reviews(&self, restaurant_id: i64) -> Result<Vec<Review>, FetchError> {
        self.inner.fetch.fetch_reviews(restaurant_id).await
    }

    /// One restaurant.
    ///
    /// # Errors
    ///
    /// [`FetchError::NotFound`] for an unknown id.
    pub async fn fetch_restaurant_by_id(&self, id: i64) -> Result<Restaurant, FetchError> {
        self.inner.fetch.fetch_restaurant_by_id(id).await
    }

    /// Restaurants serving `cuisine`.
    ///
    /// # Errors
    ///
    /// [`FetchError`] when neither cache nor network can answer.
    pub async fn fetch_restaurants_by_cuisine(&self, cuisine: &str) -> Result<Vec<Restaurant>, FetchError> {
        self.inner.fetch.fetch_restaurants_by_cuisine(cuisine).await
    }

    /// Restaurants in `neighborhood`.
    ///
    /// # Errors
    ///
    /// [`FetchError`] when neither cache nor network can answer.
    pub async fn fetch_restaurants_by_neighborhood(&self, neighborhood: &str) -> Result<Vec<Restaurant>, FetchError> {
        self.inner.fetch.fetch_restaurants_by_neighborhood(neighborhood).await
    }

    /// Restaurants matching both filters; `"all"` disables a filter.
    ///
    /// # Errors
    ///
    /// [`FetchError`] when neither cache nor network can answer.
    pub async fn fetch_restaurants_by_cuisine_and_neighborhood(
        &self,
        cuisine: &str,
        neighborhood: &str,
    ) -> Result<Vec<Restaurant>, FetchError> {
        self.inner
            .fetch
            .fetch_restaurants_by_cuisine_and_neighborhood(cuisine, neighborhood)
            .await
    }

    /// Distinct neighborhoods, in first-seen order.
    ///
    /// # Errors
    ///
    /// [`FetchError`] when neither cache nor network can answer.
    pub async fn fetch_neighborhoods(&self) -> Result<Vec<String>, FetchError> {
        self.inner.fetch.fetch_neighborhoods().await
    }

    /// Distinct cuisines, in first-seen order.
    ///
    /// # Errors
    ///
    /// [`FetchError`] when neither cache nor network can answer.
    pub async fn fetch_cuisines(&self) -> Result<Vec<String>, FetchError> {
        self.inner.fetch.fetch_cuisines().await
    }

    async fn network<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, NetworkError>>,
    ) -> Result<T, NetworkError> {
        if !self.inner.connectivity.is_online() {
            return Err(NetworkError::Offline);
        }
        with_timeout(self.inner.config.network_timeout, call).await
    }

    /// Posts a review, or queues it if the network does not confirm it.
    ///
    /// A confirmed review is also cached, see
    /// [`cache_confirmed_review`](Self::cache_confirmed_review). While offline
    /// the network is not tried at all.
    ///
    /// # Errors
    ///
    /// [`OfflineError::InvalidReview`](crate::OfflineError::InvalidReview)
    /// before anything is sent, or a store error if the write could not be
    /// queued.
    pub async fn submit_review(&self, review: NewReview) -> OfflineResult<WriteOutcome<Option<Review>>> {
        review.validate()?;
        let sent = self.network(self.inner.api.write_review(&review)).await;
        match sent {
            Ok(stored) => {
                info!(restaurant_id = review.restaurant_id, "review confirmed");
                if let Some(stored) = &stored {
                    if let Err(e) = self.cache_confirmed_review(stored).await {
                        warn!(review_id = stored.id, error = %e, "confirmed review not cached");
                    }
                }
                Ok(WriteOutcome::Confirmed(stored))
            }
            Err(reason) => {
                let restaurant_id = review.restaurant_id;
                let queue_key = self.inner.queue.enqueue(&QueuedMutation::review(review)).await?;
                Ok(WriteOutcome::Deferred(WriteDeferred {
                    queue_key,
                    restaurant_id,
                    reason,
                }))
            }
        }
    }

    /// Sets the favorite flag, or queues the change if the network does not
    /// confirm it.
    ///
    /// The cached restaurant reflects the new flag either way. A confirmed
    /// change yields the cached restaurant, if there is one.
    ///
    /// # Errors
    ///
    /// A store error if the change could not be queued.
    pub async fn toggle_favorite(
        &self,
        restaurant_id: i64,
        is_favorite: bool,
    ) -> OfflineResult<WriteOutcome<Option<Restaurant>>> {
        let sent = self.network(self.inner.api.set_favorite(restaurant_id, is_favorite)).await;
        match sent {
            Ok(server) => {
                let cached = self
                    .apply_favorite(restaurant_id, is_favorite, server.clone())
                    .await
                    .unwrap_or_else(|e| {
                        warn!(restaurant_id, error = %e, "confirmed favorite not cached");
                        server
                    });
                info!(restaurant_id, is_favorite, "favorite confirmed");
                Ok(WriteOutcome::Confirmed(cached))
            }
            Err(reason) => {
                let queue_key = self
                    .inner
                    .queue
                    .enqueue(&QueuedMutation::favorite(restaurant_id, is_favorite))
                    .await?;
                if let Err(e) = self.apply_favorite(restaurant_id, is_favorite, None).await {
                    warn!(restaurant_id, error = %e, "queued favorite not reflected in cache");
                }
                Ok(WriteOutcome::Deferred(WriteDeferred {
                    queue_key,
                    restaurant_id,
                    reason,
                }))
            }
        }
    }

    /// Adds a confirmed review to the cache without leaving a partial set
    /// behind.
    ///
    /// A restaurant whose reviews were never cached gets its full set from
    /// the server first, since a lone cached review would hide the others
    /// from every later cache-first read. When that read fails the review is
    /// left out and the next fetch loads it with the rest.
    async fn cache_confirmed_review(&self, review: &Review) -> StoreResult<()> {
        let cached = self
            .inner
            .reviews
            .get_by_index(BY_RESTAURANT, review.restaurant_id)
            .await?;
        if cached.is_empty() {
            match self.network(self.inner.api.read_reviews(review.restaurant_id)).await {
                Ok(all) => self.inner.reviews.put_all(&all).await?,
                Err(e) => {
                    debug!(restaurant_id = review.restaurant_id, error = %e, "review set not loaded, leaving it to the next read");
                    return Ok(());
                }
            }
        }
        self.inner.reviews.put(review).await?;
        Ok(())
    }

    async fn apply_favorite(
        &self,
        restaurant_id: i64,
        is_favorite: bool,
        server: Option<Restaurant>,
    ) -> StoreResult<Option<Restaurant>> {
        let updated = match server {
            Some(restaurant) => Some(restaurant),
            None => self.inner.restaurants.get_by_key(restaurant_id).await?.map(|mut r| {
                r.is_favorite = is_favorite;
                r
            }),
        };
        if let Some(restaurant) = &updated {
            self.inner.restaurants.put(restaurant).await?;
        }
        Ok(updated)
    }

    /// Sends every queued write, oldest first, and caches what the server
    /// confirms.
    ///
    /// Does nothing while offline. A pass already in progress is waited for.
    ///
    /// # Errors
    ///
    /// Store errors. Network failures are listed in the report instead.
    pub async fn replay_queue(&self) -> OfflineResult<ReplayReport> {
        if !self.inner.connectivity.is_online() {
            debug!("offline, replay skipped");
            return Ok(ReplayReport::default());
        }
        let report = self
            .inner
            .queue
            .replay(
                self.inner.api.as_ref(),
                self.inner.config.network_timeout,
                self.inner.config.replay.max_records,
            )
            .await?;

        for confirmation in &report.confirmed {
            let cached = match confirmation {
                Confirmation::Review { review: Some(review), .. } => self.cache_confirmed_review(review).await,
                Confirmation::Review { review: None, .. } => Ok(()),
                Confirmation::Favorite {
                    restaurant_id,
                    is_favorite,
                    restaurant,
                    ..
                } => self
                    .apply_favorite(*restaurant_id, *is_favorite, restaurant.clone())
                    .await
                    .map(|_| ()),
            };
            if let Err(e) = cached {
                warn!(queue_key = %confirmation.queue_key(), error = %e, "replayed write not cached");
            }
        }
        Ok(report)
    }

    /// Every queued write, oldest first.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn pending_mutations(&self) -> OfflineResult<Vec<QueuedMutation>> {
        Ok(self.inner.queue.pending().await?)
    }

    /// Queued reviews of one restaurant, oldest first, so a page can show
    /// what has not been sent yet.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn pending_reviews(&self, restaurant_id: i64) -> OfflineResult<Vec<NewReview>> {
        let queued = self.inner.queue.pending_for(restaurant_id).await?;
        Ok(queued
            .into_iter()
            .filter_map(|q| match q.mutation {
                Mutation::Review { review } => Some(review),
                Mutation::Favorite { .. } => None,
            })
            .collect())
    }

    /// Removes every record from the named store.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown store, or any other store error.
    pub async fn clear_store(&self, name: &str) -> OfflineResult<()> {
        let tx = self.inner.db.transaction(&[name], TransactionMode::ReadWrite);
        tx.object_store(name).clear().await?;
        tx.complete().await?;
        info!(store = name, "store cleared");
        Ok(())
    }

    /// Replays the queue whenever connectivity comes back online.
    ///
    /// Changes that arrive faster than the listener runs are seen as one, so
    /// any change observed while online counts as a reconnect; a brief
    /// offline spell between two reads still triggers a pass.
    ///
    /// The listener ends once every clone of the client is dropped. Must be
    /// called within a Tokio runtime.
    pub fn watch_connectivity(&self) -> JoinHandle<()> {
        let mut changes = self.inner.connectivity.subscribe();
        let client: Weak<ClientInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                if !*changes.borrow_and_update() {
                    continue;
                }
                let Some(inner) = client.upgrade() else {
                    break;
                };
                let client = OfflineClient { inner };
                if !client.inner.config.replay.on_reconnect {
                    debug!("reconnected, automatic replay disabled");
                    continue;
                }
                match client.replay_queue().await {
                    Ok(report) => info!(
                        confirmed = report.confirmed.len(),
                        failed = report.failed.len(),
                        "replayed queue after reconnect"
                    ),
                    Err(e) => warn!(error = %e, "replay after reconnect failed"),
                }
            }
        })
    }
}
