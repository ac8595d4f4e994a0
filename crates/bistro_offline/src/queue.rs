//! Durable queue of writes the network has not confirmed.
//!
//! Records live in the `offline-queue` store under autoincrementing keys, so
//! key order is submission order. Replay walks the queue oldest first, one
//! record at a time:
//!
//! 1. a fresh read-only transaction opens a cursor just past the last key
//!    seen and takes the first record, then ends
//! 2. the write is sent with no transaction open
//! 3. on success the record is deleted in its own read-write transaction;
//!    on failure it stays where it is
//!
//! A record is therefore deleted only after its confirmation arrived, and a
//! failed record never blocks the ones behind it.

use crate::error::{NetworkError, NetworkResult};
use crate::model::{Mutation, QueuedMutation, Restaurant, Review};
use crate::network::{with_timeout, RestaurantApi};
use crate::schema::{BY_RESTAURANT, OFFLINE_QUEUE};
use bistro_store::{CursorDirection, Database, Key, KeyRange, StoreError, StoreResult, TransactionMode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A queued write the server accepted during replay.
#[derive(Debug, Clone, PartialEq)]
pub enum Confirmation {
    /// A review was stored.
    Review {
        /// Key of the deleted queue record.
        queue_key: Key,
        /// The review as stored by the server, when its answer could be
        /// read as one.
        review: Option<Review>,
    },
    /// A favorite flag was set.
    Favorite {
        /// Key of the deleted queue record.
        queue_key: Key,
        /// Target restaurant.
        restaurant_id: i64,
        /// Flag value sent.
        is_favorite: bool,
        /// The updated restaurant, when the server sent one.
        restaurant: Option<Restaurant>,
    },
}

impl Confirmation {
    /// Key of the queue record this confirmed.
    pub fn queue_key(&self) -> &Key {
        match self {
            Confirmation::Review { queue_key, .. } | Confirmation::Favorite { queue_key, .. } => queue_key,
        }
    }
}

/// A queued write that failed again during replay.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayFailure {
    /// Key of the record, still queued.
    pub queue_key: Key,
    /// Target restaurant.
    pub restaurant_id: i64,
    /// Why it failed.
    pub reason: NetworkError,
}

/// What a replay pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayReport {
    /// Records sent to the network.
    pub attempted: usize,
    /// Records confirmed and deleted, in replay order.
    pub confirmed: Vec<Confirmation>,
    /// Records that failed and stay queued.
    pub failed: Vec<ReplayFailure>,
    /// Records that could not be decoded and were left untouched.
    pub skipped: Vec<Key>,
}

impl ReplayReport {
    /// Whether every attempted record was confirmed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// The offline write queue.
///
/// Clones share the same store and the same replay lock, so at most one
/// replay pass runs at a time; a second request waits for the first to end
/// and then makes its own pass.
#[derive(Debug, Clone)]
pub struct OfflineQueue {
    db: Database,
    replay_lock: Arc<Mutex<()>>,
}

impl OfflineQueue {
    /// Creates a queue over `db`.
    pub fn new(db: Database) -> Self {
        Self {
            db,
            replay_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Durably records a write and returns its queue key.
    ///
    /// # Errors
    ///
    /// Any store error; the write is then not queued.
    pub async fn enqueue(&self, mutation: &QueuedMutation) -> StoreResult<Key> {
        let mut value = serde_json::to_value(mutation)
            .map_err(|e| StoreError::data(format!("cannot encode queued write: {e}")))?;
        if let Value::Object(fields) = &mut value {
            fields.remove("queue_key");
        }
        let tx = self.db.transaction(&[OFFLINE_QUEUE], TransactionMode::ReadWrite);
        let key = tx.object_store(OFFLINE_QUEUE).add(value).await?;
        tx.complete().await?;
        info!(
            queue_key = %key,
            restaurant_id = mutation.restaurant_id,
            kind = mutation.mutation.kind(),
            "write queued"
        );
        Ok(key)
    }

    /// Every queued write, oldest first.
    ///
    /// # Errors
    ///
    /// Any store error, or `DataError` if a record does not decode.
    pub async fn pending(&self) -> StoreResult<Vec<QueuedMutation>> {
        let tx = self.db.transaction(&[OFFLINE_QUEUE], TransactionMode::ReadOnly);
        let values = tx.object_store(OFFLINE_QUEUE).get_all(KeyRange::all(), None).await?;
        values.into_iter().map(decode).collect()
    }

    /// Queued writes for one restaurant, oldest first.
    ///
    /// # Errors
    ///
    /// Any store error, or `DataError` if a record does not decode.
    pub async fn pending_for(&self, restaurant_id: i64) -> StoreResult<Vec<QueuedMutation>> {
        let tx = self.db.transaction(&[OFFLINE_QUEUE], TransactionMode::ReadOnly);
        let values = tx
            .object_store(OFFLINE_QUEUE)
            .index(BY_RESTAURANT)
            .get_all(KeyRange::only(restaurant_id), None)
            .await?;
        values.into_iter().map(decode).collect()
    }

    /// Number of queued writes.
    ///
    /// # Errors
    ///
    /// Any store error.
    pub async fn len(&self) -> StoreResult<u64> {
        let tx = self.db.transaction(&[OFFLINE_QUEUE], TransactionMode::ReadOnly);
        tx.object_store(OFFLINE_QUEUE).count(KeyRange::all()).await
    }

    /// Whether nothing is queued.
    ///
    /// # Errors
    ///
    /// Any store error.
    pub async fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Removes one queued write.
    ///
    /// # Errors
    ///
    /// Any store error.
    pub async fn remove(&self, queue_key: Key) -> StoreResult<()> {
        let tx = self.db.transaction(&[OFFLINE_QUEUE], TransactionMode::ReadWrite);
        tx.object_store(OFFLINE_QUEUE).delete(queue_key).await?;
        tx.complete().await
    }

    async fn next_after(&self, after: Option<&Key>) -> StoreResult<Option<(Key, Value)>> {
        let range = match after {
            Some(key) => KeyRange::lower_bound(key.clone(), true),
            None => KeyRange::all(),
        };
        let tx = self.db.transaction(&[OFFLINE_QUEUE], TransactionMode::ReadOnly);
        let cursor = tx
            .object_store(OFFLINE_QUEUE)
            .open_cursor(range, CursorDirection::Next)
            .await?;
        Ok(cursor.map(|c| (c.primary_key().clone(), c.value().clone())))
    }

    /// Sends every queued write, oldest first, deleting each one the server
    /// confirms.
    ///
    /// At most `max_records` records are attempted when given. Each network
    /// call is bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Store errors end the pass. Network failures do not; they are listed
    /// in the report.
    pub async fn replay(
        &self,
        api: &dyn RestaurantApi,
        timeout: Option<Duration>,
        max_records: Option<usize>,
    ) -> StoreResult<ReplayReport> {
        let _pass = self.replay_lock.lock().await;
        let mut report = ReplayReport::default();
        let mut after: Option<Key> = None;

        while max_records.map_or(true, |max| report.attempted < max) {
            let Some((key, value)) = self.next_after(after.as_ref()).await? else {
                break;
            };
            after = Some(key.clone());

            let queued = match decode(value) {
                Ok(queued) => queued,
                Err(e) => {
                    warn!(queue_key = %key, error = %e, "skipping unreadable queued write");
                    report.skipped.push(key);
                    continue;
                }
            };

            report.attempted += 1;
            match send(api, &queued, key.clone(), timeout).await {
                Ok(confirmation) => {
                    self.remove(key.clone()).await?;
                    debug!(queue_key = %key, restaurant_id = queued.restaurant_id, "queued write confirmed");
                    report.confirmed.push(confirmation);
                }
                Err(reason) => {
                    warn!(queue_key = %key, restaurant_id = queued.restaurant_id, error = %reason, "queued write failed again");
                    report.failed.push(ReplayFailure {
                        queue_key: key,
                        restaurant_id: queued.restaurant_id,
                        reason,
                    });
                }
            }
        }

        info!(
            attempted = report.attempted,
            confirmed = report.confirmed.len(),
            failed = report.failed.len(),
            "replay pass finished"
        );
        Ok(report)
    }
}

async fn send(
    api: &dyn RestaurantApi,
    queued: &QueuedMutation,
    queue_key: Key,
    timeout: Option<Duration>,
) -> NetworkResult<Confirmation> {
    match &queued.mutation {
        Mutation::Review { review } => {
            let review = with_timeout(timeout, api.write_review(review)).await?;
            Ok(Confirmation::Review { queue_key, review })
        }
        Mutation::Favorite { is_favorite } => {
            let restaurant = with_timeout(timeout, api.set_favorite(queued.restaurant_id, *is_favorite)).await?;
            Ok(Confirmation::Favorite {
                queue_key,
                restaurant_id: queued.restaurant_id,
                is_favorite: *is_favorite,
                restaurant,
            })
        }
    }
}

fn decode(value: Value) -> StoreResult<QueuedMutation> {
    serde_json::from_value(value).map_err(|e| StoreError::data(format!("cannot decode queued write: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewReview;
    use crate::network::{ApiCall, MockApi};
    use crate::schema::restaurant_schema;
    use bistro_store::Engine;

    async fn queue() -> OfflineQueue {
        let engine = Engine::in_memory().unwrap();
        let db = restaurant_schema().unwrap().open(&engine, "restaurant-db", 1).await.unwrap();
        OfflineQueue::new(db)
    }

    fn review(comments: &str) -> QueuedMutation {
        QueuedMutation::review(NewReview::new(7, "Ann", 4, comments))
    }

    #[tokio::test]
    async fn keys_follow_submission_order() {
        let queue = queue().await;
        let a = queue.enqueue(&review("a")).await.unwrap();
        let b = queue.enqueue(&QueuedMutation::favorite(3, true)).await.unwrap();
        assert!(a < b);

        let pending = queue.pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].key(), Some(a));
        assert_eq!(pending[1].restaurant_id, 3);
        assert_eq!(queue.pending_for(7).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn max_records_bounds_a_pass() {
        let queue = queue().await;
        for c in ["a", "b", "c"] {
            queue.enqueue(&review(c)).await.unwrap();
        }
        let api = MockApi::new();
        let report = queue.replay(&api, None, Some(2)).await.unwrap();
        assert_eq!(report.attempted, 2);
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unreadable_record_is_skipped() {
        let queue = queue().await;
        let tx = queue.db.transaction(&[OFFLINE_QUEUE], TransactionMode::ReadWrite);
        tx.object_store(OFFLINE_QUEUE)
            .add(serde_json::json!({"restaurant_id": 1, "kind": "unknown"}))
            .await
            .unwrap();
        tx.complete().await.unwrap();
        queue.enqueue(&review("ok")).await.unwrap();

        let api = MockApi::new();
        let report = queue.replay(&api, None, None).await.unwrap();
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.confirmed.len(), 1);
        assert!(!report.is_clean());
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn accepted_write_with_partial_answer_leaves_the_queue() {
        use crate::network::{ApiResponse, HttpApi, Method, MockTransport};

        let queue = queue().await;
        queue.enqueue(&review("a")).await.unwrap();
        let api = HttpApi::new("http://localhost:1337", MockTransport::new());
        api.transport().respond(
            Method::Post,
            "http://localhost:1337/reviews/",
            ApiResponse::new(201, serde_json::json!({"id": 9, "restaurant_id": 7})),
        );

        let report = queue.replay(&api, None, None).await.unwrap();
        assert!(report.is_clean());
        assert!(matches!(
            report.confirmed.as_slice(),
            [Confirmation::Review { review: Some(stored), .. }] if stored.id == 9 && stored.comments == "a"
        ));
        assert!(queue.is_empty().await.unwrap());

        queue.replay(&api, None, None).await.unwrap();
        assert_eq!(api.transport().requests().len(), 1);
    }

    #[tokio::test]
    async fn favorites_replay_to_the_server() {
        let queue = queue().await;
        queue.enqueue(&QueuedMutation::favorite(5, true)).await.unwrap();
        let api = MockApi::new();
        let report = queue.replay(&api, None, None).await.unwrap();
        assert!(matches!(
            report.confirmed.as_slice(),
            [Confirmation::Favorite { restaurant_id: 5, is_favorite: true, restaurant: None, .. }]
        ));
        assert_eq!(
            api.calls(),
            vec![ApiCall::SetFavorite {
                restaurant_id: 5,
                is_favorite: true
            }]
        );
    }
}
