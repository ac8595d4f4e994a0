//! Typed access to the cached stores.

use crate::model::{Restaurant, Review};
use crate::schema::{RESTAURANTS, REVIEWS};
use bistro_store::{Database, Key, KeyRange, StoreError, StoreResult, TransactionMode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use tracing::debug;

/// A record type kept in its own object store.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Name of the store holding this entity.
    const STORE: &'static str;
}

impl Entity for Restaurant {
    const STORE: &'static str = RESTAURANTS;
}

impl Entity for Review {
    const STORE: &'static str = REVIEWS;
}

/// Typed reads and writes for one entity kind.
///
/// Reads use a read-only transaction and return records in ascending
/// primary-key order, or index-key then primary-key order for index lookups.
/// Writes resolve only once their transaction has committed. Store errors
/// pass through untouched.
pub struct EntityCache<E> {
    db: Database,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for EntityCache<E> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> fmt::Debug for EntityCache<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityCache")
            .field("db", &self.db.name())
            .field("store", &E::STORE)
            .finish()
    }
}

impl<E: Entity> EntityCache<E> {
    /// Creates a cache over `db`.
    pub fn new(db: Database) -> Self {
        Self {
            db,
            _entity: PhantomData,
        }
    }

    /// Every cached record.
    ///
    /// # Errors
    ///
    /// Any store error, or `DataError` if a record does not decode.
    pub async fn get_all(&self) -> StoreResult<Vec<E>> {
        let tx = self.db.transaction(&[E::STORE], TransactionMode::ReadOnly);
        let values = tx.object_store(E::STORE).get_all(KeyRange::all(), None).await?;
        values.into_iter().map(decode).collect()
    }

    /// The record with primary key `key`, if cached.
    ///
    /// # Errors
    ///
    /// Any store error, or `DataError` if the record does not decode.
    pub async fn get_by_key(&self, key: impl Into<Key>) -> StoreResult<Option<E>> {
        let tx = self.db.transaction(&[E::STORE], TransactionMode::ReadOnly);
        let value = tx.object_store(E::STORE).get(key).await?;
        value.map(decode).transpose()
    }

    /// Every record whose `index` key equals `value`.
    ///
    /// # Errors
    ///
    /// `NotFound` if the index does not exist, any other store error, or
    /// `DataError` if a record does not decode.
    pub async fn get_by_index(&self, index: &str, value: impl Into<Key>) -> StoreResult<Vec<E>> {
        let tx = self.db.transaction(&[E::STORE], TransactionMode::ReadOnly);
        let values = tx
            .object_store(E::STORE)
            .index(index)
            .get_all(KeyRange::only(value), None)
            .await?;
        values.into_iter().map(decode).collect()
    }

    /// Inserts or replaces one record.
    ///
    /// # Errors
    ///
    /// Any store error; nothing is written when one occurs.
    pub async fn put(&self, record: &E) -> StoreResult<Key> {
        let value = encode(record)?;
        let tx = self.db.transaction(&[E::STORE], TransactionMode::ReadWrite);
        let key = tx.object_store(E::STORE).put(value).await?;
        tx.complete().await?;
        Ok(key)
    }

    /// Inserts or replaces every record in a single transaction.
    ///
    /// # Errors
    ///
    /// Any store error; either all records are written or none are.
    pub async fn put_all(&self, records: &[E]) -> StoreResult<()> {
        let values = records.iter().map(encode).collect::<StoreResult<Vec<_>>>()?;
        let tx = self.db.transaction(&[E::STORE], TransactionMode::ReadWrite);
        let store = tx.object_store(E::STORE);
        for value in values {
            store.put(value).await?;
        }
        drop(store);
        tx.complete().await?;
        debug!(store = E::STORE, count = records.len(), "cached records");
        Ok(())
    }

    /// Removes the record with primary key `key`. Absent keys are ignored.
    ///
    /// # Errors
    ///
    /// Any store error.
    pub async fn delete(&self, key: impl Into<Key>) -> StoreResult<()> {
        let tx = self.db.transaction(&[E::STORE], TransactionMode::ReadWrite);
        tx.object_store(E::STORE).delete(key).await?;
        tx.complete().await
    }

    /// Number of cached records.
    ///
    /// # Errors
    ///
    /// Any store error.
    pub async fn count(&self) -> StoreResult<u64> {
        let tx = self.db.transaction(&[E::STORE], TransactionMode::ReadOnly);
        tx.object_store(E::STORE).count(KeyRange::all()).await
    }

    /// Removes every cached record.
    ///
    /// # Errors
    ///
    /// Any store error.
    pub async fn clear(&self) -> StoreResult<()> {
        let tx = self.db.transaction(&[E::STORE], TransactionMode::ReadWrite);
        tx.object_store(E::STORE).clear().await?;
        tx.complete().await
    }
}

fn decode<E: DeserializeOwned>(value: Value) -> StoreResult<E> {
    serde_json::from_value(value).map_err(|e| StoreError::data(format!("cannot decode cached record: {e}")))
}

fn encode<E: Serialize>(record: &E) -> StoreResult<Value> {
    serde_json::to_value(record).map_err(|e| StoreError::data(format!("cannot encode record: {e}")))
}
