//! Object store and index handles.

use super::cursor::Cursor;
use super::TxnHandle;
use crate::engine::{call, Callback, CursorDirection, CursorRecord, Job, Op};
use crate::error::StoreResult;
use crate::key::{Key, KeyRange};
use serde_json::Value;
use std::sync::Arc;

/// What a request reads from: a store, or one of its indexes.
#[derive(Debug, Clone)]
pub(crate) struct Source {
    pub(crate) handle: Arc<TxnHandle>,
    pub(crate) store: String,
    pub(crate) index: Option<String>,
}

impl Source {
    pub(crate) async fn request<T: Send + 'static>(&self, make: impl FnOnce(Callback<T>) -> Op) -> StoreResult<T> {
        let txn = self.handle.id;
        call(&self.handle.engine, |reply| Job::Request {
            txn,
            op: make(reply),
        })
        .await
    }

    pub(crate) async fn seek(
        &self,
        range: KeyRange,
        direction: CursorDirection,
        after: Option<(Key, Key)>,
    ) -> StoreResult<Option<CursorRecord>> {
        let store = self.store.clone();
        let index = self.index.clone();
        self.request(|reply| Op::Seek {
            store,
            index,
            range,
            direction,
            after,
            reply,
        })
        .await
    }

    async fn get(&self, range: KeyRange) -> StoreResult<Option<Value>> {
        let store = self.store.clone();
        let index = self.index.clone();
        self.request(|reply| Op::Get {
            store,
            index,
            range,
            reply,
        })
        .await
    }

    async fn count(&self, range: KeyRange) -> StoreResult<u64> {
        let store = self.store.clone();
        let index = self.index.clone();
        self.request(|reply| Op::Count {
            store,
            index,
            range,
            reply,
        })
        .await
    }

    async fn open_cursor(&self, range: KeyRange, direction: CursorDirection) -> StoreResult<Option<Cursor>> {
        let first = self.seek(range.clone(), direction, None).await?;
        Ok(first.map(|record| Cursor::new(self.clone(), range, direction, record)))
    }

    /// Collects values by walking a cursor until it is exhausted or `limit`
    /// values have been read.
    async fn get_all(&self, range: KeyRange, limit: Option<usize>) -> StoreResult<Vec<Value>> {
        let mut values = Vec::new();
        if limit == Some(0) {
            return Ok(values);
        }
        let mut cursor = self.open_cursor(range, CursorDirection::Next).await?;
        while let Some(current) = cursor {
            values.push(current.value().clone());
            if limit.is_some_and(|n| values.len() >= n) {
                break;
            }
            cursor = current.advance().await?;
        }
        Ok(values)
    }
}

/// An object store inside a transaction.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    source: Source,
}

impl ObjectStore {
    pub(crate) fn new(handle: Arc<TxnHandle>, name: &str) -> Self {
        Self {
            source: Source {
                handle,
                store: name.to_string(),
                index: None,
            },
        }
    }

    /// Store name.
    pub fn name(&self) -> &str {
        &self.source.store
    }

    /// Reads the record with `key`.
    ///
    /// # Errors
    ///
    /// Any engine error; the transaction is aborted when one occurs.
    pub async fn get(&self, key: impl Into<Key>) -> StoreResult<Option<Value>> {
        self.source.get(KeyRange::only(key)).await
    }

    /// Reads up to `limit` records in `range`, in key order.
    ///
    /// # Errors
    ///
    /// Any engine error.
    pub async fn get_all(&self, range: KeyRange, limit: Option<usize>) -> StoreResult<Vec<Value>> {
        self.source.get_all(range, limit).await
    }

    /// Counts records in `range`.
    ///
    /// # Errors
    ///
    /// Any engine error.
    pub async fn count(&self, range: KeyRange) -> StoreResult<u64> {
        self.source.count(range).await
    }

    async fn write(&self, value: Value, key: Option<Key>, no_overwrite: bool) -> StoreResult<Key> {
        let store = self.source.store.clone();
        self.source
            .request(|reply| Op::Put {
                store,
                value,
                key,
                no_overwrite,
                reply,
            })
            .await
    }

    /// Inserts or replaces a record whose key comes from the store's key path
    /// or key generator. Returns the key.
    ///
    /// # Errors
    ///
    /// `DataError` if no key can be determined, `ConstraintError` on a unique
    /// index clash, `ReadOnly` in a read-only transaction.
    pub async fn put(&self, value: Value) -> StoreResult<Key> {
        self.write(value, None, false).await
    }

    /// Inserts or replaces a record under an explicit key (stores without a
    /// key path only).
    ///
    /// # Errors
    ///
    /// As for [`ObjectStore::put`].
    pub async fn put_with_key(&self, value: Value, key: impl Into<Key>) -> StoreResult<Key> {
        self.write(value, Some(key.into()), false).await
    }

    /// Inserts a record, failing if its key already exists.
    ///
    /// # Errors
    ///
    /// `ConstraintError` if the key exists, otherwise as for
    /// [`ObjectStore::put`].
    pub async fn add(&self, value: Value) -> StoreResult<Key> {
        self.write(value, None, true).await
    }

    /// Deletes the record with `key`. Deleting a missing key succeeds.
    ///
    /// # Errors
    ///
    /// Any engine error.
    pub async fn delete(&self, key: impl Into<Key>) -> StoreResult<()> {
        self.delete_range(KeyRange::only(key)).await
    }

    /// Deletes every record in `range`.
    ///
    /// # Errors
    ///
    /// Any engine error.
    pub async fn delete_range(&self, range: KeyRange) -> StoreResult<()> {
        let store = self.source.store.clone();
        self.source
            .request(|reply| Op::Delete { store, range, reply })
            .await
    }

    /// Deletes every record.
    ///
    /// # Errors
    ///
    /// Any engine error.
    pub async fn clear(&self) -> StoreResult<()> {
        let store = self.source.store.clone();
        self.source.request(|reply| Op::Clear { store, reply }).await
    }

    /// Opens a cursor positioned on the first record of `range`, or `None`
    /// if the range is empty.
    ///
    /// # Errors
    ///
    /// Any engine error.
    pub async fn open_cursor(&self, range: KeyRange, direction: CursorDirection) -> StoreResult<Option<Cursor>> {
        self.source.open_cursor(range, direction).await
    }

    /// Returns an index of this store.
    pub fn index(&self, name: &str) -> Index {
        Index {
            source: Source {
                index: Some(name.to_string()),
                ..self.source.clone()
            },
        }
    }
}

/// A secondary index inside a transaction.
///
/// Ranges and keys here are index keys; results come in index-key order,
/// ties broken by primary key.
#[derive(Debug, Clone)]
pub struct Index {
    source: Source,
}

impl Index {
    /// Index name.
    pub fn name(&self) -> &str {
        self.source.index.as_deref().unwrap_or_default()
    }

    /// Reads the first record whose index key equals `key`.
    ///
    /// # Errors
    ///
    /// `NotFound` if the index does not exist, or any engine error.
    pub async fn get(&self, key: impl Into<Key>) -> StoreResult<Option<Value>> {
        self.source.get(KeyRange::only(key)).await
    }

    /// Reads up to `limit` records whose index key lies in `range`.
    ///
    /// # Errors
    ///
    /// As for [`Index::get`].
    pub async fn get_all(&self, range: KeyRange, limit: Option<usize>) -> StoreResult<Vec<Value>> {
        self.source.get_all(range, limit).await
    }

    /// Counts records whose index key lies in `range`.
    ///
    /// # Errors
    ///
    /// As for [`Index::get`].
    pub async fn count(&self, range: KeyRange) -> StoreResult<u64> {
        self.source.count(range).await
    }

    /// Opens a cursor over the index.
    ///
    /// # Errors
    ///
    /// As for [`Index::get`].
    pub async fn open_cursor(&self, range: KeyRange, direction: CursorDirection) -> StoreResult<Option<Cursor>> {
        self.source.open_cursor(range, direction).await
    }
}
