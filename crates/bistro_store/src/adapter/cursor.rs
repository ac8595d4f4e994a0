//! Cursors over stores and indexes.

use super::store::Source;
use crate::engine::{CursorDirection, CursorRecord, Op};
use crate::error::StoreResult;
use crate::key::{Key, KeyRange};
use serde_json::Value;

/// A position in a store or index scan.
///
/// Advancing consumes the cursor and yields a fresh one for the next record,
/// so a stale position can never be read after an advance. A cursor keeps
/// its transaction open until it is dropped.
#[derive(Debug)]
pub struct Cursor {
    source: Source,
    range: KeyRange,
    direction: CursorDirection,
    record: CursorRecord,
}

impl Cursor {
    pub(crate) fn new(source: Source, range: KeyRange, direction: CursorDirection, record: CursorRecord) -> Self {
        Self {
            source,
            range,
            direction,
            record,
        }
    }

    /// The effective key: the index key for index cursors, else the primary key.
    pub fn key(&self) -> &Key {
        &self.record.key
    }

    /// Primary key of the current record.
    pub fn primary_key(&self) -> &Key {
        &self.record.primary_key
    }

    /// Value of the current record.
    pub fn value(&self) -> &Value {
        &self.record.value
    }

    /// Moves to the next record in scan order.
    ///
    /// # Errors
    ///
    /// Any engine error; the transaction is aborted when one occurs.
    pub async fn advance(self) -> StoreResult<Option<Cursor>> {
        let Cursor {
            source,
            range,
            direction,
            record,
        } = self;
        let next = source
            .seek(range.clone(), direction, Some(record.position()))
            .await?;
        Ok(next.map(|record| Cursor {
            source,
            range,
            direction,
            record,
        }))
    }

    /// Deletes the record under the cursor. The cursor stays where it is.
    ///
    /// # Errors
    ///
    /// `ReadOnly` in a read-only transaction, or any engine error.
    pub async fn delete(&self) -> StoreResult<()> {
        let store = self.source.store.clone();
        let range = KeyRange::only(self.record.primary_key.clone());
        self.source
            .request(|reply| Op::Delete { store, range, reply })
            .await
    }
}
