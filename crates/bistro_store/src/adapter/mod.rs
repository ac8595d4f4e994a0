//! Future-based access to the engine.
//!
//! Every engine callback is bridged to a `futures` oneshot channel, so each
//! primitive becomes a single awaitable call that resolves with a value or a
//! [`StoreError`]. Nothing here retries or hides failures.
//!
//! ```rust,no_run
//! # async fn demo() -> bistro_store::StoreResult<()> {
//! use bistro_store::{Database, Engine, StoreParams, TransactionMode};
//! use serde_json::json;
//!
//! let engine = Engine::in_memory()?;
//! let db = Database::open(&engine, "restaurant-db", 1, |vc| {
//!     vc.create_object_store("restaurants", StoreParams::key_path("id"))
//! })
//! .await?;
//!
//! let tx = db.transaction(&["restaurants"], TransactionMode::ReadWrite);
//! tx.object_store("restaurants").put(json!({"id": 1, "name": "Katz's"})).await?;
//! tx.complete().await?;
//! # Ok(())
//! # }
//! ```

mod cursor;
mod store;

pub use cursor::Cursor;
pub use store::{Index, ObjectStore};

use crate::engine::{call, DatabaseInfo, Engine, Job, TransactionMode, VersionChange};
use crate::error::{StoreError, StoreResult};
use futures_channel::oneshot;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// An open database.
///
/// Cheap to clone; every clone talks to the same engine.
#[derive(Debug, Clone)]
pub struct Database {
    engine: Engine,
    name: String,
    version: u32,
}

impl Database {
    /// Opens `name` at `version`, running `upgrade` if the stored version is
    /// lower.
    ///
    /// The upgrade sees the old and new versions through [`VersionChange`]
    /// and applies atomically: if it fails, the stored schema is untouched
    /// and the open fails. Requesting a version below the stored one opens
    /// the database at its stored version.
    ///
    /// # Errors
    ///
    /// `VersionError` for version 0, the upgrade's own error, or `Journal`
    /// if the new schema cannot be persisted.
    pub async fn open<F>(engine: &Engine, name: &str, version: u32, upgrade: F) -> StoreResult<Self>
    where
        F: FnOnce(&mut VersionChange<'_>) -> StoreResult<()> + Send + 'static,
    {
        let owned = name.to_string();
        let info = call(engine, |reply| Job::Open {
            name: owned,
            version,
            upgrade: Box::new(upgrade),
            reply,
        })
        .await?;
        debug!(db = name, version = info.version, "database open");
        Ok(Self {
            engine: engine.clone(),
            name: name.to_string(),
            version: info.version,
        })
    }

    /// Database name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version the database was opened at.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// The engine this database lives in.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Describes the database's current stores and indexes.
    ///
    /// # Errors
    ///
    /// `NotFound` if the database has been deleted.
    pub async fn info(&self) -> StoreResult<DatabaseInfo> {
        self.engine
            .databases(Some(&self.name))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::not_found(format!("database '{}' does not exist", self.name)))
    }

    /// Starts a transaction over `scope`.
    ///
    /// Scope problems (unknown store) surface on the first request and on
    /// [`Transaction::complete`].
    pub fn transaction(&self, scope: &[&str], mode: TransactionMode) -> Transaction {
        let id = self.engine.next_txn_id();
        let (tx, rx) = oneshot::channel();
        let begin = Job::Begin {
            txn: id,
            db: self.name.clone(),
            scope: scope.iter().map(|s| (*s).to_string()).collect(),
            mode,
            done: Box::new(move |result| {
                let _ = tx.send(result);
            }),
        };
        // A closed engine drops the job and with it the completion sender, so
        // the failure surfaces as `Closed` when awaited.
        let _ = self.engine.send(begin);
        Transaction {
            handle: Arc::new(TxnHandle {
                engine: self.engine.clone(),
                id,
            }),
            done: rx,
            mode,
        }
    }
}

/// Shared by a transaction and every store, index and cursor made from it.
/// When the last one is dropped the engine is told no more requests follow.
#[derive(Debug)]
pub(crate) struct TxnHandle {
    pub(crate) engine: Engine,
    pub(crate) id: u64,
}

impl Drop for TxnHandle {
    fn drop(&mut self) {
        let _ = self.engine.send(Job::Commit { txn: self.id });
    }
}

/// A transaction.
///
/// Requests made through its stores run in order. Dropping the transaction
/// together with all stores and cursors made from it commits it; use
/// [`Transaction::complete`] to wait for the outcome.
pub struct Transaction {
    handle: Arc<TxnHandle>,
    done: oneshot::Receiver<StoreResult<()>>,
    mode: TransactionMode,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.handle.id)
            .field("mode", &self.mode)
            .finish()
    }
}

impl Transaction {
    /// Access mode.
    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    /// Returns a store in the transaction's scope.
    pub fn object_store(&self, name: &str) -> ObjectStore {
        ObjectStore::new(Arc::clone(&self.handle), name)
    }

    /// Commits after all requests made so far and waits for the outcome.
    ///
    /// # Errors
    ///
    /// The error of the request that aborted the transaction, `Aborted`, or
    /// `Journal` if the commit could not be persisted.
    pub async fn complete(self) -> StoreResult<()> {
        let Transaction { handle, done, .. } = self;
        handle.engine.send(Job::Commit { txn: handle.id })?;
        drop(handle);
        done.await.map_err(|_| StoreError::closed())?
    }

    /// Aborts the transaction, discarding its writes.
    pub fn abort(self) {
        let _ = self.handle.engine.send(Job::Abort { txn: self.handle.id });
    }
}
