//! Callback-driven object store engine.
//!
//! The engine owns every database and runs on a dedicated worker thread.
//! Callers talk to it by sending [`Job`]s; every job carries a fire-once
//! callback that the worker invokes with the outcome. Nothing here is
//! `async`: the [`crate::adapter`] module turns callbacks into futures.
//!
//! Transaction rules enforced by the worker:
//!
//! - read-write transactions with overlapping scope run one at a time, in
//!   creation order; later ones buffer their requests until they start
//! - read-only transactions read committed state and never wait
//! - writes are staged and become visible only at commit
//! - a failed request aborts its transaction
//! - a transaction commits once its owner signals that no more requests are
//!   coming (explicit commit or all handles dropped)

mod data;
mod journal;
mod worker;

pub use data::{
    CursorDirection, CursorRecord, DatabaseInfo, IndexInfo, StoreInfo, StoreParams, VersionChange,
};
pub use journal::CompactStats;

use crate::error::{StoreError, StoreResult};
use crate::key::{Key, KeyRange};
use bistro_storage::LogBackend;
use futures_channel::oneshot;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use tracing::debug;

/// Fire-once completion callback.
pub(crate) type Callback<T> = Box<dyn FnOnce(StoreResult<T>) + Send>;

/// Schema upgrade routine run inside a version change.
pub(crate) type UpgradeFn = Box<dyn FnOnce(&mut VersionChange<'_>) -> StoreResult<()> + Send>;

/// Access mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Reads only; never waits for other transactions.
    ReadOnly,
    /// Reads and writes; serialized against overlapping read-write transactions.
    ReadWrite,
}

/// A request executed inside a transaction.
pub(crate) enum Op {
    Get {
        store: String,
        index: Option<String>,
        range: KeyRange,
        reply: Callback<Option<Value>>,
    },
    Count {
        store: String,
        index: Option<String>,
        range: KeyRange,
        reply: Callback<u64>,
    },
    Put {
        store: String,
        value: Value,
        key: Option<Key>,
        no_overwrite: bool,
        reply: Callback<Key>,
    },
    Delete {
        store: String,
        range: KeyRange,
        reply: Callback<()>,
    },
    Clear {
        store: String,
        reply: Callback<()>,
    },
    Seek {
        store: String,
        index: Option<String>,
        range: KeyRange,
        direction: CursorDirection,
        after: Option<(Key, Key)>,
        reply: Callback<Option<CursorRecord>>,
    },
}

impl Op {
    /// Completes the request with an error without running it.
    pub(crate) fn fail(self, err: StoreError) {
        match self {
            Op::Get { reply, .. } => reply(Err(err)),
            Op::Count { reply, .. } => reply(Err(err)),
            Op::Put { reply, .. } => reply(Err(err)),
            Op::Delete { reply, .. } | Op::Clear { reply, .. } => reply(Err(err)),
            Op::Seek { reply, .. } => reply(Err(err)),
        }
    }
}

/// A message to the worker thread.
pub(crate) enum Job {
    Open {
        name: String,
        version: u32,
        upgrade: UpgradeFn,
        reply: Callback<DatabaseInfo>,
    },
    DeleteDatabase {
        name: String,
        reply: Callback<()>,
    },
    Begin {
        txn: u64,
        db: String,
        scope: Vec<String>,
        mode: TransactionMode,
        done: Callback<()>,
    },
    Request {
        txn: u64,
        op: Op,
    },
    /// No further requests will be sent; commit once queued work is done.
    Commit {
        txn: u64,
    },
    Abort {
        txn: u64,
    },
    Inspect {
        name: Option<String>,
        reply: Callback<Vec<DatabaseInfo>>,
    },
    Compact {
        reply: Callback<CompactStats>,
    },
}

/// Engine configuration.
pub struct EngineConfig {
    /// Durable journal; `None` keeps everything in memory.
    pub journal: Option<Box<dyn LogBackend>>,
    /// Whether each journal append is synced before the commit completes.
    pub sync_on_commit: bool,
    /// Journal size in bytes past which commits trigger a compaction.
    pub compact_threshold: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            journal: None,
            sync_on_commit: true,
            compact_threshold: None,
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("journal", &self.journal.is_some())
            .field("sync_on_commit", &self.sync_on_commit)
            .field("compact_threshold", &self.compact_threshold)
            .finish()
    }
}

impl EngineConfig {
    /// Creates an in-memory configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Persists commits to `backend` and replays it on start.
    #[must_use]
    pub fn journal(mut self, backend: impl LogBackend + 'static) -> Self {
        self.journal = Some(Box::new(backend));
        self
    }

    /// Sets whether journal appends are synced on commit.
    #[must_use]
    pub fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Compacts the journal after a commit once it exceeds `bytes` and has
    /// doubled since the last compaction.
    #[must_use]
    pub fn compact_threshold(mut self, bytes: u64) -> Self {
        self.compact_threshold = Some(bytes);
        self
    }
}

struct EngineInner {
    jobs: mpsc::Sender<Job>,
    next_txn: AtomicU64,
}

/// Handle to a running engine.
///
/// Cloning is cheap. The worker thread exits once every clone (including
/// those held by open databases and transactions) has been dropped.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

impl Engine {
    /// Starts an engine, replaying the journal if one is configured.
    ///
    /// # Errors
    ///
    /// Returns a `Journal` error if the journal cannot be read, or
    /// `InvalidState` if the worker thread cannot be started.
    pub fn start(config: EngineConfig) -> StoreResult<Self> {
        let worker = worker::Worker::new(config)?;
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("bistro-store".into())
            .spawn(move || worker.run(rx))
            .map_err(|e| StoreError::invalid_state(format!("cannot start engine worker: {e}")))?;
        debug!("store engine started");
        Ok(Self {
            inner: Arc::new(EngineInner {
                jobs: tx,
                next_txn: AtomicU64::new(1),
            }),
        })
    }

    /// Starts an engine with no journal.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the worker thread cannot be started.
    pub fn in_memory() -> StoreResult<Self> {
        Self::start(EngineConfig::new())
    }

    pub(crate) fn send(&self, job: Job) -> StoreResult<()> {
        self.inner.jobs.send(job).map_err(|_| StoreError::closed())
    }

    pub(crate) fn next_txn_id(&self) -> u64 {
        self.inner.next_txn.fetch_add(1, Ordering::Relaxed)
    }

    /// Describes every database, or only `name` when given.
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the engine has shut down.
    pub async fn databases(&self, name: Option<&str>) -> StoreResult<Vec<DatabaseInfo>> {
        let name = name.map(str::to_string);
        call(self, |reply| Job::Inspect { name, reply }).await
    }

    /// Deletes a database and all its stores. Deleting a missing database
    /// succeeds. Waits for active transactions on the database to finish.
    ///
    /// # Errors
    ///
    /// Returns `Journal` if the deletion cannot be persisted.
    pub async fn delete_database(&self, name: &str) -> StoreResult<()> {
        let name = name.to_string();
        call(self, |reply| Job::DeleteDatabase { name, reply }).await
    }

    /// Rewrites the journal as one snapshot per database. An engine without
    /// a journal reports empty stats.
    ///
    /// # Errors
    ///
    /// Returns `Journal` if the compacted journal cannot be written; the old
    /// journal stays in place.
    pub async fn compact(&self) -> StoreResult<CompactStats> {
        call(self, |reply| Job::Compact { reply }).await
    }
}

/// Sends a job and waits for its callback.
pub(crate) async fn call<T: Send + 'static>(
    engine: &Engine,
    make: impl FnOnce(Callback<T>) -> Job,
) -> StoreResult<T> {
    let (tx, rx) = oneshot::channel();
    engine.send(make(Box::new(move |result| {
        let _ = tx.send(result);
    })))?;
    rx.await.map_err(|_| StoreError::closed())?
}
