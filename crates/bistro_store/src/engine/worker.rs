//! The engine's worker thread.

use super::data::{CursorDirection, DatabaseData, DatabaseInfo, StoreData, VersionChange};
use super::journal::{Change, CompactStats, Databases, Journal, JournalEntry};
use super::{Callback, EngineConfig, Job, Op, TransactionMode, UpgradeFn};
use crate::error::{ErrorCode, StoreError, StoreResult};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::mpsc;
use tracing::{debug, error, info, warn};

struct Txn {
    db: String,
    scope: BTreeSet<String>,
    mode: TransactionMode,
    active: bool,
    closing: bool,
    staged: BTreeMap<String, StoreData>,
    changes: Vec<Change>,
    queue: VecDeque<Op>,
    done: Callback<()>,
}

pub(crate) struct Worker {
    databases: Databases,
    journal: Option<Journal>,
    compact_threshold: Option<u64>,
    txns: BTreeMap<u64, Txn>,
    /// Transactions refused at begin; their requests fail with the same error.
    rejected: HashMap<u64, StoreError>,
    /// Jobs waiting for a database to become quiet, in arrival order.
    deferred: HashMap<String, VecDeque<Job>>,
    /// Transactions whose begin is deferred, with their database. Their
    /// later jobs queue up behind the begin.
    deferred_begins: HashMap<u64, String>,
}

/// Reports a result to its callback, handing the error back to the caller.
fn respond<T>(reply: Callback<T>, result: StoreResult<T>) -> StoreResult<()> {
    match result {
        Ok(value) => {
            reply(Ok(value));
            Ok(())
        }
        Err(err) => {
            reply(Err(err.clone()));
            Err(err)
        }
    }
}

impl Worker {
    pub(crate) fn new(config: EngineConfig) -> StoreResult<Self> {
        let (journal, databases) = match config.journal {
            Some(backend) => {
                let (journal, databases) = Journal::open(backend, config.sync_on_commit)?;
                info!(databases = databases.len(), "journal replayed");
                (Some(journal), databases)
            }
            None => (None, Databases::new()),
        };
        Ok(Self {
            databases,
            journal,
            compact_threshold: config.compact_threshold,
            txns: BTreeMap::new(),
            rejected: HashMap::new(),
            deferred: HashMap::new(),
            deferred_begins: HashMap::new(),
        })
    }

    pub(crate) fn run(mut self, jobs: mpsc::Receiver<Job>) {
        while let Ok(job) = jobs.recv() {
            self.handle(job);
        }
        debug!(pending = self.txns.len(), "store engine stopped");
    }

    fn handle(&mut self, job: Job) {
        if let Some(txn) = txn_of(&job) {
            if let Some(db) = self.deferred_begins.get(&txn) {
                self.deferred.entry(db.clone()).or_default().push_back(job);
                return;
            }
        }
        match job {
            Job::Request { txn, op } => self.request(txn, op),
            Job::Commit { txn } => self.close(txn),
            Job::Abort { txn } => {
                self.rejected.remove(&txn);
                self.abort(txn, StoreError::aborted("transaction aborted by caller"));
            }
            Job::Inspect { name, reply } => {
                let infos = self
                    .databases
                    .iter()
                    .filter(|(n, _)| name.as_deref().map_or(true, |wanted| wanted == n.as_str()))
                    .map(|(n, d)| d.info(n))
                    .collect();
                reply(Ok(infos));
            }
            Job::Compact { reply } => reply(self.compact()),
            job => {
                if self.must_wait(&job) {
                    let db = deferred_db(&job).to_string();
                    debug!(db = %db, "deferring until transactions finish");
                    if let Job::Begin { txn, .. } = &job {
                        self.deferred_begins.insert(*txn, db.clone());
                    }
                    self.deferred.entry(db).or_default().push_back(job);
                } else {
                    self.dispatch(job);
                }
            }
        }
    }

    fn compact(&mut self) -> StoreResult<CompactStats> {
        let Some(journal) = &mut self.journal else {
            return Ok(CompactStats::default());
        };
        let stats = journal.compact(&self.databases)?;
        info!(
            entries_before = stats.entries_before,
            entries_after = stats.entries_after,
            bytes_before = stats.bytes_before,
            bytes_after = stats.bytes_after,
            "journal compacted"
        );
        Ok(stats)
    }

    fn compact_if_large(&mut self) {
        let (Some(threshold), Some(journal)) = (self.compact_threshold, &self.journal) else {
            return;
        };
        match journal.should_compact(threshold) {
            Ok(false) => {}
            Ok(true) => {
                if let Err(err) = self.compact() {
                    warn!(error = %err, "journal compaction failed; keeping full history");
                }
            }
            Err(err) => warn!(error = %err, "cannot read journal size"),
        }
    }

    fn has_txns(&self, db: &str) -> bool {
        self.txns.values().any(|t| t.db == db)
    }

    fn needs_upgrade(&self, db: &str, version: u32) -> bool {
        version > self.databases.get(db).map_or(0, |d| d.version)
    }

    /// Returns true if `job` may not run yet.
    fn must_wait(&self, job: &Job) -> bool {
        if self.deferred.get(deferred_db(job)).is_some_and(|q| !q.is_empty()) {
            return true;
        }
        self.blocked_by_txns(job)
    }

    fn blocked_by_txns(&self, job: &Job) -> bool {
        match job {
            Job::Open { name, version, .. } => self.needs_upgrade(name, *version) && self.has_txns(name),
            Job::DeleteDatabase { name, .. } => self.has_txns(name),
            _ => false,
        }
    }

    fn dispatch(&mut self, job: Job) {
        match job {
            Job::Open {
                name,
                version,
                upgrade,
                reply,
            } => reply(self.open(&name, version, upgrade)),
            Job::DeleteDatabase { name, reply } => reply(self.delete_database(&name)),
            Job::Begin {
                txn,
                db,
                scope,
                mode,
                done,
            } => {
                self.deferred_begins.remove(&txn);
                self.begin(txn, db, scope, mode, done);
            }
            other => self.handle(other),
        }
    }

    fn drain_deferred(&mut self, db: &str) {
        loop {
            let ready = match self.deferred.get(db).and_then(VecDeque::front) {
                Some(job) => !self.blocked_by_txns(job),
                None => break,
            };
            if !ready {
                break;
            }
            if let Some(job) = self.deferred.get_mut(db).and_then(VecDeque::pop_front) {
                self.dispatch(job);
            }
        }
        if self.deferred.get(db).is_some_and(VecDeque::is_empty) {
            self.deferred.remove(db);
        }
    }

    fn open(&mut self, name: &str, version: u32, upgrade: UpgradeFn) -> StoreResult<DatabaseInfo> {
        if version == 0 {
            return Err(StoreError::new(
                ErrorCode::VersionError,
                "database version must be at least 1",
            ));
        }
        if let Some(existing) = self.databases.get(name) {
            if version < existing.version {
                warn!(
                    db = name,
                    requested = version,
                    stored = existing.version,
                    "opening at stored version; downgrades are not performed"
                );
            }
            if version <= existing.version {
                return Ok(existing.info(name));
            }
        }

        let mut data: DatabaseData = self.databases.get(name).cloned().unwrap_or_default();
        let old_version = data.version;
        info!(db = name, from = old_version, to = version, "upgrading database");
        upgrade(&mut VersionChange::new(&mut data, old_version, version))?;
        data.version = version;

        if let Some(journal) = &mut self.journal {
            journal.append(&JournalEntry::Snapshot {
                db: name.to_string(),
                data: data.clone(),
            })?;
        }
        let info = data.info(name);
        self.databases.insert(name.to_string(), data);
        Ok(info)
    }

    fn delete_database(&mut self, name: &str) -> StoreResult<()> {
        if !self.databases.contains_key(name) {
            return Ok(());
        }
        if let Some(journal) = &mut self.journal {
            journal.append(&JournalEntry::Deleted { db: name.to_string() })?;
        }
        self.databases.remove(name);
        info!(db = name, "database deleted");
        Ok(())
    }

    fn begin(&mut self, id: u64, db: String, scope: Vec<String>, mode: TransactionMode, done: Callback<()>) {
        let checked = match self.databases.get(&db) {
            None => Err(StoreError::not_found(format!("database '{db}' does not exist"))),
            Some(_) if scope.is_empty() => Err(StoreError::invalid_state("transaction scope is empty")),
            Some(data) => match scope.iter().find(|s| !data.stores.contains_key(s.as_str())) {
                Some(missing) => Err(StoreError::not_found(format!(
                    "object store '{missing}' does not exist"
                ))),
                None => Ok(()),
            },
        };
        if let Err(err) = checked {
            self.rejected.insert(id, err.clone());
            done(Err(err));
            return;
        }

        self.txns.insert(
            id,
            Txn {
                db,
                scope: scope.into_iter().collect(),
                mode,
                active: false,
                closing: false,
                staged: BTreeMap::new(),
                changes: Vec::new(),
                queue: VecDeque::new(),
                done,
            },
        );
        if self.can_start(id) {
            if let Some(txn) = self.txns.get_mut(&id) {
                txn.active = true;
            }
        } else {
            debug!(txn = id, "read-write transaction waiting for an earlier one");
        }
    }

    /// A read-write transaction starts once no earlier unfinished read-write
    /// transaction overlaps its scope.
    fn can_start(&self, id: u64) -> bool {
        let Some(txn) = self.txns.get(&id) else {
            return false;
        };
        txn.mode == TransactionMode::ReadOnly
            || !self.txns.range(..id).any(|(_, other)| {
                other.db == txn.db
                    && other.mode == TransactionMode::ReadWrite
                    && !other.scope.is_disjoint(&txn.scope)
            })
    }

    fn request(&mut self, id: u64, op: Op) {
        if let Some(err) = self.rejected.get(&id) {
            op.fail(err.clone());
            return;
        }
        let Some(txn) = self.txns.get_mut(&id) else {
            op.fail(StoreError::inactive("transaction has finished"));
            return;
        };
        if txn.closing {
            op.fail(StoreError::inactive("transaction is committing"));
        } else if !txn.active {
            txn.queue.push_back(op);
        } else {
            self.execute(id, op);
        }
    }

    fn execute(&mut self, id: u64, op: Op) {
        if let Err(err) = self.run_op(id, op) {
            debug!(txn = id, error = %err, "request failed; aborting transaction");
            self.abort(id, err);
        }
    }

    fn read_store(&self, id: u64, store: &str) -> StoreResult<&StoreData> {
        let txn = self
            .txns
            .get(&id)
            .ok_or_else(|| StoreError::inactive("transaction has finished"))?;
        if !txn.scope.contains(store) {
            return Err(StoreError::not_found(format!(
                "object store '{store}' is not in the transaction scope"
            )));
        }
        if let Some(staged) = txn.staged.get(store) {
            return Ok(staged);
        }
        self.databases
            .get(&txn.db)
            .and_then(|d| d.stores.get(store))
            .ok_or_else(|| StoreError::not_found(format!("object store '{store}' does not exist")))
    }

    fn write_store(&mut self, id: u64, store: &str) -> StoreResult<(&mut StoreData, &mut Vec<Change>)> {
        let Self { txns, databases, .. } = self;
        let txn = txns
            .get_mut(&id)
            .ok_or_else(|| StoreError::inactive("transaction has finished"))?;
        if txn.mode == TransactionMode::ReadOnly {
            return Err(StoreError::read_only(format!(
                "cannot write to '{store}' in a read-only transaction"
            )));
        }
        if !txn.scope.contains(store) {
            return Err(StoreError::not_found(format!(
                "object store '{store}' is not in the transaction scope"
            )));
        }
        if !txn.staged.contains_key(store) {
            let committed = databases
                .get(&txn.db)
                .and_then(|d| d.stores.get(store))
                .ok_or_else(|| StoreError::not_found(format!("object store '{store}' does not exist")))?;
            txn.staged.insert(store.to_string(), committed.clone());
        }
        let staged = txn
            .staged
            .get_mut(store)
            .ok_or_else(|| StoreError::not_found(format!("object store '{store}' does not exist")))?;
        Ok((staged, &mut txn.changes))
    }

    fn run_op(&mut self, id: u64, op: Op) -> StoreResult<()> {
        match op {
            Op::Get {
                store,
                index,
                range,
                reply,
            } => {
                let result = self
                    .read_store(id, &store)
                    .and_then(|s| s.seek(index.as_deref(), &range, CursorDirection::Next, None))
                    .map(|found| found.map(|rec| rec.value));
                respond(reply, result)
            }
            Op::Count {
                store,
                index,
                range,
                reply,
            } => {
                let result = self
                    .read_store(id, &store)
                    .and_then(|s| s.count(index.as_deref(), &range));
                respond(reply, result)
            }
            Op::Seek {
                store,
                index,
                range,
                direction,
                after,
                reply,
            } => {
                let result = self
                    .read_store(id, &store)
                    .and_then(|s| s.seek(index.as_deref(), &range, direction, after.as_ref()));
                respond(reply, result)
            }
            Op::Put {
                store,
                value,
                key,
                no_overwrite,
                reply,
            } => {
                let result = self.write_store(id, &store).and_then(|(data, changes)| {
                    let (key, value) = data.put(value, key, no_overwrite)?;
                    changes.push(Change::Put {
                        store: store.clone(),
                        key: key.clone(),
                        value,
                        next_key: data.next_key,
                    });
                    Ok(key)
                });
                respond(reply, result)
            }
            Op::Delete { store, range, reply } => {
                let result = self.write_store(id, &store).map(|(data, changes)| {
                    for key in data.delete_range(&range) {
                        changes.push(Change::Delete {
                            store: store.clone(),
                            key,
                        });
                    }
                });
                respond(reply, result)
            }
            Op::Clear { store, reply } => {
                let result = self.write_store(id, &store).map(|(data, changes)| {
                    data.clear_records();
                    changes.push(Change::Clear { store: store.clone() });
                });
                respond(reply, result)
            }
        }
    }

    /// Marks a transaction as closing and commits it if it is running.
    fn close(&mut self, id: u64) {
        if self.rejected.remove(&id).is_some() {
            return;
        }
        let Some(txn) = self.txns.get_mut(&id) else {
            return;
        };
        txn.closing = true;
        if txn.active {
            self.commit(id);
        }
    }

    fn commit(&mut self, id: u64) {
        let Some(txn) = self.txns.remove(&id) else {
            return;
        };
        let Txn {
            db,
            staged,
            changes,
            done,
            ..
        } = txn;

        if !changes.is_empty() {
            let count = changes.len();
            if let Some(journal) = &mut self.journal {
                let entry = JournalEntry::Commit {
                    db: db.clone(),
                    changes,
                };
                if let Err(err) = journal.append(&entry) {
                    error!(txn = id, error = %err, "journal append failed; transaction rolled back");
                    done(Err(err));
                    self.after_finish(&db);
                    return;
                }
            }
            if let Some(data) = self.databases.get_mut(&db) {
                data.stores.extend(staged);
            }
            debug!(txn = id, db = %db, changes = count, "transaction committed");
            self.compact_if_large();
        }
        done(Ok(()));
        self.after_finish(&db);
    }

    fn abort(&mut self, id: u64, err: StoreError) {
        let Some(txn) = self.txns.remove(&id) else {
            return;
        };
        for op in txn.queue {
            op.fail(StoreError::aborted("transaction was aborted"));
        }
        debug!(txn = id, code = %err.code, "transaction aborted");
        (txn.done)(Err(err));
        self.after_finish(&txn.db);
    }

    /// Starts transactions that were waiting and runs deferred jobs.
    fn after_finish(&mut self, db: &str) {
        let waiting: Vec<u64> = self
            .txns
            .iter()
            .filter(|(_, t)| t.db == db && !t.active)
            .map(|(id, _)| *id)
            .collect();
        for id in waiting {
            let still_waiting = self.txns.get(&id).is_some_and(|t| !t.active);
            if still_waiting && self.can_start(id) {
                self.activate(id);
            }
        }
        self.drain_deferred(db);
    }

    fn activate(&mut self, id: u64) {
        let queued = match self.txns.get_mut(&id) {
            Some(txn) => {
                txn.active = true;
                std::mem::take(&mut txn.queue)
            }
            None => return,
        };
        debug!(txn = id, queued = queued.len(), "transaction started");
        for op in queued {
            if self.txns.contains_key(&id) {
                self.execute(id, op);
            } else {
                op.fail(StoreError::aborted("transaction was aborted"));
            }
        }
        if self.txns.get(&id).is_some_and(|t| t.closing) {
            self.commit(id);
        }
    }
}

/// The transaction a job belongs to, for jobs sent after its begin.
fn txn_of(job: &Job) -> Option<u64> {
    match job {
        Job::Request { txn, .. } | Job::Commit { txn } | Job::Abort { txn } => Some(*txn),
        _ => None,
    }
}

fn deferred_db(job: &Job) -> &str {
    match job {
        Job::Open { name, .. } | Job::DeleteDatabase { name, .. } => name,
        Job::Begin { db, .. } => db,
        _ => "",
    }
}
