//! Durable journal of committed transactions.
//!
//! Each frame in the log holds one CBOR-encoded [`JournalEntry`]. On startup
//! the entries are applied in order to rebuild every database; the journal is
//! the only durable state the engine has.
//!
//! Compaction rewrites the log as one `Snapshot` per live database, which
//! replays to the same state as the history it replaces.

use super::data::DatabaseData;
use crate::error::{StoreError, StoreResult};
use crate::key::Key;
use bistro_storage::{FrameLog, LogBackend};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// One record-level change inside a committed transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum Change {
    Put {
        store: String,
        key: Key,
        value: Value,
        /// Key generator state after the write.
        next_key: u64,
    },
    Delete {
        store: String,
        key: Key,
    },
    Clear {
        store: String,
    },
}

/// A journal record.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum JournalEntry {
    /// Full database image, written after a version change.
    Snapshot { db: String, data: DatabaseData },
    /// Changes of one committed read-write transaction.
    Commit { db: String, changes: Vec<Change> },
    /// The database was deleted.
    Deleted { db: String },
}

/// Borrowed form of [`JournalEntry::Snapshot`]; encodes to the same bytes.
#[derive(Serialize)]
enum SnapshotRef<'a> {
    Snapshot { db: &'a str, data: &'a DatabaseData },
}

pub(crate) type Databases = BTreeMap<String, DatabaseData>;

/// Outcome of a journal compaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactStats {
    /// Journal entries before compaction.
    pub entries_before: usize,
    /// Journal entries after compaction, one per database.
    pub entries_after: usize,
    /// Journal size before compaction.
    pub bytes_before: u64,
    /// Journal size after compaction.
    pub bytes_after: u64,
}

pub(crate) struct Journal {
    log: FrameLog<Box<dyn LogBackend>>,
    entries: usize,
    /// Size right after the last compaction, or at open.
    base_size: u64,
}

impl Journal {
    /// Opens the journal and rebuilds the databases it describes.
    pub(crate) fn open(backend: Box<dyn LogBackend>, sync_on_commit: bool) -> StoreResult<(Self, Databases)> {
        let log = FrameLog::open(backend)?.sync_on_append(sync_on_commit);
        let mut databases = Databases::new();
        let frames = log.frames()?;
        debug!(entries = frames.len(), "replaying journal");
        for (n, frame) in frames.iter().enumerate() {
            let entry: JournalEntry = ciborium::de::from_reader(frame.as_slice())
                .map_err(|e| StoreError::new(crate::ErrorCode::Journal, format!("entry {n}: {e}")))?;
            apply(&mut databases, entry);
        }
        let base_size = log.size()?;
        let journal = Self {
            log,
            entries: frames.len(),
            base_size,
        };
        Ok((journal, databases))
    }

    pub(crate) fn append(&mut self, entry: &JournalEntry) -> StoreResult<()> {
        let buf = encode(entry)?;
        self.log.append(&buf)?;
        self.entries += 1;
        Ok(())
    }

    /// Whether the journal has grown past `threshold` bytes and to more
    /// than twice its size after the last compaction.
    pub(crate) fn should_compact(&self, threshold: u64) -> StoreResult<bool> {
        let size = self.log.size()?;
        Ok(size > threshold && size > self.base_size.saturating_mul(2))
    }

    /// Replaces the history with one snapshot per database.
    pub(crate) fn compact(&mut self, databases: &Databases) -> StoreResult<CompactStats> {
        let bytes_before = self.log.size()?;
        let entries_before = self.entries;
        let payloads = databases
            .iter()
            .map(|(db, data)| encode(&SnapshotRef::Snapshot { db, data }))
            .collect::<StoreResult<Vec<_>>>()?;
        self.log.rewrite(&payloads)?;

        self.entries = payloads.len();
        self.base_size = self.log.size()?;
        Ok(CompactStats {
            entries_before,
            entries_after: self.entries,
            bytes_before,
            bytes_after: self.base_size,
        })
    }
}

fn encode(entry: &impl Serialize) -> StoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(entry, &mut buf)
        .map_err(|e| StoreError::new(crate::ErrorCode::Journal, e.to_string()))?;
    Ok(buf)
}

fn apply(databases: &mut Databases, entry: JournalEntry) {
    match entry {
        JournalEntry::Snapshot { db, data } => {
            databases.insert(db, data);
        }
        JournalEntry::Deleted { db } => {
            databases.remove(&db);
        }
        JournalEntry::Commit { db, changes } => {
            let Some(data) = databases.get_mut(&db) else {
                warn!(db = %db, "journal commit for unknown database");
                return;
            };
            apply_changes(data, changes);
        }
    }
}

/// Applies committed changes to a database image.
pub(crate) fn apply_changes(data: &mut DatabaseData, changes: Vec<Change>) {
    for change in changes {
        let name = match &change {
            Change::Put { store, .. } | Change::Delete { store, .. } | Change::Clear { store } => store.clone(),
        };
        let Some(store) = data.stores.get_mut(&name) else {
            warn!(store = %name, "journal change for unknown object store");
            continue;
        };
        match change {
            Change::Put {
                key,
                value,
                next_key,
                ..
            } => {
                store.insert_record(key, value);
                store.next_key = next_key;
            }
            Change::Delete { key, .. } => {
                store.remove_record(&key);
            }
            Change::Clear { .. } => store.clear_records(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::data::{StoreParams, VersionChange};
    use bistro_storage::InMemoryLog;
    use serde_json::json;

    #[test]
    fn snapshot_then_commits_rebuild_state() {
        let shared = InMemoryLog::new();
        {
            let (mut journal, dbs) = Journal::open(Box::new(shared.clone()), true).unwrap();
            assert!(dbs.is_empty());

            let mut data = DatabaseData::default();
            data.version = 1;
            VersionChange::new(&mut data, 0, 1)
                .create_object_store("restaurants", StoreParams::key_path("id"))
                .unwrap();
            journal
                .append(&JournalEntry::Snapshot {
                    db: "restaurant-db".into(),
                    data,
                })
                .unwrap();
            journal
                .append(&JournalEntry::Commit {
                    db: "restaurant-db".into(),
                    changes: vec![
                        Change::Put {
                            store: "restaurants".into(),
                            key: Key::from(1i64),
                            value: json!({"id": 1, "name": "Mission Chinese Food"}),
                            next_key: 1,
                        },
                        Change::Put {
                            store: "restaurants".into(),
                            key: Key::from(2i64),
                            value: json!({"id": 2, "name": "Emily"}),
                            next_key: 1,
                        },
                        Change::Delete {
                            store: "restaurants".into(),
                            key: Key::from(1i64),
                        },
                    ],
                })
                .unwrap();
        }

        let (_, dbs) = Journal::open(Box::new(shared), true).unwrap();
        let db = &dbs["restaurant-db"];
        assert_eq!(db.version, 1);
        let records = &db.stores["restaurants"].records;
        assert_eq!(records.len(), 1);
        assert_eq!(records[&Key::from(2i64)]["name"], json!("Emily"));
    }

    #[test]
    fn drop_removes_database() {
        let shared = InMemoryLog::new();
        {
            let (mut journal, _) = Journal::open(Box::new(shared.clone()), false).unwrap();
            journal
                .append(&JournalEntry::Snapshot {
                    db: "scratch".into(),
                    data: DatabaseData::default(),
                })
                .unwrap();
            journal.append(&JournalEntry::Deleted { db: "scratch".into() }).unwrap();
        }
        let (_, dbs) = Journal::open(Box::new(shared), false).unwrap();
        assert!(dbs.is_empty());
    }

    #[test]
    fn compacted_journal_replays_to_the_same_state() {
        let shared = InMemoryLog::new();
        let (stats, before) = {
            let (mut journal, _) = Journal::open(Box::new(shared.clone()), false).unwrap();
            let mut data = DatabaseData::default();
            data.version = 1;
            VersionChange::new(&mut data, 0, 1)
                .create_object_store("reviews", StoreParams::key_path("id"))
                .unwrap();
            let mut dbs = Databases::new();
            for db in ["kept", "dropped"] {
                journal
                    .append(&JournalEntry::Snapshot {
                        db: db.into(),
                        data: data.clone(),
                    })
                    .unwrap();
                dbs.insert(db.to_string(), data.clone());
            }
            for id in 1..=20i64 {
                let changes = vec![Change::Put {
                    store: "reviews".into(),
                    key: Key::from(id % 3),
                    value: json!({"id": id % 3, "comments": format!("edit {id}")}),
                    next_key: 1,
                }];
                journal
                    .append(&JournalEntry::Commit {
                        db: "kept".into(),
                        changes: changes.clone(),
                    })
                    .unwrap();
                apply_changes(dbs.get_mut("kept").unwrap(), changes);
            }
            journal.append(&JournalEntry::Deleted { db: "dropped".into() }).unwrap();
            dbs.remove("dropped");

            assert!(journal.should_compact(0).unwrap());
            let stats = journal.compact(&dbs).unwrap();
            assert!(!journal.should_compact(0).unwrap());
            (stats, dbs)
        };

        assert_eq!(stats.entries_before, 23);
        assert_eq!(stats.entries_after, 1);
        assert!(stats.bytes_after < stats.bytes_before);
        assert_eq!(shared.snapshot().len() as u64, stats.bytes_after);

        let (_, after) = Journal::open(Box::new(shared), false).unwrap();
        assert_eq!(after.keys().collect::<Vec<_>>(), vec!["kept"]);
        let records = &after["kept"].stores["reviews"].records;
        assert_eq!(records, &before["kept"].stores["reviews"].records);
        assert_eq!(records[&Key::from(2i64)]["comments"], json!("edit 20"));
    }

    #[test]
    fn garbage_frame_is_a_journal_error() {
        let shared = InMemoryLog::new();
        FrameLog::open(shared.clone()).unwrap().append(b"\xff\x00not cbor").unwrap();
        let err = Journal::open(Box::new(shared), true).err().unwrap();
        assert_eq!(err.code, crate::ErrorCode::Journal);
    }
}
