//! In-memory representation of databases, object stores and indexes.

use crate::error::{StoreError, StoreResult};
use crate::key::{extract_key, inject_key, Key, KeyRange};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

/// Direction of a cursor scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorDirection {
    /// Ascending key order.
    #[default]
    Next,
    /// Descending key order.
    Prev,
}

/// One record produced by a cursor step.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorRecord {
    /// The effective key: the index key for index cursors, else the primary key.
    pub key: Key,
    /// The record's primary key.
    pub primary_key: Key,
    /// The record value.
    pub value: Value,
}

impl CursorRecord {
    /// Position of this record within its scan.
    pub(crate) fn position(&self) -> (Key, Key) {
        (self.key.clone(), self.primary_key.clone())
    }
}

/// Parameters for a new object store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreParams {
    /// In-line key path; `None` means keys are supplied out of line.
    pub key_path: Option<String>,
    /// Whether missing keys are generated from a counter.
    pub auto_increment: bool,
}

impl StoreParams {
    /// Records carry their key at `path`.
    pub fn key_path(path: impl Into<String>) -> Self {
        Self {
            key_path: Some(path.into()),
            auto_increment: false,
        }
    }

    /// Keys are generated when absent.
    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }
}

/// Definition of a secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    /// Key path projected from each record.
    pub key_path: String,
    /// Whether two records may share an index key.
    pub unique: bool,
}

/// A single object store.
///
/// Each index keeps its entries as a sorted set of `(index key, primary
/// key)` pairs, updated on every write. The sets are not persisted; they are
/// rebuilt from the records when a store image is loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "StoreImage")]
pub struct StoreData {
    pub(crate) key_path: Option<String>,
    pub(crate) auto_increment: bool,
    pub(crate) next_key: u64,
    pub(crate) indexes: BTreeMap<String, IndexMeta>,
    #[serde(with = "record_pairs")]
    pub(crate) records: BTreeMap<Key, Value>,
    #[serde(skip)]
    entries: BTreeMap<String, BTreeSet<(Key, Key)>>,
}

/// Persisted form of a [`StoreData`].
#[derive(Deserialize)]
struct StoreImage {
    key_path: Option<String>,
    auto_increment: bool,
    next_key: u64,
    indexes: BTreeMap<String, IndexMeta>,
    #[serde(deserialize_with = "record_pairs::deserialize")]
    records: BTreeMap<Key, Value>,
}

impl From<StoreImage> for StoreData {
    fn from(image: StoreImage) -> Self {
        let mut store = Self {
            key_path: image.key_path,
            auto_increment: image.auto_increment,
            next_key: image.next_key,
            indexes: image.indexes,
            records: image.records,
            entries: BTreeMap::new(),
        };
        let names: Vec<String> = store.indexes.keys().cloned().collect();
        for name in names {
            let built = store.build_entries(&name, false).unwrap_or_default();
            store.entries.insert(name, built);
        }
        store
    }
}

/// A named, versioned database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseData {
    pub(crate) version: u32,
    pub(crate) stores: BTreeMap<String, StoreData>,
}

mod record_pairs {
    use crate::key::Key;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(records: &BTreeMap<Key, Value>, s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(records.iter())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<Key, Value>, D::Error> {
        let pairs: Vec<(Key, Value)> = Vec::deserialize(d)?;
        Ok(pairs.into_iter().collect())
    }
}

/// Records without a valid key at the index path are not indexed.
fn index_key(meta: &IndexMeta, value: &Value) -> Option<Key> {
    extract_key(value, &meta.key_path).ok().flatten()
}

/// First position an index entry with key `key` can take.
fn first_entry(key: &Key) -> (Key, Key) {
    (key.clone(), Key::lowest())
}

impl StoreData {
    pub(crate) fn new(params: StoreParams) -> Self {
        Self {
            key_path: params.key_path,
            auto_increment: params.auto_increment,
            next_key: 1,
            indexes: BTreeMap::new(),
            records: BTreeMap::new(),
            entries: BTreeMap::new(),
        }
    }

    /// Resolves the primary key for a value being written, generating and
    /// injecting one when the store allows it.
    fn resolve_key(&mut self, value: &mut Value, explicit: Option<Key>) -> StoreResult<Key> {
        let key = match (&self.key_path, explicit) {
            (Some(_), Some(_)) => {
                return Err(StoreError::data(
                    "store uses in-line keys; an explicit key is not allowed",
                ))
            }
            (Some(path), None) => {
                if !value.is_object() {
                    return Err(StoreError::data("in-line keys require an object value"));
                }
                match extract_key(value, path)? {
                    Some(key) => key,
                    None if self.auto_increment => {
                        let key = Key::from(self.next_key);
                        inject_key(value, path, &key)?;
                        key
                    }
                    None => {
                        return Err(StoreError::data(format!(
                            "value has no key at '{path}' and the store does not generate keys"
                        )))
                    }
                }
            }
            (None, Some(key)) => key,
            (None, None) if self.auto_increment => Key::from(self.next_key),
            (None, None) => {
                return Err(StoreError::data(
                    "store uses out-of-line keys and no key was supplied",
                ))
            }
        };

        if self.auto_increment {
            if let Key::Number(n) = key {
                if n >= self.next_key as f64 {
                    self.next_key = n.floor() as u64 + 1;
                }
            }
        }
        Ok(key)
    }

    fn check_unique(&self, primary_key: &Key, value: &Value) -> StoreResult<()> {
        for (name, meta) in self.indexes.iter().filter(|(_, m)| m.unique) {
            let Some(key) = index_key(meta, value) else {
                continue;
            };
            let clash = self.entries.get(name).is_some_and(|entries| {
                entries
                    .range(first_entry(&key)..)
                    .take_while(|(ik, _)| *ik == key)
                    .any(|(_, pk)| pk != primary_key)
            });
            if clash {
                return Err(StoreError::constraint(format!(
                    "unique index '{name}' already contains {key}"
                )));
            }
        }
        Ok(())
    }

    /// Adds or removes the index entries of one record.
    fn update_entries(&mut self, primary_key: &Key, value: &Value, present: bool) {
        for (name, meta) in &self.indexes {
            let Some(key) = index_key(meta, value) else {
                continue;
            };
            let entries = self.entries.entry(name.clone()).or_default();
            if present {
                entries.insert((key, primary_key.clone()));
            } else {
                entries.remove(&(key, primary_key.clone()));
            }
        }
    }

    /// Stores a record and indexes it, replacing any previous version.
    pub(crate) fn insert_record(&mut self, key: Key, value: Value) {
        if let Some(old) = self.records.remove(&key) {
            self.update_entries(&key, &old, false);
        }
        self.update_entries(&key, &value, true);
        self.records.insert(key, value);
    }

    /// Removes a record and its index entries.
    pub(crate) fn remove_record(&mut self, key: &Key) -> Option<Value> {
        let old = self.records.remove(key)?;
        self.update_entries(key, &old, false);
        Some(old)
    }

    /// Removes every record.
    pub(crate) fn clear_records(&mut self) {
        self.records.clear();
        for entries in self.entries.values_mut() {
            entries.clear();
        }
    }

    /// Collects the entries of index `name` from the records. With
    /// `unique`, a repeated index key is a constraint error.
    fn build_entries(&self, name: &str, unique: bool) -> StoreResult<BTreeSet<(Key, Key)>> {
        let meta = self.index_meta(name)?;
        let mut entries: BTreeSet<(Key, Key)> = BTreeSet::new();
        for (pk, value) in &self.records {
            let Some(key) = index_key(meta, value) else {
                continue;
            };
            if unique && entries.range(first_entry(&key)..).next().is_some_and(|(ik, _)| *ik == key) {
                return Err(StoreError::constraint(format!(
                    "existing records violate unique index '{name}'"
                )));
            }
            entries.insert((key, pk.clone()));
        }
        Ok(entries)
    }

    /// Adds an index over existing and future records.
    pub(crate) fn add_index(&mut self, name: &str, meta: IndexMeta) -> StoreResult<()> {
        let unique = meta.unique;
        self.indexes.insert(name.to_string(), meta);
        match self.build_entries(name, unique) {
            Ok(entries) => {
                self.entries.insert(name.to_string(), entries);
                Ok(())
            }
            Err(err) => {
                self.indexes.remove(name);
                Err(err)
            }
        }
    }

    /// Drops an index and its entries.
    pub(crate) fn drop_index(&mut self, name: &str) -> StoreResult<()> {
        self.entries.remove(name);
        self.indexes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(format!("index '{name}' does not exist")))
    }

    /// Inserts or replaces a record. With `no_overwrite`, an existing key is
    /// a constraint error.
    pub(crate) fn put(&mut self, mut value: Value, key: Option<Key>, no_overwrite: bool) -> StoreResult<(Key, Value)> {
        let generator = self.next_key;
        let key = self.resolve_key(&mut value, key)?;
        let result = if no_overwrite && self.records.contains_key(&key) {
            Err(StoreError::constraint(format!("key {key} already exists")))
        } else {
            self.check_unique(&key, &value)
        };
        if let Err(err) = result {
            self.next_key = generator;
            return Err(err);
        }
        self.insert_record(key.clone(), value.clone());
        Ok((key, value))
    }

    /// Deletes every record in `range`, returning the removed keys.
    pub(crate) fn delete_range(&mut self, range: &KeyRange) -> Vec<Key> {
        let doomed: Vec<Key> = self.primary_keys(range).cloned().collect();
        for key in &doomed {
            self.remove_record(key);
        }
        doomed
    }

    fn index_meta(&self, index: &str) -> StoreResult<&IndexMeta> {
        self.indexes
            .get(index)
            .ok_or_else(|| StoreError::not_found(format!("index '{index}' does not exist")))
    }

    fn index_entries(&self, index: &str) -> StoreResult<Option<&BTreeSet<(Key, Key)>>> {
        self.index_meta(index)?;
        Ok(self.entries.get(index))
    }

    /// Primary keys in `range`, ascending.
    fn primary_keys<'a>(&'a self, range: &'a KeyRange) -> impl Iterator<Item = &'a Key> + 'a {
        let start = range.lower_key().map_or(Bound::Unbounded, |k| Bound::Included(k.clone()));
        self.records
            .range((start, Bound::Unbounded))
            .map(|(k, _)| k)
            .skip_while(move |k| range.lies_below(k))
            .take_while(move |k| !range.lies_above(k))
    }

    /// Finds the record following `after` in scan order.
    pub(crate) fn seek(
        &self,
        index: Option<&str>,
        range: &KeyRange,
        direction: CursorDirection,
        after: Option<&(Key, Key)>,
    ) -> StoreResult<Option<CursorRecord>> {
        let found = match index {
            None => {
                let hit = match (direction, after) {
                    (CursorDirection::Next, None) => self.primary_keys(range).next(),
                    (CursorDirection::Next, Some((_, pk))) => self
                        .records
                        .range((Bound::Excluded(pk.clone()), Bound::Unbounded))
                        .map(|(k, _)| k)
                        .skip_while(|k| range.lies_below(k))
                        .find(|k| !range.lies_above(k)),
                    (CursorDirection::Prev, after) => {
                        let end = after.map_or(Bound::Unbounded, |(_, pk)| Bound::Excluded(pk.clone()));
                        self.records
                            .range((Bound::Unbounded, end))
                            .rev()
                            .map(|(k, _)| k)
                            .skip_while(|k| range.lies_above(k))
                            .find(|k| !range.lies_below(k))
                    }
                };
                hit.filter(|k| range.contains(k)).map(|k| (k.clone(), k.clone()))
            }
            Some(name) => {
                let Some(entries) = self.index_entries(name)? else {
                    return Ok(None);
                };
                let hit = match direction {
                    CursorDirection::Next => {
                        let start = match (after, range.lower_key()) {
                            (Some(pos), _) => Bound::Excluded(pos.clone()),
                            (None, Some(lower)) => Bound::Included(first_entry(lower)),
                            (None, None) => Bound::Unbounded,
                        };
                        entries
                            .range((start, Bound::Unbounded))
                            .skip_while(|(k, _)| range.lies_below(k))
                            .find(|(k, _)| !range.lies_above(k))
                    }
                    CursorDirection::Prev => {
                        let end = after.map_or(Bound::Unbounded, |pos| Bound::Excluded(pos.clone()));
                        entries
                            .range((Bound::Unbounded, end))
                            .rev()
                            .skip_while(|(k, _)| range.lies_above(k))
                            .find(|(k, _)| !range.lies_below(k))
                    }
                };
                hit.filter(|(k, _)| range.contains(k)).cloned()
            }
        };

        Ok(found.and_then(|(key, primary_key)| {
            self.records.get(&primary_key).map(|value| CursorRecord {
                key,
                primary_key: primary_key.clone(),
                value: value.clone(),
            })
        }))
    }

    /// Counts records in `range` of the store or one of its indexes.
    pub(crate) fn count(&self, index: Option<&str>, range: &KeyRange) -> StoreResult<u64> {
        let n = match index {
            None => self.primary_keys(range).count(),
            Some(name) => match self.index_entries(name)? {
                None => 0,
                Some(entries) => {
                    let start = range
                        .lower_key()
                        .map_or(Bound::Unbounded, |k| Bound::Included(first_entry(k)));
                    entries
                        .range((start, Bound::Unbounded))
                        .skip_while(|(k, _)| range.lies_below(k))
                        .take_while(|(k, _)| !range.lies_above(k))
                        .count()
                }
            },
        };
        Ok(n as u64)
    }

    pub(crate) fn info(&self, name: &str) -> StoreInfo {
        StoreInfo {
            name: name.to_string(),
            key_path: self.key_path.clone(),
            auto_increment: self.auto_increment,
            indexes: self
                .indexes
                .iter()
                .map(|(n, m)| IndexInfo {
                    name: n.clone(),
                    key_path: m.key_path.clone(),
                    unique: m.unique,
                })
                .collect(),
            record_count: self.records.len() as u64,
        }
    }
}

impl DatabaseData {
    pub(crate) fn info(&self, name: &str) -> DatabaseInfo {
        DatabaseInfo {
            name: name.to_string(),
            version: self.version,
            stores: self.stores.iter().map(|(n, s)| s.info(n)).collect(),
        }
    }
}

/// Description of an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexInfo {
    /// Index name.
    pub name: String,
    /// Projected key path.
    pub key_path: String,
    /// Whether the index is unique.
    pub unique: bool,
}

/// Description of an object store at the time it was captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreInfo {
    /// Store name.
    pub name: String,
    /// In-line key path, if any.
    pub key_path: Option<String>,
    /// Whether keys are generated.
    pub auto_increment: bool,
    /// Indexes on the store.
    pub indexes: Vec<IndexInfo>,
    /// Number of records.
    pub record_count: u64,
}

/// Description of a database at the time it was captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseInfo {
    /// Database name.
    pub name: String,
    /// Schema version.
    pub version: u32,
    /// Object stores, by name.
    pub stores: Vec<StoreInfo>,
}

impl DatabaseInfo {
    /// Looks up a store by name.
    pub fn store(&self, name: &str) -> Option<&StoreInfo> {
        self.stores.iter().find(|s| s.name == name)
    }
}

/// Schema access granted to an upgrade callback.
///
/// Every change is made on a private copy of the database and only becomes
/// visible if the whole upgrade succeeds.
pub struct VersionChange<'a> {
    data: &'a mut DatabaseData,
    old_version: u32,
    new_version: u32,
}

impl<'a> VersionChange<'a> {
    pub(crate) fn new(data: &'a mut DatabaseData, old_version: u32, new_version: u32) -> Self {
        Self {
            data,
            old_version,
            new_version,
        }
    }

    /// Version stored before this upgrade (0 for a new database).
    pub fn old_version(&self) -> u32 {
        self.old_version
    }

    /// Version being upgraded to.
    pub fn new_version(&self) -> u32 {
        self.new_version
    }

    /// Names of existing stores.
    pub fn store_names(&self) -> Vec<String> {
        self.data.stores.keys().cloned().collect()
    }

    /// Returns true if the store exists.
    pub fn contains_store(&self, name: &str) -> bool {
        self.data.stores.contains_key(name)
    }

    /// Returns true if the store exists and has the index.
    pub fn contains_index(&self, store: &str, index: &str) -> bool {
        self.data
            .stores
            .get(store)
            .is_some_and(|s| s.indexes.contains_key(index))
    }

    fn store_mut(&mut self, name: &str) -> StoreResult<&mut StoreData> {
        self.data
            .stores
            .get_mut(name)
            .ok_or_else(|| StoreError::not_found(format!("object store '{name}' does not exist")))
    }

    /// Creates an object store.
    ///
    /// # Errors
    ///
    /// `ConstraintError` if a store with this name exists.
    pub fn create_object_store(&mut self, name: &str, params: StoreParams) -> StoreResult<()> {
        if self.contains_store(name) {
            return Err(StoreError::constraint(format!("object store '{name}' already exists")));
        }
        self.data.stores.insert(name.to_string(), StoreData::new(params));
        Ok(())
    }

    /// Deletes an object store and all its records.
    ///
    /// # Errors
    ///
    /// `NotFound` if the store does not exist.
    pub fn delete_object_store(&mut self, name: &str) -> StoreResult<()> {
        self.data
            .stores
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(format!("object store '{name}' does not exist")))
    }

    /// Creates an index over existing and future records.
    ///
    /// # Errors
    ///
    /// `ConstraintError` if the index exists or existing records violate a
    /// unique index; `NotFound` if the store does not exist.
    pub fn create_index(&mut self, store: &str, name: &str, key_path: &str, unique: bool) -> StoreResult<()> {
        let data = self.store_mut(store)?;
        if data.indexes.contains_key(name) {
            return Err(StoreError::constraint(format!(
                "index '{name}' already exists on '{store}'"
            )));
        }
        data.add_index(
            name,
            IndexMeta {
                key_path: key_path.to_string(),
                unique,
            },
        )
    }

    /// Deletes an index.
    ///
    /// # Errors
    ///
    /// `NotFound` if the store or index does not exist.
    pub fn delete_index(&mut self, store: &str, name: &str) -> StoreResult<()> {
        self.store_mut(store)?.drop_index(name)
    }

    /// Writes a record as part of the upgrade (data migrations, seeding).
    ///
    /// # Errors
    ///
    /// Same as a transactional put.
    pub fn put(&mut self, store: &str, value: Value, key: Option<Key>) -> StoreResult<Key> {
        self.store_mut(store)?.put(value, key, false).map(|(k, _)| k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reviews() -> StoreData {
        let mut store = StoreData::new(StoreParams::key_path("id"));
        store
            .add_index(
                "restaurant_id",
                IndexMeta {
                    key_path: "restaurant_id".into(),
                    unique: false,
                },
            )
            .unwrap();
        for (id, rid) in [(1, 2), (2, 1), (3, 2), (4, 1)] {
            store.put(json!({"id": id, "restaurant_id": rid}), None, false).unwrap();
        }
        store
    }

    #[test]
    fn auto_increment_injects_key() {
        let mut store = StoreData::new(StoreParams::key_path("queue_key").auto_increment());
        let (k1, v1) = store.put(json!({"kind": "review"}), None, false).unwrap();
        let (k2, _) = store.put(json!({"kind": "favorite"}), None, false).unwrap();
        assert_eq!(k1, Key::from(1i64));
        assert_eq!(k2, Key::from(2i64));
        assert_eq!(v1["queue_key"], json!(1));
    }

    #[test]
    fn explicit_numeric_key_advances_generator() {
        let mut store = StoreData::new(StoreParams::default().auto_increment());
        store.put(json!("a"), Some(Key::from(10i64)), false).unwrap();
        let (k, _) = store.put(json!("b"), None, false).unwrap();
        assert_eq!(k, Key::from(11i64));
    }

    #[test]
    fn missing_inline_key_is_data_error() {
        let mut store = StoreData::new(StoreParams::key_path("id"));
        let err = store.put(json!({"name": "x"}), None, false).unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::DataError);
    }

    #[test]
    fn add_refuses_existing_key() {
        let mut store = reviews();
        let err = store.put(json!({"id": 1}), None, true).unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::ConstraintError);
    }

    #[test]
    fn index_scan_orders_by_index_then_primary_key() {
        let store = reviews();
        let mut after = None;
        let mut seen = Vec::new();
        while let Some(rec) = store
            .seek(Some("restaurant_id"), &KeyRange::all(), CursorDirection::Next, after.as_ref())
            .unwrap()
        {
            seen.push(rec.primary_key.as_i64().unwrap());
            after = Some(rec.position());
        }
        assert_eq!(seen, vec![2, 4, 1, 3]);
    }

    #[test]
    fn index_follows_replacements_and_deletes() {
        let mut store = reviews();
        store.put(json!({"id": 1, "restaurant_id": 1}), None, false).unwrap();
        assert_eq!(store.count(Some("restaurant_id"), &KeyRange::only(1i64)).unwrap(), 3);
        assert_eq!(store.count(Some("restaurant_id"), &KeyRange::only(2i64)).unwrap(), 1);

        store.delete_range(&KeyRange::only(2i64));
        assert_eq!(store.count(Some("restaurant_id"), &KeyRange::only(1i64)).unwrap(), 2);

        store.clear_records();
        assert_eq!(store.count(Some("restaurant_id"), &KeyRange::all()).unwrap(), 0);
    }

    #[test]
    fn ranged_index_scan_stops_at_the_range_end() {
        let store = reviews();
        let range = KeyRange::only(2i64);
        let first = store
            .seek(Some("restaurant_id"), &range, CursorDirection::Next, None)
            .unwrap()
            .unwrap();
        assert_eq!(first.primary_key, Key::from(1i64));
        let second = store
            .seek(Some("restaurant_id"), &range, CursorDirection::Next, Some(&first.position()))
            .unwrap()
            .unwrap();
        assert_eq!(second.primary_key, Key::from(3i64));
        assert!(store
            .seek(Some("restaurant_id"), &range, CursorDirection::Next, Some(&second.position()))
            .unwrap()
            .is_none());

        let last = store
            .seek(Some("restaurant_id"), &KeyRange::only(1i64), CursorDirection::Prev, None)
            .unwrap()
            .unwrap();
        assert_eq!(last.primary_key, Key::from(4i64));
    }

    #[test]
    fn decoded_store_rebuilds_its_indexes() {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&reviews(), &mut buf).unwrap();
        let loaded: StoreData = ciborium::de::from_reader(buf.as_slice()).unwrap();
        assert_eq!(loaded.count(Some("restaurant_id"), &KeyRange::only(2i64)).unwrap(), 2);
        let first = loaded
            .seek(Some("restaurant_id"), &KeyRange::all(), CursorDirection::Next, None)
            .unwrap()
            .unwrap();
        assert_eq!(first.primary_key, Key::from(2i64));
    }

    #[test]
    fn prev_scan_walks_backwards() {
        let store = reviews();
        let first = store
            .seek(None, &KeyRange::all(), CursorDirection::Prev, None)
            .unwrap()
            .unwrap();
        assert_eq!(first.primary_key, Key::from(4i64));
        let second = store
            .seek(None, &KeyRange::all(), CursorDirection::Prev, Some(&first.position()))
            .unwrap()
            .unwrap();
        assert_eq!(second.primary_key, Key::from(3i64));
    }

    #[test]
    fn count_through_index() {
        let store = reviews();
        assert_eq!(store.count(Some("restaurant_id"), &KeyRange::only(1i64)).unwrap(), 2);
        assert_eq!(store.count(None, &KeyRange::all()).unwrap(), 4);
        assert!(store.count(Some("nope"), &KeyRange::all()).is_err());
    }

    #[test]
    fn unique_index_rejects_duplicates() {
        let mut db = DatabaseData::default();
        let mut vc = VersionChange::new(&mut db, 0, 1);
        vc.create_object_store("users", StoreParams::key_path("id")).unwrap();
        vc.create_index("users", "email", "email", true).unwrap();
        vc.put("users", json!({"id": 1, "email": "a@x"}), None).unwrap();
        let err = vc.put("users", json!({"id": 2, "email": "a@x"}), None).unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::ConstraintError);
        vc.put("users", json!({"id": 1, "email": "a@x", "name": "same record"}), None).unwrap();
    }

    #[test]
    fn recreating_store_or_index_is_constraint_error() {
        let mut db = DatabaseData::default();
        let mut vc = VersionChange::new(&mut db, 0, 1);
        vc.create_object_store("reviews", StoreParams::key_path("id")).unwrap();
        vc.create_index("reviews", "restaurant_id", "restaurant_id", false).unwrap();
        assert!(vc.create_object_store("reviews", StoreParams::default()).is_err());
        assert!(vc.create_index("reviews", "restaurant_id", "restaurant_id", false).is_err());
        assert!(vc.contains_index("reviews", "restaurant_id"));
    }
}
