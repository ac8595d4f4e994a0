//! Versioned schema declarations and migrations.
//!
//! A [`Schema`] is an ordered set of [`Migration`] steps, each keyed by the
//! version it introduces. Opening a database through a schema runs every
//! step with `old_version < step.version <= new_version` inside the engine's
//! version change, so either all of them apply or none do.
//!
//! ## Usage
//!
//! ```rust,no_run
//! # async fn demo() -> Result<(), bistro_store::SchemaError> {
//! use bistro_store::{CreateStores, Engine, IndexSpec, Schema, StoreSpec};
//!
//! let mut schema = Schema::new();
//! schema.register(CreateStores::new(1, "initial").store(
//!     StoreSpec::key_path("reviews", "id").index(IndexSpec::new("restaurant_id", "restaurant_id")),
//! ))?;
//!
//! let engine = Engine::in_memory()?;
//! let db = schema.open(&engine, "restaurant-db", 1).await?;
//! # Ok(())
//! # }
//! ```

use crate::adapter::Database;
use crate::engine::{DatabaseInfo, Engine, StoreParams, VersionChange};
use crate::error::{ErrorCode, SchemaError, StoreError};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Version number of a schema.
pub type SchemaVersion = u32;

/// Declaration of a secondary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Index name.
    pub name: String,
    /// Key path projected from each record.
    pub key_path: String,
    /// Whether index keys must be unique.
    pub unique: bool,
}

impl IndexSpec {
    /// A non-unique index.
    pub fn new(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            unique: false,
        }
    }

    /// Makes the index unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Declaration of an object store and its indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSpec {
    /// Store name.
    pub name: String,
    /// Key configuration.
    pub params: StoreParams,
    /// Indexes on the store.
    pub indexes: Vec<IndexSpec>,
}

impl StoreSpec {
    /// A store with the given key configuration.
    pub fn new(name: impl Into<String>, params: StoreParams) -> Self {
        Self {
            name: name.into(),
            params,
            indexes: Vec::new(),
        }
    }

    /// A store whose records carry their key at `key_path`.
    pub fn key_path(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self::new(name, StoreParams::key_path(key_path))
    }

    /// Adds an index.
    #[must_use]
    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }
}

/// One schema step.
pub trait Migration: Send + Sync {
    /// Version this step introduces. Versions start at 1 with no gaps.
    fn version(&self) -> SchemaVersion;

    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Stores and indexes this step guarantees to exist afterwards.
    fn stores(&self) -> &[StoreSpec] {
        &[]
    }

    /// Applies the step.
    ///
    /// # Errors
    ///
    /// Any error fails the whole open and leaves the stored schema untouched.
    fn up(&self, change: &mut VersionChange<'_>) -> Result<(), SchemaError>;
}

/// Creates a store, refusing to recreate an existing one.
///
/// # Errors
///
/// [`SchemaError::AlreadyExists`] if the store exists.
pub fn create_store(change: &mut VersionChange<'_>, spec: &StoreSpec) -> Result<(), SchemaError> {
    if change.contains_store(&spec.name) {
        return Err(SchemaError::AlreadyExists {
            kind: "object store",
            name: spec.name.clone(),
        });
    }
    change.create_object_store(&spec.name, spec.params.clone())?;
    for index in &spec.indexes {
        create_index(change, &spec.name, index)?;
    }
    Ok(())
}

/// Creates an index, refusing to recreate an existing one.
///
/// # Errors
///
/// [`SchemaError::AlreadyExists`] if the index exists.
pub fn create_index(change: &mut VersionChange<'_>, store: &str, spec: &IndexSpec) -> Result<(), SchemaError> {
    if change.contains_index(store, &spec.name) {
        return Err(SchemaError::AlreadyExists {
            kind: "index",
            name: format!("{store}.{}", spec.name),
        });
    }
    change.create_index(store, &spec.name, &spec.key_path, spec.unique)?;
    Ok(())
}

/// A step that creates whatever part of its declared stores is missing.
///
/// Guarded by existence checks, so it is safe to run against a database that
/// already has some or all of the stores.
#[derive(Debug, Clone)]
pub struct CreateStores {
    version: SchemaVersion,
    name: String,
    stores: Vec<StoreSpec>,
}

impl CreateStores {
    /// An empty step for `version`.
    pub fn new(version: SchemaVersion, name: impl Into<String>) -> Self {
        Self {
            version,
            name: name.into(),
            stores: Vec::new(),
        }
    }

    /// Declares a store.
    #[must_use]
    pub fn store(mut self, spec: StoreSpec) -> Self {
        self.stores.push(spec);
        self
    }
}

impl Migration for CreateStores {
    fn version(&self) -> SchemaVersion {
        self.version
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn stores(&self) -> &[StoreSpec] {
        &self.stores
    }

    fn up(&self, change: &mut VersionChange<'_>) -> Result<(), SchemaError> {
        for spec in &self.stores {
            if !change.contains_store(&spec.name) {
                debug!(store = %spec.name, "creating object store");
                change.create_object_store(&spec.name, spec.params.clone())?;
            }
            for index in &spec.indexes {
                if !change.contains_index(&spec.name, &index.name) {
                    debug!(store = %spec.name, index = %index.name, "creating index");
                    create_index(change, &spec.name, index)?;
                }
            }
        }
        Ok(())
    }
}

/// An ordered set of migrations.
///
/// Cloning is cheap; clones share the registered steps.
#[derive(Clone, Default)]
pub struct Schema {
    migrations: BTreeMap<SchemaVersion, Arc<dyn Migration>>,
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.migrations.iter().map(|(v, m)| (v, m.name())))
            .finish()
    }
}

impl Schema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a step.
    ///
    /// # Errors
    ///
    /// [`SchemaError::DuplicateVersion`] if a step for the version exists.
    pub fn register(&mut self, migration: impl Migration + 'static) -> Result<(), SchemaError> {
        let version = migration.version();
        if self.migrations.contains_key(&version) {
            return Err(SchemaError::DuplicateVersion(version));
        }
        self.migrations.insert(version, Arc::new(migration));
        Ok(())
    }

    /// Highest registered version, or 0 if none.
    pub fn latest_version(&self) -> SchemaVersion {
        self.migrations.keys().next_back().copied().unwrap_or(0)
    }

    /// Checks that versions start at 1 and have no gaps.
    ///
    /// # Errors
    ///
    /// [`SchemaError::VersionGap`] naming the first gap.
    pub fn validate(&self) -> Result<(), SchemaError> {
        for (expected, actual) in (1..).zip(self.migrations.keys().copied()) {
            if actual != expected {
                return Err(SchemaError::VersionGap { expected, actual });
            }
        }
        Ok(())
    }

    /// Runs the steps between the change's old and new versions, in order.
    ///
    /// # Errors
    ///
    /// The first failing step, wrapped in [`SchemaError::StepFailed`] unless
    /// it is already a schema-level error.
    pub fn upgrade(&self, change: &mut VersionChange<'_>) -> Result<(), SchemaError> {
        let (old, new) = (change.old_version(), change.new_version());
        for (version, step) in self.migrations.range(old + 1..=new) {
            info!(version, step = step.name(), "applying migration");
            step.up(change).map_err(|err| match err {
                SchemaError::Store(source) => SchemaError::StepFailed {
                    version: *version,
                    name: step.name().to_string(),
                    source,
                },
                other => other,
            })?;
        }
        Ok(())
    }

    /// Checks that `info` has every store and index declared by steps up to
    /// its version.
    ///
    /// # Errors
    ///
    /// [`SchemaError::MissingStore`] or [`SchemaError::MissingIndex`].
    pub fn verify(&self, info: &DatabaseInfo) -> Result<(), SchemaError> {
        for step in self.migrations.range(..=info.version).map(|(_, m)| m) {
            for spec in step.stores() {
                let store = info
                    .store(&spec.name)
                    .ok_or_else(|| SchemaError::MissingStore(spec.name.clone()))?;
                for index in &spec.indexes {
                    if !store.indexes.iter().any(|i| i.name == index.name) {
                        return Err(SchemaError::MissingIndex {
                            store: spec.name.clone(),
                            index: index.name.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Opens `name` at `version`, migrating as needed, and verifies the
    /// result.
    ///
    /// # Errors
    ///
    /// Any [`SchemaError`]; on failure nothing is written.
    pub async fn open(&self, engine: &Engine, name: &str, version: SchemaVersion) -> Result<Database, SchemaError> {
        self.validate()?;
        let failure: Arc<Mutex<Option<SchemaError>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&failure);
        let schema = self.clone();
        let opened = Database::open(engine, name, version, move |change| {
            schema.upgrade(change).map_err(|err| {
                let code = match &err {
                    SchemaError::Store(e) | SchemaError::StepFailed { source: e, .. } => e.code,
                    _ => ErrorCode::ConstraintError,
                };
                let mapped = StoreError::new(code, err.to_string());
                *slot.lock() = Some(err);
                mapped
            })
        })
        .await;

        let db = match opened {
            Ok(db) => db,
            Err(err) => return Err(failure.lock().take().unwrap_or(SchemaError::Store(err))),
        };
        self.verify(&db.info().await?)?;
        Ok(db)
    }
}
