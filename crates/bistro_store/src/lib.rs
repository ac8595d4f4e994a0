//! # Bistro Store
//!
//! An embedded, transactional object store with a future-based adapter.
//!
//! This crate provides:
//! - [`Engine`] - a callback-driven engine on its own worker thread, with
//!   named versioned databases, object stores, secondary indexes and an
//!   optional durable journal that can be compacted to one snapshot per
//!   database
//! - [`Database`], [`Transaction`], [`ObjectStore`], [`Index`], [`Cursor`] -
//!   awaitable wrappers where every call resolves once with a value or a
//!   [`StoreError`]
//! - [`Schema`] - versioned migrations with existence-guarded steps
//!
//! Keys are [`Key`]s: numbers sort before strings. Records are JSON values.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod adapter;
pub mod engine;
mod error;
mod key;
pub mod schema;

pub use adapter::{Cursor, Database, Index, ObjectStore, Transaction};
pub use engine::{
    CompactStats, CursorDirection, CursorRecord, DatabaseInfo, Engine, EngineConfig, IndexInfo,
    StoreInfo, StoreParams, TransactionMode, VersionChange,
};
pub use error::{ErrorCode, SchemaError, StoreError, StoreResult};
pub use key::{extract_key, inject_key, Key, KeyRange};
pub use schema::{create_index, create_store, CreateStores, IndexSpec, Migration, Schema, SchemaVersion, StoreSpec};
