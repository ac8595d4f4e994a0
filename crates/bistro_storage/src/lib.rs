//! # Bistro Storage
//!
//! Durable byte logs underneath the Bistro object store.
//!
//! The object store keeps its working set in memory and appends every
//! committed transaction to a log. This crate owns only the byte level:
//!
//! - [`LogBackend`] - an append-only byte store that can also be swapped out whole
//! - [`InMemoryLog`] - for tests and ephemeral sessions
//! - [`FileLog`] - a single file on disk
//! - [`FrameLog`] - length-prefixed, CRC32-checked frames on top of any backend
//!
//! Backends never interpret frame payloads; the store decides what a frame
//! means.
//!
//! ## Example
//!
//! ```rust
//! use bistro_storage::{FrameLog, InMemoryLog};
//!
//! let mut log = FrameLog::open(InMemoryLog::new()).unwrap();
//! log.append(b"first").unwrap();
//! log.append(b"second").unwrap();
//! assert_eq!(log.frames().unwrap(), vec![b"first".to_vec(), b"second".to_vec()]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod frame;
mod memory;

pub use backend::LogBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileLog;
pub use frame::{FrameLog, FRAME_HEADER_SIZE, FRAME_MAGIC};
pub use memory::InMemoryLog;
