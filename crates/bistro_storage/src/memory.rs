//! In-memory log backend.

use crate::backend::LogBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// A log kept entirely in memory.
///
/// Clones share the same buffer, which lets a test keep a handle to the
/// bytes after handing the log to a store, then reopen a second store on the
/// same contents to simulate a restart.
///
/// ```rust
/// use bistro_storage::{InMemoryLog, LogBackend};
///
/// let mut log = InMemoryLog::new();
/// let shared = log.clone();
/// log.append(b"abc").unwrap();
/// assert_eq!(shared.read_all().unwrap(), b"abc");
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryLog {
    data: Arc<RwLock<Vec<u8>>>,
}

impl InMemoryLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a log preloaded with bytes, e.g. a deliberately torn tail.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Returns a copy of the current bytes.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl LogBackend for InMemoryLog {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        Ok(self.data.read().clone())
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;
        if new_size > size {
            return Err(StorageError::TruncatePastEnd {
                requested: new_size,
                size,
            });
        }
        data.truncate(new_size as usize);
        Ok(())
    }

    fn replace(&mut self, bytes: &[u8]) -> StorageResult<()> {
        *self.data.write() = bytes.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_returns_offsets() {
        let mut log = InMemoryLog::new();
        assert_eq!(log.append(b"hello").unwrap(), 0);
        assert_eq!(log.append(b" world").unwrap(), 5);
        assert_eq!(log.size().unwrap(), 11);
        assert_eq!(log.read_all().unwrap(), b"hello world");
    }

    #[test]
    fn clones_share_contents() {
        let mut log = InMemoryLog::new();
        let other = log.clone();
        log.append(b"x").unwrap();
        assert_eq!(other.snapshot(), b"x");
    }

    #[test]
    fn truncate_past_end_fails() {
        let mut log = InMemoryLog::with_data(b"abc".to_vec());
        assert!(matches!(
            log.truncate(10),
            Err(StorageError::TruncatePastEnd { requested: 10, size: 3 })
        ));
        log.truncate(1).unwrap();
        assert_eq!(log.snapshot(), b"a");
    }

    #[test]
    fn replace_is_seen_by_clones() {
        let mut log = InMemoryLog::with_data(b"old contents".to_vec());
        let other = log.clone();
        log.replace(b"new").unwrap();
        assert_eq!(other.snapshot(), b"new");
        assert_eq!(log.append(b"!").unwrap(), 3);
    }
}
