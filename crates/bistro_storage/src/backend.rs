//! Log backend trait definition.

use crate::error::StorageResult;

/// An append-only byte store.
///
/// Backends are opaque: they hold whatever bytes [`crate::FrameLog`] hands
/// them and return them unchanged.
///
/// # Invariants
///
/// - `append` writes at the current end and returns the offset it wrote at
/// - `read_all` returns every byte appended since the last truncate
/// - `replace` is all or nothing: after a crash the log holds either the old
///   or the new contents
/// - after `sync` returns, appended bytes survive process termination
pub trait LogBackend: Send + Sync {
    /// Returns the full contents of the log.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying medium cannot be read.
    fn read_all(&self) -> StorageResult<Vec<u8>>;

    /// Appends bytes to the end of the log, returning the offset written at.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Makes all appended bytes durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the current length in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Drops every byte at or after `new_size`.
    ///
    /// Used to cut a torn tail frame after a crash.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` exceeds the current size or the
    /// truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Swaps the whole contents of the log for `data`, durably.
    ///
    /// # Errors
    ///
    /// Returns an error if the new contents cannot be written. The old
    /// contents are left in place in that case.
    fn replace(&mut self, data: &[u8]) -> StorageResult<()>;
}

impl<B: LogBackend + ?Sized> LogBackend for Box<B> {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        (**self).read_all()
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        (**self).append(data)
    }

    fn sync(&mut self) -> StorageResult<()> {
        (**self).sync()
    }

    fn size(&self) -> StorageResult<u64> {
        (**self).size()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        (**self).truncate(new_size)
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        (**self).replace(data)
    }
}
