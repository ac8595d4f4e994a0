//! File-backed log.

use crate::backend::LogBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A log stored in a single file.
///
/// `sync` calls `File::sync_all`, so a synced frame survives power loss on
/// filesystems that honor it.
#[derive(Debug)]
pub struct FileLog {
    path: PathBuf,
    file: Mutex<File>,
    size: u64,
}

impl FileLog {
    /// Opens or creates the log file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or its directories cannot be created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            size,
        })
    }

    /// Returns the path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Makes a rename inside the log's directory durable.
    #[cfg(unix)]
    fn sync_directory(&self) -> StorageResult<()> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => File::open(parent)?.sync_all()?,
            _ => File::open(".")?.sync_all()?,
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StorageResult<()> {
        Ok(())
    }
}

impl LogBackend for FileLog {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        let mut buffer = Vec::with_capacity(self.size as usize);
        file.read_to_end(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let offset = self.size;
        if data.is_empty() {
            return Ok(offset);
        }
        let mut file = self.file.lock();
        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        self.size += data.len() as u64;
        Ok(offset)
    }

    fn sync(&mut self) -> StorageResult<()> {
        let mut file = self.file.lock();
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.size)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        if new_size > self.size {
            return Err(StorageError::TruncatePastEnd {
                requested: new_size,
                size: self.size,
            });
        }
        let file = self.file.lock();
        file.set_len(new_size)?;
        file.sync_all()?;
        drop(file);
        self.size = new_size;
        Ok(())
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        let temp = self.temp_path();
        {
            let mut out = File::create(&temp)?;
            out.write_all(data)?;
            out.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;
        self.sync_directory()?;

        let reopened = OpenOptions::new().read(true).write(true).open(&self.path)?;
        *self.file.lock() = reopened;
        self.size = data.len() as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn data_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("store.log");

        {
            let mut log = FileLog::open(&path).unwrap();
            log.append(b"persisted").unwrap();
            log.sync().unwrap();
        }

        let log = FileLog::open(&path).unwrap();
        assert_eq!(log.size().unwrap(), 9);
        assert_eq!(log.read_all().unwrap(), b"persisted");
    }

    #[test]
    fn truncate_shrinks_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.log");
        let mut log = FileLog::open(&path).unwrap();
        log.append(b"0123456789").unwrap();
        log.truncate(4).unwrap();
        assert_eq!(log.read_all().unwrap(), b"0123");
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4);
    }

    #[test]
    fn replace_swaps_contents_and_keeps_appending() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.log");
        let mut log = FileLog::open(&path).unwrap();
        log.append(b"a long history of writes").unwrap();

        log.replace(b"short").unwrap();
        assert_eq!(log.size().unwrap(), 5);
        assert_eq!(log.append(b"+more").unwrap(), 5);
        log.sync().unwrap();
        assert!(!dir.path().join("store.log.tmp").exists());

        let reopened = FileLog::open(&path).unwrap();
        assert_eq!(reopened.read_all().unwrap(), b"short+more");
    }
}
