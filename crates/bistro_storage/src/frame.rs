//! Checksummed frames over a [`LogBackend`].
//!
//! Frame layout (little endian):
//!
//! ```text
//! | magic (4) | payload len (4) | crc32 of payload (4) | payload ... |
//! ```
//!
//! A frame whose header or payload is cut short is a torn write from a crash
//! and marks the end of the log. A complete frame with a bad checksum or bad
//! magic is corruption and is reported.

use crate::backend::LogBackend;
use crate::error::{StorageError, StorageResult};
use tracing::warn;

/// Magic bytes opening every frame.
pub const FRAME_MAGIC: [u8; 4] = *b"BSTF";

/// Size of a frame header in bytes.
pub const FRAME_HEADER_SIZE: usize = 12;

/// A log of checksummed frames.
#[derive(Debug)]
pub struct FrameLog<B: LogBackend> {
    backend: B,
    sync_on_append: bool,
}

impl<B: LogBackend> FrameLog<B> {
    /// Opens a frame log, cutting off any torn tail left by a crash.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or a complete frame is
    /// corrupted.
    pub fn open(mut backend: B) -> StorageResult<Self> {
        let bytes = backend.read_all()?;
        let (_, valid_len) = parse_frames(&bytes)?;
        if (valid_len as usize) < bytes.len() {
            warn!(
                valid_len,
                total = bytes.len(),
                "discarding torn tail of frame log"
            );
            backend.truncate(valid_len)?;
        }
        Ok(Self {
            backend,
            sync_on_append: true,
        })
    }

    /// Sets whether every append is followed by a sync.
    #[must_use]
    pub fn sync_on_append(mut self, value: bool) -> Self {
        self.sync_on_append = value;
        self
    }

    /// Appends one frame and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is too large or the write fails.
    pub fn append(&mut self, payload: &[u8]) -> StorageResult<u64> {
        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        encode_frame(payload, &mut frame)?;

        let offset = self.backend.append(&frame)?;
        if self.sync_on_append {
            self.backend.sync()?;
        }
        Ok(offset)
    }

    /// Returns the payload of every complete frame, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or a frame is corrupted.
    pub fn frames(&self) -> StorageResult<Vec<Vec<u8>>> {
        let bytes = self.backend.read_all()?;
        let (frames, _) = parse_frames(&bytes)?;
        Ok(frames)
    }

    /// Replaces the whole log with `payloads`, one frame each.
    ///
    /// The backend swaps contents in one step, so a crash leaves either the
    /// old frames or the new ones.
    ///
    /// # Errors
    ///
    /// Returns an error if a payload is too large or the write fails.
    pub fn rewrite(&mut self, payloads: &[Vec<u8>]) -> StorageResult<()> {
        let mut bytes = Vec::new();
        for payload in payloads {
            encode_frame(payload, &mut bytes)?;
        }
        self.backend.replace(&bytes)
    }

    /// Drops every frame.
    ///
    /// # Errors
    ///
    /// Returns an error if truncation fails.
    pub fn clear(&mut self) -> StorageResult<()> {
        self.backend.truncate(0)
    }

    /// Forces appended frames to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync(&mut self) -> StorageResult<()> {
        self.backend.sync()
    }

    /// Returns the size of the log in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    pub fn size(&self) -> StorageResult<u64> {
        self.backend.size()
    }
}

fn encode_frame(payload: &[u8], out: &mut Vec<u8>) -> StorageResult<()> {
    let len =
        u32::try_from(payload.len()).map_err(|_| StorageError::FrameTooLarge(payload.len()))?;
    out.extend_from_slice(&FRAME_MAGIC);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    out.extend_from_slice(payload);
    Ok(())
}

/// Parses frames, returning the payloads and the length of the valid prefix.
fn parse_frames(bytes: &[u8]) -> StorageResult<(Vec<Vec<u8>>, u64)> {
    let mut frames = Vec::new();
    let mut pos = 0usize;

    while pos < bytes.len() {
        let rest = &bytes[pos..];
        if rest.len() < FRAME_HEADER_SIZE {
            break;
        }
        if rest[0..4] != FRAME_MAGIC {
            return Err(StorageError::corrupt_frame(pos as u64, "bad magic"));
        }
        let len = u32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let crc = u32::from_le_bytes([rest[8], rest[9], rest[10], rest[11]]);
        if rest.len() < FRAME_HEADER_SIZE + len {
            break;
        }
        let payload = &rest[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + len];
        let actual = crc32fast::hash(payload);
        if actual != crc {
            return Err(StorageError::corrupt_frame(
                pos as u64,
                format!("checksum mismatch: expected {crc:08x}, got {actual:08x}"),
            ));
        }
        frames.push(payload.to_vec());
        pos += FRAME_HEADER_SIZE + len;
    }

    Ok((frames, pos as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryLog;
    use proptest::prelude::*;

    #[test]
    fn frames_come_back_in_order() {
        let mut log = FrameLog::open(InMemoryLog::new()).unwrap();
        log.append(b"a").unwrap();
        log.append(b"").unwrap();
        log.append(b"ccc").unwrap();
        assert_eq!(
            log.frames().unwrap(),
            vec![b"a".to_vec(), Vec::new(), b"ccc".to_vec()]
        );
    }

    #[test]
    fn torn_tail_is_cut_on_open() {
        let shared = InMemoryLog::new();
        {
            let mut log = FrameLog::open(shared.clone()).unwrap();
            log.append(b"complete").unwrap();
            log.append(b"partial").unwrap();
        }
        let mut bytes = shared.snapshot();
        bytes.truncate(bytes.len() - 3);
        let torn = InMemoryLog::with_data(bytes);

        let log = FrameLog::open(torn.clone()).unwrap();
        assert_eq!(log.frames().unwrap(), vec![b"complete".to_vec()]);
        assert_eq!(
            torn.snapshot().len(),
            FRAME_HEADER_SIZE + b"complete".len()
        );
    }

    #[test]
    fn flipped_payload_bit_is_corruption() {
        let shared = InMemoryLog::new();
        FrameLog::open(shared.clone())
            .unwrap()
            .append(b"payload")
            .unwrap();
        let mut bytes = shared.snapshot();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;

        let result = FrameLog::open(InMemoryLog::with_data(bytes));
        assert!(matches!(result, Err(StorageError::CorruptFrame { offset: 0, .. })));
    }

    #[test]
    fn rewrite_replaces_every_frame() {
        let shared = InMemoryLog::new();
        let mut log = FrameLog::open(shared.clone()).unwrap();
        for payload in [b"one", b"two", b"six"] {
            log.append(payload).unwrap();
        }
        log.rewrite(&[b"merged".to_vec()]).unwrap();
        log.append(b"tail").unwrap();

        let reopened = FrameLog::open(shared).unwrap();
        assert_eq!(
            reopened.frames().unwrap(),
            vec![b"merged".to_vec(), b"tail".to_vec()]
        );
    }

    #[test]
    fn clear_empties_log() {
        let mut log = FrameLog::open(InMemoryLog::new()).unwrap();
        log.append(b"x").unwrap();
        log.clear().unwrap();
        assert!(log.frames().unwrap().is_empty());
        assert_eq!(log.size().unwrap(), 0);
    }

    proptest! {
        #[test]
        fn any_payloads_survive(payloads in proptest::collection::vec(
            proptest::collection::vec(any::<u8>(), 0..64), 0..16)) {
            let mut log = FrameLog::open(InMemoryLog::new()).unwrap();
            for p in &payloads {
                log.append(p).unwrap();
            }
            prop_assert_eq!(log.frames().unwrap(), payloads);
        }
    }
}
