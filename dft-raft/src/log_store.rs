//! Durable replicated log storage.
//!
//! Each entry lives in its own record file, `log/<index>.ent`, framed with
//! dual CRC32 checksums:
//!
//! ```text
//! [index: u64][term: u64][kind: u8][payload_len: u32][header_crc: u32][payload][payload_crc: u32]
//! ```
//!
//! The header checksum is validated before `payload_len` is trusted, so a
//! corrupted length field cannot drive an oversized allocation. Appends sync
//! file data and the directory before returning; an entry is never visible
//! through `last_index` unless it is durable. A torn tail record left by a
//! crash is detected and truncated on open.

use crate::codec::{EntryKind, LogEntry};
use bytes::Bytes;
use crc32fast::Hasher;
use dft_core::{DriftError, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const ENTRY_HEADER_SIZE: usize = 8 + 8 + 1 + 4;
const CRC_SIZE: usize = 4;
const ENTRY_EXT: &str = "ent";

fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

pub struct LogStore {
    dir: PathBuf,
    first: u64,
    last: u64,
}

impl LogStore {
    /// Opens or creates a log store at `dir`, scanning existing record files
    /// and truncating a torn tail if the process died mid-append.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let mut indexes: Vec<u64> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXT) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match stem.parse::<u64>() {
                Ok(index) => indexes.push(index),
                Err(_) => {
                    warn!(
                        target: "drift::log",
                        file = %path.display(),
                        "Ignoring unparseable record file"
                    );
                }
            }
        }
        indexes.sort_unstable();

        for pair in indexes.windows(2) {
            if pair[1] != pair[0] + 1 {
                return Err(DriftError::StorageFatal(format!(
                    "log has a gap between index {} and {}",
                    pair[0], pair[1]
                )));
            }
        }

        let mut store = Self {
            dir: dir.to_path_buf(),
            first: indexes.first().copied().unwrap_or(0),
            last: indexes.last().copied().unwrap_or(0),
        };

        // Only the highest record can be torn; earlier appends were synced
        // before later ones started.
        if store.last != 0 && store.read_entry(store.last).is_err() {
            let path = store.entry_path(store.last);
            warn!(
                target: "drift::log",
                index = store.last,
                file = %path.display(),
                "Truncating torn tail record"
            );
            fs::remove_file(&path)?;
            store.sync_dir()?;
            store.last -= 1;
            if store.last < store.first {
                store.first = 0;
                store.last = 0;
            }
        }

        info!(
            target: "drift::log",
            dir = %dir.display(),
            first_index = store.first,
            last_index = store.last,
            "Log store opened"
        );
        Ok(store)
    }

    /// First stored index, 0 when empty.
    #[must_use]
    pub fn first_index(&self) -> u64 {
        self.first
    }

    /// Last stored index, 0 when empty.
    #[must_use]
    pub fn last_index(&self) -> u64 {
        self.last
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.first == 0
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        if self.first == 0 {
            0
        } else {
            self.last - self.first + 1
        }
    }

    /// Returns the entry at `index`, or `None` when outside the stored range.
    pub fn entry(&self, index: u64) -> Result<Option<LogEntry>> {
        if self.first == 0 || index < self.first || index > self.last {
            return Ok(None);
        }
        self.read_entry(index).map(Some)
    }

    /// Term of the entry at `index`, or `None` when absent.
    pub fn term(&self, index: u64) -> Result<Option<u64>> {
        Ok(self.entry(index)?.map(|e| e.term))
    }

    /// Entries in `[from, to]`, clamped to the stored range.
    pub fn entries(&self, from: u64, to: u64) -> Result<Vec<LogEntry>> {
        if self.first == 0 {
            return Ok(Vec::new());
        }
        let from = from.max(self.first);
        let to = to.min(self.last);
        let mut out = Vec::new();
        for index in from..=to {
            out.push(self.read_entry(index)?);
        }
        Ok(out)
    }

    /// Appends a contiguous slice of entries.
    ///
    /// The slice must continue directly after `last_index()`; an empty store
    /// accepts any starting index (the log resumes after a snapshot install
    /// drained it). Entries are durable when this returns.
    pub fn append(&mut self, entries: &[LogEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        for pair in entries.windows(2) {
            if pair[1].index != pair[0].index + 1 {
                return Err(DriftError::StorageFatal(format!(
                    "non-contiguous append: {} then {}",
                    pair[0].index, pair[1].index
                )));
            }
        }
        if self.last != 0 && entries[0].index != self.last + 1 {
            return Err(DriftError::StorageFatal(format!(
                "append at index {} does not follow last index {}",
                entries[0].index, self.last
            )));
        }

        for entry in entries {
            let record = encode_record(entry);
            let path = self.entry_path(entry.index);
            let mut file = OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&path)?;
            file.write_all(&record)?;
            file.sync_all()?;
        }
        self.sync_dir()?;

        if self.first == 0 {
            self.first = entries[0].index;
        }
        self.last = entries[entries.len() - 1].index;

        debug!(
            target: "drift::log",
            count = entries.len(),
            last_index = self.last,
            "Appended entries"
        );
        Ok(())
    }

    /// Deletes all entries with `index >= from`. Used when a follower
    /// discovers a conflict with the leader's log.
    pub fn truncate_suffix(&mut self, from: u64) -> Result<()> {
        if self.first == 0 || from > self.last {
            return Ok(());
        }
        let start = from.max(self.first);
        for index in start..=self.last {
            fs::remove_file(self.entry_path(index))?;
        }
        self.sync_dir()?;
        warn!(
            target: "drift::log",
            from,
            previous_last = self.last,
            "Truncated log suffix"
        );
        if start <= self.first {
            self.first = 0;
            self.last = 0;
        } else {
            self.last = start - 1;
        }
        Ok(())
    }

    /// Deletes all entries with `index <= to`, after a snapshot covers them.
    pub fn truncate_prefix(&mut self, to: u64) -> Result<()> {
        if self.first == 0 || to < self.first {
            return Ok(());
        }
        let end = to.min(self.last);
        for index in self.first..=end {
            fs::remove_file(self.entry_path(index))?;
        }
        self.sync_dir()?;
        info!(
            target: "drift::log",
            to,
            "Compacted log prefix"
        );
        if end >= self.last {
            self.first = 0;
            self.last = 0;
        } else {
            self.first = end + 1;
        }
        Ok(())
    }

    fn entry_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("{index:020}.{ENTRY_EXT}"))
    }

    fn sync_dir(&self) -> Result<()> {
        File::open(&self.dir)?.sync_all()?;
        Ok(())
    }

    fn read_entry(&self, index: u64) -> Result<LogEntry> {
        let mut buf = Vec::new();
        File::open(self.entry_path(index))?.read_to_end(&mut buf)?;
        let entry = decode_record(&buf)?;
        if entry.index != index {
            return Err(DriftError::StorageFatal(format!(
                "record file for index {index} holds entry {}",
                entry.index
            )));
        }
        Ok(entry)
    }
}

fn encode_record(entry: &LogEntry) -> Vec<u8> {
    let mut buf =
        Vec::with_capacity(ENTRY_HEADER_SIZE + CRC_SIZE + entry.payload.len() + CRC_SIZE);
    buf.extend_from_slice(&entry.index.to_le_bytes());
    buf.extend_from_slice(&entry.term.to_le_bytes());
    buf.push(entry.kind as u8);
    buf.extend_from_slice(&(entry.payload.len() as u32).to_le_bytes());
    let header_crc = crc32(&buf);
    buf.extend_from_slice(&header_crc.to_le_bytes());
    buf.extend_from_slice(&entry.payload);
    buf.extend_from_slice(&crc32(&entry.payload).to_le_bytes());
    buf
}

fn decode_record(buf: &[u8]) -> Result<LogEntry> {
    if buf.len() < ENTRY_HEADER_SIZE + CRC_SIZE {
        return Err(DriftError::Protocol("record shorter than header".into()));
    }
    let header = &buf[..ENTRY_HEADER_SIZE];
    let stored_header_crc = u32::from_le_bytes(
        buf[ENTRY_HEADER_SIZE..ENTRY_HEADER_SIZE + CRC_SIZE]
            .try_into()
            .map_err(|_| DriftError::Protocol("bad header crc slice".into()))?,
    );
    if crc32(header) != stored_header_crc {
        return Err(DriftError::Protocol("record header checksum mismatch".into()));
    }

    let index = u64::from_le_bytes(
        header[0..8]
            .try_into()
            .map_err(|_| DriftError::Protocol("bad index slice".into()))?,
    );
    let term = u64::from_le_bytes(
        header[8..16]
            .try_into()
            .map_err(|_| DriftError::Protocol("bad term slice".into()))?,
    );
    let kind = EntryKind::from_u8(header[16])
        .ok_or_else(|| DriftError::Protocol("unknown entry kind in record".into()))?;
    let payload_len = u32::from_le_bytes(
        header[17..21]
            .try_into()
            .map_err(|_| DriftError::Protocol("bad payload_len slice".into()))?,
    ) as usize;

    let expected = ENTRY_HEADER_SIZE + CRC_SIZE + payload_len + CRC_SIZE;
    if buf.len() != expected {
        return Err(DriftError::Protocol(format!(
            "record size mismatch: expected {expected}, got {}",
            buf.len()
        )));
    }

    let payload_start = ENTRY_HEADER_SIZE + CRC_SIZE;
    let payload = &buf[payload_start..payload_start + payload_len];
    let stored_payload_crc = u32::from_le_bytes(
        buf[payload_start + payload_len..]
            .try_into()
            .map_err(|_| DriftError::Protocol("bad payload crc slice".into()))?,
    );
    if crc32(payload) != stored_payload_crc {
        return Err(DriftError::Protocol("record payload checksum mismatch".into()));
    }

    Ok(LogEntry {
        index,
        term,
        kind,
        payload: Bytes::copy_from_slice(payload),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(index: u64, term: u64, payload: &[u8]) -> LogEntry {
        LogEntry {
            index,
            term,
            kind: EntryKind::Normal,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    #[test]
    fn test_open_empty() {
        let dir = tempdir().unwrap();
        let store = LogStore::open(dir.path()).unwrap();
        assert_eq!(store.first_index(), 0);
        assert_eq!(store.last_index(), 0);
        assert!(store.entry(1).unwrap().is_none());
    }

    #[test]
    fn test_append_and_read() {
        let dir = tempdir().unwrap();
        let mut store = LogStore::open(dir.path()).unwrap();
        store
            .append(&[entry(1, 1, b"a"), entry(2, 1, b"b"), entry(3, 2, b"c")])
            .unwrap();

        assert_eq!(store.first_index(), 1);
        assert_eq!(store.last_index(), 3);
        assert_eq!(store.entry(2).unwrap().unwrap().payload.as_ref(), b"b");
        assert_eq!(store.term(3).unwrap(), Some(2));
        assert!(store.entry(4).unwrap().is_none());

        let range = store.entries(2, 9).unwrap();
        assert_eq!(range.len(), 2);
        assert_eq!(range[0].index, 2);
    }

    #[test]
    fn test_reopen_preserves_entries() {
        let dir = tempdir().unwrap();
        {
            let mut store = LogStore::open(dir.path()).unwrap();
            store.append(&[entry(1, 1, b"x"), entry(2, 1, b"y")]).unwrap();
        }
        let store = LogStore::open(dir.path()).unwrap();
        assert_eq!(store.last_index(), 2);
        assert_eq!(store.entry(1).unwrap().unwrap().payload.as_ref(), b"x");
    }

    #[test]
    fn test_rejects_noncontiguous_append() {
        let dir = tempdir().unwrap();
        let mut store = LogStore::open(dir.path()).unwrap();
        store.append(&[entry(1, 1, b"a")]).unwrap();
        assert!(store.append(&[entry(3, 1, b"c")]).is_err());
        assert!(store.append(&[entry(2, 1, b"b"), entry(4, 1, b"d")]).is_err());
    }

    #[test]
    fn test_truncate_suffix() {
        let dir = tempdir().unwrap();
        let mut store = LogStore::open(dir.path()).unwrap();
        store
            .append(&[entry(1, 1, b"a"), entry(2, 1, b"b"), entry(3, 1, b"c")])
            .unwrap();
        store.truncate_suffix(2).unwrap();
        assert_eq!(store.last_index(), 1);
        assert!(store.entry(2).unwrap().is_none());

        // Appending over the truncated range works.
        store.append(&[entry(2, 2, b"b2")]).unwrap();
        assert_eq!(store.entry(2).unwrap().unwrap().term, 2);
    }

    #[test]
    fn test_truncate_prefix() {
        let dir = tempdir().unwrap();
        let mut store = LogStore::open(dir.path()).unwrap();
        store
            .append(&[entry(1, 1, b"a"), entry(2, 1, b"b"), entry(3, 1, b"c")])
            .unwrap();
        store.truncate_prefix(2).unwrap();
        assert_eq!(store.first_index(), 3);
        assert!(store.entry(1).unwrap().is_none());
        assert_eq!(store.entry(3).unwrap().unwrap().payload.as_ref(), b"c");

        // Draining the rest empties the store; a resumed append is accepted.
        store.truncate_prefix(3).unwrap();
        assert!(store.is_empty());
        store.append(&[entry(4, 3, b"d")]).unwrap();
        assert_eq!(store.first_index(), 4);
        assert_eq!(store.last_index(), 4);
    }

    #[test]
    fn test_torn_tail_truncated_on_open() {
        let dir = tempdir().unwrap();
        {
            let mut store = LogStore::open(dir.path()).unwrap();
            store.append(&[entry(1, 1, b"a"), entry(2, 1, b"bb")]).unwrap();
        }
        // Chop bytes off the newest record to simulate a torn write.
        let torn = dir.path().join(format!("{:020}.ent", 2u64));
        let full = fs::read(&torn).unwrap();
        fs::write(&torn, &full[..full.len() - 3]).unwrap();

        let store = LogStore::open(dir.path()).unwrap();
        assert_eq!(store.last_index(), 1);
        assert!(store.entry(2).unwrap().is_none());
    }

    #[test]
    fn test_gap_is_fatal() {
        let dir = tempdir().unwrap();
        {
            let mut store = LogStore::open(dir.path()).unwrap();
            store
                .append(&[entry(1, 1, b"a"), entry(2, 1, b"b"), entry(3, 1, b"c")])
                .unwrap();
        }
        fs::remove_file(dir.path().join(format!("{:020}.ent", 2u64))).unwrap();
        assert!(LogStore::open(dir.path()).is_err());
    }
}
