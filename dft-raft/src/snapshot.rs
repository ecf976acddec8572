//! Snapshot storage.
//!
//! A snapshot is written through a [`SnapshotSink`]: the image streams into a
//! temp file, and `close` makes it the latest snapshot atomically (rename +
//! descriptor rewrite + directory sync). A cancelled or abandoned sink leaves
//! the store unchanged. The newest completed snapshot is always retained;
//! older images are pruned on close.

use crate::codec::ClusterConfig;
use crc32fast::Hasher;
use dft_core::{DriftError, Result, WireReader, WireWriter};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const SNAPSHOT_EXT: &str = "snap";
const DESCRIPTOR_FILE: &str = "LATEST";

/// Descriptor for a completed snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotMeta {
    /// Last log index covered by the image.
    pub index: u64,
    /// Term of that index.
    pub term: u64,
    /// Image size in bytes.
    pub size: u64,
    /// Configuration in force at `index`.
    pub config: ClusterConfig,
}

impl SnapshotMeta {
    fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::raw();
        w.u64(self.index);
        w.u64(self.term);
        w.u64(self.size);
        self.config.encode_into(&mut w);
        let mut buf = w.finish().to_vec();
        let mut hasher = Hasher::new();
        hasher.update(&buf);
        buf.extend_from_slice(&hasher.finalize().to_le_bytes());
        buf
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 4 {
            return Err(DriftError::Protocol("descriptor too short".into()));
        }
        let (body, crc_raw) = buf.split_at(buf.len() - 4);
        let stored = u32::from_le_bytes(
            crc_raw
                .try_into()
                .map_err(|_| DriftError::Protocol("bad descriptor crc".into()))?,
        );
        let mut hasher = Hasher::new();
        hasher.update(body);
        if hasher.finalize() != stored {
            return Err(DriftError::Protocol("descriptor checksum mismatch".into()));
        }
        let mut r = WireReader::new(body);
        let index = r.u64()?;
        let term = r.u64()?;
        let size = r.u64()?;
        let config = ClusterConfig::decode_from(&mut r)?;
        Ok(Self {
            index,
            term,
            size,
            config,
        })
    }
}

pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Begins a new snapshot at (`index`, `term`).
    pub fn create(&self, index: u64, term: u64, config: ClusterConfig) -> Result<SnapshotSink> {
        let name = format!("{term:020}-{index:020}");
        let tmp = self.dir.join(format!("{name}.tmp"));
        let file = File::create(&tmp)?;
        Ok(SnapshotSink {
            dir: self.dir.clone(),
            tmp,
            dest: self.dir.join(format!("{name}.{SNAPSHOT_EXT}")),
            file: Some(file),
            index,
            term,
            config,
            written: 0,
        })
    }

    /// Opens the most recent completed snapshot, if any.
    pub fn open_latest(&self) -> Result<Option<(SnapshotMeta, File)>> {
        let descriptor = self.dir.join(DESCRIPTOR_FILE);
        let raw = match fs::read(&descriptor) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let meta = SnapshotMeta::decode(&raw)?;
        let path = self.image_path(&meta);
        match File::open(&path) {
            Ok(file) => Ok(Some((meta, file))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    target: "drift::snapshot",
                    image = %path.display(),
                    "Descriptor points at a missing image"
                );
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Reads the latest snapshot image fully into memory.
    pub fn load_latest(&self) -> Result<Option<(SnapshotMeta, Vec<u8>)>> {
        match self.open_latest()? {
            None => Ok(None),
            Some((meta, mut file)) => {
                let mut image = Vec::with_capacity(meta.size as usize);
                file.read_to_end(&mut image)?;
                if image.len() as u64 != meta.size {
                    return Err(DriftError::StorageFatal(format!(
                        "snapshot image size {} does not match descriptor {}",
                        image.len(),
                        meta.size
                    )));
                }
                Ok(Some((meta, image)))
            }
        }
    }

    fn image_path(&self, meta: &SnapshotMeta) -> PathBuf {
        self.dir
            .join(format!("{:020}-{:020}.{SNAPSHOT_EXT}", meta.term, meta.index))
    }
}

/// Streaming writer for one snapshot image.
pub struct SnapshotSink {
    dir: PathBuf,
    tmp: PathBuf,
    dest: PathBuf,
    file: Option<File>,
    index: u64,
    term: u64,
    config: ClusterConfig,
    written: u64,
}

impl SnapshotSink {
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| DriftError::Internal("write on finished snapshot sink".into()))?;
        file.write_all(data)?;
        self.written += data.len() as u64;
        Ok(())
    }

    #[must_use]
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Discards the partial image.
    pub fn cancel(mut self) -> Result<()> {
        self.file = None;
        fs::remove_file(&self.tmp)?;
        Ok(())
    }

    /// Makes the image durable and visible as the latest snapshot.
    pub fn close(mut self) -> Result<SnapshotMeta> {
        let file = self
            .file
            .take()
            .ok_or_else(|| DriftError::Internal("close on finished snapshot sink".into()))?;
        file.sync_all()?;
        drop(file);
        fs::rename(&self.tmp, &self.dest)?;

        let meta = SnapshotMeta {
            index: self.index,
            term: self.term,
            size: self.written,
            config: self.config.clone(),
        };

        let descriptor = self.dir.join(DESCRIPTOR_FILE);
        let descriptor_tmp = self.dir.join(format!("{DESCRIPTOR_FILE}.tmp"));
        {
            let mut f = File::create(&descriptor_tmp)?;
            f.write_all(&meta.encode())?;
            f.sync_all()?;
        }
        fs::rename(&descriptor_tmp, &descriptor)?;
        File::open(&self.dir)?.sync_all()?;

        self.prune_older()?;

        info!(
            target: "drift::snapshot",
            index = meta.index,
            term = meta.term,
            size = meta.size,
            "Snapshot completed"
        );
        Ok(meta)
    }

    fn prune_older(&self) -> Result<()> {
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path == self.dest {
                continue;
            }
            let is_image = path.extension().and_then(|e| e.to_str()) == Some(SNAPSHOT_EXT);
            let is_stale_tmp = path.extension().and_then(|e| e.to_str()) == Some("tmp");
            if is_image || is_stale_tmp {
                if let Err(err) = fs::remove_file(&path) {
                    warn!(
                        target: "drift::snapshot",
                        file = %path.display(),
                        error = %err,
                        "Failed to prune old snapshot"
                    );
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::codec::{Role, Server};
    use tempfile::tempdir;

    fn config() -> ClusterConfig {
        ClusterConfig::new(vec![Server {
            id: "n1".into(),
            address: "127.0.0.1:7001".into(),
            role: Role::Voter,
        }])
    }

    #[test]
    fn test_empty_store() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        assert!(store.open_latest().unwrap().is_none());
    }

    #[test]
    fn test_write_close_load() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();

        let mut sink = store.create(10, 2, config()).unwrap();
        sink.write(b"image ").unwrap();
        sink.write(b"bytes").unwrap();
        let meta = sink.close().unwrap();
        assert_eq!(meta.index, 10);
        assert_eq!(meta.size, 11);

        let (loaded, image) = store.load_latest().unwrap().unwrap();
        assert_eq!(loaded, meta);
        assert_eq!(image, b"image bytes");
    }

    #[test]
    fn test_cancel_leaves_store_unchanged() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();

        let mut sink = store.create(5, 1, config()).unwrap();
        sink.write(b"partial").unwrap();
        sink.cancel().unwrap();

        assert!(store.open_latest().unwrap().is_none());
    }

    #[test]
    fn test_newer_snapshot_replaces_and_prunes() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();

        let mut first = store.create(10, 2, config()).unwrap();
        first.write(b"one").unwrap();
        first.close().unwrap();

        let mut second = store.create(20, 3, config()).unwrap();
        second.write(b"two").unwrap();
        second.close().unwrap();

        let (meta, image) = store.load_latest().unwrap().unwrap();
        assert_eq!(meta.index, 20);
        assert_eq!(image, b"two");

        let images: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("snap"))
            .collect();
        assert_eq!(images.len(), 1);
    }

    #[test]
    fn test_corrupt_descriptor_rejected() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        let mut sink = store.create(1, 1, config()).unwrap();
        sink.write(b"x").unwrap();
        sink.close().unwrap();

        let descriptor = dir.path().join("LATEST");
        let mut raw = fs::read(&descriptor).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        fs::write(&descriptor, &raw).unwrap();

        assert!(store.open_latest().is_err());
    }
}
