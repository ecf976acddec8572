//! Read-through cache keyed by (path, version).
//!
//! For each path two sibling files live under the cache root: the blob
//! itself and `<path>.ver` holding the version as ASCII decimal. A blob
//! without a readable version file is stale by definition (a crash may have
//! landed between the two writes) and is discarded and re-fetched.

use bytes::Bytes;
use dft_core::{DriftError, Result};
use dft_raft::Node;
use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Suffix of the sibling file recording a blob's version.
pub const VERSION_SUFFIX: &str = ".ver";

#[derive(Clone)]
struct CacheEntry {
    data: Bytes,
    version: u64,
}

/// Per-node blob cache: in-memory entries validated against the replicated
/// metadata, backed by the on-disk layout above.
pub struct FileCache {
    node: Arc<Node>,
    cache_dir: PathBuf,
    mem: RwLock<HashMap<String, CacheEntry>>,
}

impl FileCache {
    pub fn new(node: Arc<Node>, cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir)?;
        Ok(Self {
            node,
            cache_dir,
            mem: RwLock::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns current data for `path`, consulting the in-memory cache, the
    /// disk cache, and finally the replicated store, in that order. Each
    /// layer is trusted only when its version matches the metadata.
    pub async fn ensure(&self, path: &str) -> Result<Bytes> {
        let blob = self.blob_path(path)?;
        let meta = match self.node.meta_get(path) {
            Ok(meta) => meta,
            Err(err) => {
                // Unknown or tombstoned: drop any local copies.
                self.forget(path, &blob);
                return Err(err);
            }
        };

        if let Some(entry) = self.mem_get(path) {
            if entry.version == meta.version {
                return Ok(entry.data);
            }
        }

        let ver = version_path(&blob);
        if let (Ok(data), Some(disk_version)) = (fs::read(&blob), read_version(&ver)) {
            if disk_version == meta.version {
                let data = Bytes::from(data);
                self.mem_put(path, data.clone(), disk_version);
                return Ok(data);
            }
            // Stale pair; remove so a crash mid-refresh cannot resurrect it.
            let _ = fs::remove_file(&blob);
            let _ = fs::remove_file(&ver);
        }

        debug!(target: "drift::cache", path, version = meta.version, "Fetching from the cluster");
        let data = self.node.get(path.as_bytes())?;
        self.mem_put(path, data.clone(), meta.version);

        // Write-back happens off the read path; the version file lands after
        // the blob so a torn pair reads as stale, never as wrong data.
        let write_data = data.clone();
        let version = meta.version;
        tokio::task::spawn_blocking(move || {
            if let Err(err) = write_pair(&blob, &write_data, version) {
                warn!(
                    target: "drift::cache",
                    blob = %blob.display(),
                    error = %err,
                    "Cache write-back failed"
                );
            }
        });

        Ok(data)
    }

    /// Drops every local copy of `path`.
    pub fn invalidate(&self, path: &str) {
        if let Ok(blob) = self.blob_path(path) {
            self.forget(path, &blob);
        }
    }

    fn forget(&self, path: &str, blob: &Path) {
        if let Ok(mut mem) = self.mem.write() {
            mem.remove(path);
        }
        let _ = fs::remove_file(blob);
        let _ = fs::remove_file(version_path(blob));
    }

    fn mem_get(&self, path: &str) -> Option<CacheEntry> {
        match self.mem.read() {
            Ok(mem) => mem.get(path).cloned(),
            Err(poisoned) => poisoned.into_inner().get(path).cloned(),
        }
    }

    fn mem_put(&self, path: &str, data: Bytes, version: u64) {
        let entry = CacheEntry { data, version };
        match self.mem.write() {
            Ok(mut mem) => {
                mem.insert(path.to_string(), entry);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(path.to_string(), entry);
            }
        }
    }

    fn blob_path(&self, path: &str) -> Result<PathBuf> {
        safe_join(&self.cache_dir, path)
    }
}

/// Joins `path` under `root`, rejecting anything that could escape it.
pub(crate) fn safe_join(root: &Path, path: &str) -> Result<PathBuf> {
    if path.is_empty() {
        return Err(DriftError::InvalidArgument("empty path".into()));
    }
    let relative = Path::new(path);
    for component in relative.components() {
        match component {
            Component::Normal(_) => {}
            _ => {
                return Err(DriftError::InvalidArgument(format!(
                    "unsafe cache path {path:?}"
                )));
            }
        }
    }
    Ok(root.join(relative))
}

pub(crate) fn version_path(blob: &Path) -> PathBuf {
    let mut os = blob.as_os_str().to_os_string();
    os.push(VERSION_SUFFIX);
    PathBuf::from(os)
}

pub(crate) fn read_version(path: &Path) -> Option<u64> {
    let raw = fs::read_to_string(path).ok()?;
    raw.trim().parse().ok()
}

pub(crate) fn write_pair(blob: &Path, data: &[u8], version: u64) -> Result<()> {
    if let Some(parent) = blob.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(blob, data)?;
    fs::write(version_path(blob), version.to_string())?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_join_rejects_escapes() {
        let root = Path::new("/cache");
        assert!(safe_join(root, "a/b.txt").is_ok());
        assert!(safe_join(root, "").is_err());
        assert!(safe_join(root, "../etc/passwd").is_err());
        assert!(safe_join(root, "/abs").is_err());
        assert!(safe_join(root, "a/../../b").is_err());
    }

    #[test]
    fn test_version_pair_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let blob = dir.path().join("sub/f.txt");
        write_pair(&blob, b"data", 7).unwrap();

        assert_eq!(fs::read(&blob).unwrap(), b"data");
        assert_eq!(read_version(&version_path(&blob)), Some(7));
    }

    #[test]
    fn test_missing_version_file_reads_as_stale() {
        let dir = tempfile::tempdir().unwrap();
        let blob = dir.path().join("f");
        fs::write(&blob, b"data").unwrap();
        assert_eq!(read_version(&version_path(&blob)), None);
    }
}
