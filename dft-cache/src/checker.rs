//! Background consistency checker.
//!
//! Walks the cache directory on an interval: blobs whose path is unknown or
//! tombstoned are removed; blobs whose (version, hash) disagree with the
//! replicated metadata are refreshed in place.

use crate::cache::{read_version, version_path, write_pair, VERSION_SUFFIX};
use dft_core::sha256;
use dft_raft::Node;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

pub struct Checker {
    node: Arc<Node>,
    cache_dir: PathBuf,
}

impl Checker {
    #[must_use]
    pub fn new(node: Arc<Node>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            node,
            cache_dir: cache_dir.into(),
        }
    }

    /// Runs the scan loop until shutdown.
    pub async fn run(self, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        // The first tick of a tokio interval fires immediately; the checker
        // waits one full interval before its first scan.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => self.scan(),
            }
        }
        trace!(target: "drift::checker", "Checker stopped");
    }

    /// One full pass over the cache directory.
    pub fn scan(&self) {
        let mut stack = vec![self.cache_dir.clone()];
        while let Some(dir) = stack.pop() {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(
                        target: "drift::checker",
                        dir = %dir.display(),
                        error = %err,
                        "Cache scan failed to read directory"
                    );
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                if path
                    .to_str()
                    .map(|p| p.ends_with(VERSION_SUFFIX))
                    .unwrap_or(true)
                {
                    continue;
                }
                self.check_blob(&path);
            }
        }
    }

    fn check_blob(&self, blob: &Path) {
        let Ok(rel) = blob.strip_prefix(&self.cache_dir) else {
            return;
        };
        let Some(rel) = rel.to_str() else {
            return;
        };

        let meta = match self.node.meta_get(rel) {
            Ok(meta) => meta,
            Err(_) => {
                // Unknown or tombstoned: the cached pair goes away.
                debug!(target: "drift::checker", path = rel, "Removing orphaned cache entry");
                let _ = fs::remove_file(blob);
                let _ = fs::remove_file(version_path(blob));
                return;
            }
        };

        let Ok(data) = fs::read(blob) else {
            return;
        };
        // A missing version file counts as version 0, which never matches a
        // live entry, so the pair refreshes.
        let disk_version = read_version(&version_path(blob)).unwrap_or(0);

        if disk_version == meta.version && sha256(&data) == meta.hash {
            return;
        }

        match self.node.get(rel.as_bytes()) {
            Ok(fresh) => {
                debug!(
                    target: "drift::checker",
                    path = rel,
                    from_version = disk_version,
                    to_version = meta.version,
                    "Refreshing stale cache entry"
                );
                if let Err(err) = write_pair(blob, &fresh, meta.version) {
                    warn!(
                        target: "drift::checker",
                        path = rel,
                        error = %err,
                        "Cache refresh failed"
                    );
                }
            }
            Err(_) => {
                // Metadata is ahead of the local replica; a later pass
                // catches up once the KV entry arrives.
            }
        }
    }
}
