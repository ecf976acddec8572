//! Path metadata store with merge-by-version semantics.

use dft_core::MetaEntry;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Maps path → [`MetaEntry`]. Merges keep the highest version; tombstones at
/// a version hide the path from reads and can only be displaced by a higher
/// version. Versions never go backwards.
#[derive(Debug, Default)]
pub struct MetaStore {
    entries: RwLock<HashMap<String, MetaEntry>>,
}

impl MetaStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, MetaEntry>> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, MetaEntry>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Merges `entry` in. Entries with an empty path or a version not above
    /// the stored one are dropped.
    pub fn sync(&self, entry: &MetaEntry) {
        if entry.path.is_empty() {
            return;
        }
        let mut guard = self.write();
        match guard.get(&entry.path) {
            Some(current) if current.version >= entry.version => {}
            _ => {
                guard.insert(entry.path.clone(), entry.clone());
            }
        }
    }

    /// Returns metadata for `path`, hiding tombstones.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<MetaEntry> {
        if path.is_empty() {
            return None;
        }
        let guard = self.read();
        guard
            .get(path)
            .filter(|entry| !entry.deleted)
            .cloned()
    }

    /// Current version for `path`, tombstones included. 0 when absent.
    #[must_use]
    pub fn version(&self, path: &str) -> u64 {
        self.read().get(path).map_or(0, |e| e.version)
    }

    /// Live (non-deleted) entries.
    #[must_use]
    pub fn list(&self) -> Vec<MetaEntry> {
        self.read()
            .values()
            .filter(|entry| !entry.deleted)
            .cloned()
            .collect()
    }

    /// Every entry, tombstones included. Snapshots must carry tombstones so a
    /// restored replica keeps hiding deleted paths.
    #[must_use]
    pub fn dump(&self) -> Vec<MetaEntry> {
        self.read().values().cloned().collect()
    }

    /// Replaces the whole map (snapshot restore).
    pub fn replace(&self, entries: Vec<MetaEntry>) {
        let mut guard = self.write();
        guard.clear();
        for entry in entries {
            guard.insert(entry.path.clone(), entry);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use dft_core::HASH_LEN;

    fn entry(path: &str, version: u64) -> MetaEntry {
        MetaEntry::live(path, version, [version as u8; HASH_LEN])
    }

    #[test]
    fn test_sync_keeps_highest_version() {
        let store = MetaStore::new();
        store.sync(&entry("f", 2));
        store.sync(&entry("f", 1));
        assert_eq!(store.get("f").unwrap().version, 2);

        store.sync(&entry("f", 5));
        assert_eq!(store.get("f").unwrap().version, 5);
    }

    #[test]
    fn test_equal_version_does_not_overwrite() {
        let store = MetaStore::new();
        let mut first = entry("f", 3);
        first.replicas = vec![1];
        store.sync(&first);

        let mut second = entry("f", 3);
        second.replicas = vec![9];
        store.sync(&second);

        assert_eq!(store.get("f").unwrap().replicas, vec![1]);
    }

    #[test]
    fn test_tombstone_hides_path() {
        let store = MetaStore::new();
        store.sync(&entry("f", 1));
        store.sync(&MetaEntry::tombstone("f", 2));

        assert!(store.get("f").is_none());
        assert_eq!(store.version("f"), 2);
        assert!(store.list().is_empty());
        assert_eq!(store.dump().len(), 1);
    }

    #[test]
    fn test_stale_write_cannot_resurrect_tombstone() {
        let store = MetaStore::new();
        store.sync(&MetaEntry::tombstone("f", 4));
        store.sync(&entry("f", 3));
        assert!(store.get("f").is_none());

        store.sync(&entry("f", 5));
        assert_eq!(store.get("f").unwrap().version, 5);
    }

    #[test]
    fn test_empty_path_ignored() {
        let store = MetaStore::new();
        store.sync(&entry("", 1));
        assert!(store.is_empty());
        assert!(store.get("").is_none());
    }
}
