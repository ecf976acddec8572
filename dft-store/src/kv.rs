//! In-memory key→bytes map with shared-read access.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// The key/value half of the state machine. One writer (the apply task),
/// many readers.
#[derive(Debug, Default)]
pub struct KvStore {
    data: RwLock<HashMap<Bytes, Bytes>>,
}

impl KvStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Bytes, Bytes>> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Bytes, Bytes>> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn put(&self, key: Bytes, data: Bytes) {
        self.write().insert(key, data);
    }

    pub fn delete(&self, key: &[u8]) {
        self.write().remove(key);
    }

    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.read().get(key).cloned()
    }

    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        self.read().contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Consistent copy of every pair, for snapshots and the Report RPC.
    #[must_use]
    pub fn dump(&self) -> Vec<(Bytes, Bytes)> {
        self.read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Replaces the whole map (snapshot restore).
    pub fn replace(&self, pairs: Vec<(Bytes, Bytes)>) {
        let mut guard = self.write();
        guard.clear();
        guard.extend(pairs);
    }
}
