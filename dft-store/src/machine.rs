//! The state machine driven by the replicated log.
//!
//! `apply` is a deterministic function of (current state, payload) and is
//! invoked by a single writer in commit order; readers see either the state
//! before or after an entry, never a partial application.

use crate::kv::KvStore;
use crate::meta::MetaStore;
use bytes::Bytes;
use dft_core::{Command, DriftError, MetaEntry, Result, WireReader, WireWriter};
use tracing::debug;

pub struct StateMachine {
    kv: KvStore,
    meta: MetaStore,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            kv: KvStore::new(),
            meta: MetaStore::new(),
        }
    }

    /// Applies one committed command payload.
    pub fn apply(&self, payload: &[u8]) -> Result<()> {
        match Command::decode(payload)? {
            Command::Put { key, data } => {
                self.kv.put(key, data);
            }
            Command::Delete { key } => {
                self.kv.delete(&key);
            }
            Command::Meta(entry) => {
                self.meta.sync(&entry);
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.kv.get(key)
    }

    /// Metadata for `path`; tombstoned paths read as absent.
    #[must_use]
    pub fn meta_get(&self, path: &str) -> Option<MetaEntry> {
        self.meta.get(path)
    }

    /// Current version for `path`, tombstones included.
    #[must_use]
    pub fn meta_version(&self, path: &str) -> u64 {
        self.meta.version(path)
    }

    #[must_use]
    pub fn meta_list(&self) -> Vec<MetaEntry> {
        self.meta.list()
    }

    /// Every live (key, value) pair, for the Report RPC.
    #[must_use]
    pub fn report(&self) -> Vec<(Bytes, Bytes)> {
        self.kv.dump()
    }

    /// Serializes a point-in-time image of `(KV, MetaStore)`.
    ///
    /// The caller (the apply task) is the sole writer, so the two reads are
    /// mutually consistent.
    #[must_use]
    pub fn snapshot_bytes(&self) -> Bytes {
        let pairs = self.kv.dump();
        let metas = self.meta.dump();

        let mut w = WireWriter::raw();
        w.u32(pairs.len() as u32);
        for (key, data) in &pairs {
            w.bytes(key).bytes(data);
        }
        w.u32(metas.len() as u32);
        for entry in &metas {
            w.bytes(&entry.encode());
        }
        debug!(
            target: "drift::fsm",
            keys = pairs.len(),
            meta_entries = metas.len(),
            "Serialized state machine snapshot"
        );
        w.finish()
    }

    /// Replaces the current state with a snapshot image.
    pub fn restore(&self, image: &[u8]) -> Result<()> {
        let mut r = WireReader::new(image);

        let kv_count = r.u32()? as usize;
        let mut pairs = Vec::with_capacity(kv_count.min(1 << 20));
        for _ in 0..kv_count {
            let key = r.bytes()?;
            let data = r.bytes()?;
            pairs.push((key, data));
        }

        let meta_count = r.u32()? as usize;
        let mut metas = Vec::with_capacity(meta_count.min(1 << 20));
        for _ in 0..meta_count {
            let record = r.bytes()?;
            metas.push(MetaEntry::decode(&record)?);
        }

        if !r.is_empty() {
            return Err(DriftError::Protocol(
                "trailing bytes after snapshot image".into(),
            ));
        }

        self.kv.replace(pairs);
        self.meta.replace(metas);
        debug!(
            target: "drift::fsm",
            keys = kv_count,
            meta_entries = meta_count,
            "Restored state machine from snapshot"
        );
        Ok(())
    }
}
