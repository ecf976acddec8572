//! Per-path replication metadata.

use crate::error::{DriftError, Result};
use crate::wire::{WireReader, WireWriter};
use bytes::Bytes;

/// Size of a content hash (sha256).
pub const HASH_LEN: usize = 32;

/// Identifies a node holding a replica of a path.
pub type ReplicaId = u64;

/// Metadata record for one logical path.
///
/// Entries merge by version: a higher version always wins, and a tombstone
/// (`deleted = true`) at version v permanently hides the path from reads at
/// any version ≤ v.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetaEntry {
    pub path: String,
    pub version: u64,
    pub hash: [u8; HASH_LEN],
    pub replicas: Vec<ReplicaId>,
    pub deleted: bool,
}

impl MetaEntry {
    /// Builds a live entry for `path` at `version` hashing over `data`.
    #[must_use]
    pub fn live(path: impl Into<String>, version: u64, hash: [u8; HASH_LEN]) -> Self {
        Self {
            path: path.into(),
            version,
            hash,
            replicas: Vec::new(),
            deleted: false,
        }
    }

    /// Builds a tombstone for `path` at `version`.
    #[must_use]
    pub fn tombstone(path: impl Into<String>, version: u64) -> Self {
        Self {
            path: path.into(),
            version,
            hash: [0; HASH_LEN],
            replicas: Vec::new(),
            deleted: true,
        }
    }

    /// Serialized record: `path | version | hash | replica_count | replicas | deleted`.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut w = WireWriter::raw();
        self.encode_into(&mut w);
        w.finish()
    }

    /// Appends the record fields to an in-progress frame.
    pub fn encode_into(&self, w: &mut WireWriter) {
        w.string(&self.path);
        w.u64(self.version);
        w.array(&self.hash);
        w.u32(self.replicas.len() as u32);
        for r in &self.replicas {
            w.u64(*r);
        }
        w.u8(u8::from(self.deleted));
    }

    /// Decodes a record produced by [`MetaEntry::encode`].
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(buf);
        let entry = Self::decode_from(&mut r)?;
        if !r.is_empty() {
            return Err(DriftError::Protocol("trailing bytes after meta entry".into()));
        }
        Ok(entry)
    }

    /// Reads the record fields from an in-progress frame.
    pub fn decode_from(r: &mut WireReader<'_>) -> Result<Self> {
        let path = r.string()?;
        let version = r.u64()?;
        let hash = r.array::<HASH_LEN>()?;
        let count = r.u32()? as usize;
        if count > crate::wire::MAX_FRAME_SIZE / 8 {
            return Err(DriftError::Protocol("replica list too large".into()));
        }
        let mut replicas = Vec::with_capacity(count);
        for _ in 0..count {
            replicas.push(r.u64()?);
        }
        let deleted = r.u8()? != 0;
        Ok(Self {
            path,
            version,
            hash,
            replicas,
            deleted,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::hash::sha256;

    #[test]
    fn test_meta_entry_roundtrip() {
        let entry = MetaEntry {
            path: "etc/config.toml".into(),
            version: 12,
            hash: sha256(b"contents"),
            replicas: vec![1, 2, 9],
            deleted: false,
        };
        let encoded = entry.encode();
        assert_eq!(MetaEntry::decode(&encoded).unwrap(), entry);
    }

    #[test]
    fn test_tombstone_roundtrip() {
        let entry = MetaEntry::tombstone("gone/file", 4);
        let decoded = MetaEntry::decode(&entry.encode()).unwrap();
        assert!(decoded.deleted);
        assert_eq!(decoded.version, 4);
        assert_eq!(decoded.hash, [0; HASH_LEN]);
    }

    #[test]
    fn test_decode_rejects_truncated_record() {
        let entry = MetaEntry::live("a", 1, [7; HASH_LEN]);
        let encoded = entry.encode();
        assert!(MetaEntry::decode(&encoded[..encoded.len() - 1]).is_err());
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut encoded = MetaEntry::live("a", 1, [7; HASH_LEN]).encode().to_vec();
        encoded.push(0);
        assert!(MetaEntry::decode(&encoded).is_err());
    }
}
