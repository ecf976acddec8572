//! Replicated state machine commands.
//!
//! A command is the payload of a normal log entry. The framing is
//! self-describing and stable across versions:
//!
//! ```text
//! Put:    0x00 | key_len: u32 LE | key | data_len: u32 LE | data
//! Delete: 0x01 | key_len: u32 LE | key | data_len: u32 LE (= 0)
//! Meta:   0x02 | record_len: u32 LE | meta record
//! ```

use crate::error::{DriftError, Result};
use crate::meta::MetaEntry;
use crate::wire::{WireReader, WireWriter};
use bytes::Bytes;

const OP_PUT: u8 = 0;
const OP_DELETE: u8 = 1;
const OP_META: u8 = 2;

/// A command applied to the replicated state machine.
///
/// Keys are raw bytes on the wire; callers that use string paths guarantee
/// UTF-8 at the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Put { key: Bytes, data: Bytes },
    Delete { key: Bytes },
    Meta(MetaEntry),
}

impl Command {
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut w = WireWriter::raw();
        match self {
            Command::Put { key, data } => {
                w.u8(OP_PUT).bytes(key).bytes(data);
            }
            Command::Delete { key } => {
                w.u8(OP_DELETE).bytes(key).bytes(&[]);
            }
            Command::Meta(entry) => {
                w.u8(OP_META).bytes(&entry.encode());
            }
        }
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(buf);
        let op = r.u8()?;
        let cmd = match op {
            OP_PUT => {
                let key = r.bytes()?;
                let data = r.bytes()?;
                Command::Put { key, data }
            }
            OP_DELETE => {
                let key = r.bytes()?;
                let _ = r.bytes()?;
                Command::Delete { key }
            }
            OP_META => {
                let record = r.bytes()?;
                Command::Meta(MetaEntry::decode(&record)?)
            }
            other => {
                return Err(DriftError::Protocol(format!("unknown command op {other:#04x}")));
            }
        };
        if !r.is_empty() {
            return Err(DriftError::Protocol("trailing bytes after command".into()));
        }
        Ok(cmd)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::hash::sha256;

    #[test]
    fn test_put_roundtrip() {
        let cmd = Command::Put {
            key: Bytes::from_static(b"dir/file.txt"),
            data: Bytes::from_static(b"hello"),
        };
        assert_eq!(Command::decode(&cmd.encode()).unwrap(), cmd);
    }

    #[test]
    fn test_put_empty_key_and_large_data() {
        let cmd = Command::Put {
            key: Bytes::new(),
            data: Bytes::from(vec![0xAB; 3 * 1024 * 1024]),
        };
        assert_eq!(Command::decode(&cmd.encode()).unwrap(), cmd);
    }

    #[test]
    fn test_delete_roundtrip() {
        let cmd = Command::Delete {
            key: Bytes::from_static(b"k"),
        };
        assert_eq!(Command::decode(&cmd.encode()).unwrap(), cmd);
    }

    #[test]
    fn test_meta_roundtrip() {
        let cmd = Command::Meta(MetaEntry {
            path: "a/b".into(),
            version: 3,
            hash: sha256(b"v3"),
            replicas: vec![1],
            deleted: false,
        });
        assert_eq!(Command::decode(&cmd.encode()).unwrap(), cmd);
    }

    #[test]
    fn test_decode_rejects_unknown_op() {
        assert!(Command::decode(&[0x7F]).is_err());
    }

    #[test]
    fn test_decode_rejects_empty_and_truncated() {
        assert!(Command::decode(&[]).is_err());
        let cmd = Command::Put {
            key: Bytes::from_static(b"key"),
            data: Bytes::from_static(b"data"),
        };
        let enc = cmd.encode();
        assert!(Command::decode(&enc[..enc.len() - 2]).is_err());
    }
}
