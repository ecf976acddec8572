//! Durable key/value storage for consensus metadata.
//!
//! Holds `current_term` and `voted_for`. Writes go through a temp file and an
//! atomic rename, then sync the directory, so a crash mid-write leaves the
//! previous value intact. Only the consensus core writes these keys.

use dft_core::Result;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const KEY_CURRENT_TERM: &str = "current_term";
pub const KEY_VOTED_FOR: &str = "voted_for";

pub struct StableStore {
    dir: PathBuf,
}

impl StableStore {
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Durable write of `value` under `key`.
    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.dir.join(key);
        let tmp = self.dir.join(format!("{key}.tmp"));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(value)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        File::open(&self.dir)?.sync_all()?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.dir.join(key)) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn set_current_term(&self, term: u64) -> Result<()> {
        self.put(KEY_CURRENT_TERM, &term.to_le_bytes())
    }

    pub fn current_term(&self) -> Result<u64> {
        match self.get(KEY_CURRENT_TERM)? {
            Some(raw) if raw.len() == 8 => {
                let arr: [u8; 8] = raw.as_slice().try_into().unwrap_or([0; 8]);
                Ok(u64::from_le_bytes(arr))
            }
            _ => Ok(0),
        }
    }

    pub fn set_voted_for(&self, candidate: Option<&str>) -> Result<()> {
        self.put(KEY_VOTED_FOR, candidate.unwrap_or_default().as_bytes())
    }

    pub fn voted_for(&self) -> Result<Option<String>> {
        match self.get(KEY_VOTED_FOR)? {
            Some(raw) if !raw.is_empty() => {
                Ok(String::from_utf8(raw).ok().filter(|s| !s.is_empty()))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_when_empty() {
        let dir = tempdir().unwrap();
        let store = StableStore::open(dir.path()).unwrap();
        assert_eq!(store.current_term().unwrap(), 0);
        assert_eq!(store.voted_for().unwrap(), None);
    }

    #[test]
    fn test_term_and_vote_roundtrip() {
        let dir = tempdir().unwrap();
        let store = StableStore::open(dir.path()).unwrap();

        store.set_current_term(9).unwrap();
        store.set_voted_for(Some("n2")).unwrap();
        assert_eq!(store.current_term().unwrap(), 9);
        assert_eq!(store.voted_for().unwrap().as_deref(), Some("n2"));

        store.set_voted_for(None).unwrap();
        assert_eq!(store.voted_for().unwrap(), None);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = StableStore::open(dir.path()).unwrap();
            store.set_current_term(4).unwrap();
            store.set_voted_for(Some("n1")).unwrap();
        }
        let store = StableStore::open(dir.path()).unwrap();
        assert_eq!(store.current_term().unwrap(), 4);
        assert_eq!(store.voted_for().unwrap().as_deref(), Some("n1"));
    }
}
