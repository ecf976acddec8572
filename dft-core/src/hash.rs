use crate::meta::HASH_LEN;
use sha2::{Digest, Sha256};

/// Content hash used for cache validation and metadata records.
#[inline]
#[must_use]
pub fn sha256(data: &[u8]) -> [u8; HASH_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}
