//! High-level file operations over the replicated namespace, plus the
//! process-wide handle to the active node.
//!
//! A file write is two replicated commands: the blob (`put`) followed by the
//! metadata record at the next version with the content hash (`sync_meta`).
//! They are deliberately not atomic; if a crash lands between them, readers
//! see the previous version and the consistency checker reconciles the cache
//! once the metadata catches up.

use bytes::Bytes;
use dft_core::{sha256, DriftError, MetaEntry, Result};
use dft_raft::Node;
use std::sync::{Arc, OnceLock};

static ACTIVE_NODE: OnceLock<Arc<Node>> = OnceLock::new();

/// Registers the process-wide active node. Set once at startup; later calls
/// are ignored.
pub fn set_node(node: Arc<Node>) {
    let _ = ACTIVE_NODE.set(node);
}

/// The active node, if one has been registered.
pub fn node() -> Result<Arc<Node>> {
    ACTIVE_NODE
        .get()
        .cloned()
        .ok_or_else(|| DriftError::Internal("node not initialized".into()))
}

/// Normalizes a client-supplied path: strips leading separators, rejects
/// empty paths and traversal.
pub fn clean_path(path: &str) -> Result<String> {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() || trimmed == "." {
        return Err(DriftError::NotFound);
    }
    if trimmed.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
        return Err(DriftError::NotFound);
    }
    Ok(trimmed.to_string())
}

/// Stores `data` under `path` and bumps the path's version with a fresh
/// content hash.
pub async fn put_file_on(node: &Node, path: &str, data: Bytes) -> Result<()> {
    let path = clean_path(path)?;
    let hash = sha256(&data);
    node.put(path.as_bytes(), data).await?;
    let version = node.meta_version(&path) + 1;
    node.sync_meta(MetaEntry::live(path, version, hash)).await
}

/// Reads the current contents of `path` from the local replica.
pub fn get_file_on(node: &Node, path: &str) -> Result<Bytes> {
    let path = clean_path(path)?;
    node.get(path.as_bytes())
}

/// Removes `path` and tombstones its metadata at the next version.
pub async fn delete_file_on(node: &Node, path: &str) -> Result<()> {
    let path = clean_path(path)?;
    let version = node.meta_version(&path) + 1;
    node.delete(path.as_bytes()).await?;
    node.sync_meta(MetaEntry::tombstone(path, version)).await
}

/// Metadata for `path`; tombstoned paths read as absent.
pub fn metadata_on(node: &Node, path: &str) -> Result<MetaEntry> {
    let path = clean_path(path)?;
    node.meta_get(&path)
}

pub async fn put_file(path: &str, data: Bytes) -> Result<()> {
    let n = node()?;
    put_file_on(&n, path, data).await
}

pub fn get_file(path: &str) -> Result<Bytes> {
    let n = node()?;
    get_file_on(&n, path)
}

pub async fn delete_file(path: &str) -> Result<()> {
    let n = node()?;
    delete_file_on(&n, path).await
}

pub fn metadata(path: &str) -> Result<MetaEntry> {
    let n = node()?;
    metadata_on(&n, path)
}
