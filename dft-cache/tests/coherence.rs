//! Cache coherence against live nodes, including the metadata invalidation
//! scenario across a two-node cluster.

#![allow(clippy::unwrap_used)]

use bytes::Bytes;
use dft_cache::{Checker, FileCache, VERSION_SUFFIX};
use dft_core::{sha256, DriftError, MetaEntry};
use dft_raft::{Node, NodeConfig};
use std::net::TcpListener as StdTcpListener;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn free_addr() -> String {
    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

fn test_config(id: &str, addr: &str, dir: &Path) -> NodeConfig {
    let mut config = NodeConfig::new(id, addr, dir.to_path_buf());
    config.election_timeout = Duration::from_millis(150);
    config.heartbeat_interval = Duration::from_millis(15);
    config
}

async fn put_file(node: &Node, path: &str, data: &[u8]) {
    node.put(path.as_bytes(), Bytes::copy_from_slice(data))
        .await
        .unwrap();
    let version = node.meta_version(path) + 1;
    node.sync_meta(MetaEntry::live(path, version, sha256(data)))
        .await
        .unwrap();
}

async fn eventually<F>(deadline: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    check()
}

#[tokio::test]
async fn test_ensure_reads_through_and_writes_back() {
    let data_dir = tempdir().unwrap();
    let cache_dir = tempdir().unwrap();
    let addr = free_addr();
    let mut config = test_config("n1", &addr, data_dir.path());
    config.bootstrap = true;

    let node = Node::start(config).await.unwrap();
    node.wait_for_leader(Duration::from_secs(5)).await.unwrap();
    put_file(&node, "docs/readme", b"hello").await;

    let cache = FileCache::new(Arc::clone(&node), cache_dir.path()).unwrap();
    let data = cache.ensure("docs/readme").await.unwrap();
    assert_eq!(data.as_ref(), b"hello");

    // The write-back lands asynchronously: blob plus ASCII version file.
    let blob = cache_dir.path().join("docs/readme");
    let ver = cache_dir.path().join(format!("docs/readme{VERSION_SUFFIX}"));
    assert!(
        eventually(Duration::from_secs(2), || blob.exists() && ver.exists()).await,
        "write-back never landed"
    );
    assert_eq!(std::fs::read(&blob).unwrap(), b"hello");
    assert_eq!(std::fs::read_to_string(&ver).unwrap(), "1");

    // Unknown paths purge and report NotFound.
    assert!(matches!(
        cache.ensure("missing").await,
        Err(DriftError::NotFound)
    ));

    node.shutdown().await;
}

#[tokio::test]
async fn test_metadata_invalidation_on_follower() {
    let dir1 = tempdir().unwrap();
    let dir2 = tempdir().unwrap();
    let cache_dir = tempdir().unwrap();
    let addr1 = free_addr();
    let addr2 = free_addr();

    let mut c1 = test_config("n1", &addr1, dir1.path());
    c1.peers = vec![addr2.clone()];
    c1.bootstrap = true;
    let mut c2 = test_config("n2", &addr2, dir2.path());
    c2.peers = vec![addr1.clone()];
    c2.bootstrap = true;

    let n1 = Node::start(c1).await.unwrap();
    let n2 = Node::start(c2).await.unwrap();

    // Find the leader and its follower.
    let start = tokio::time::Instant::now();
    let (leader, follower) = loop {
        if n1.is_leader() {
            break (Arc::clone(&n1), Arc::clone(&n2));
        }
        if n2.is_leader() {
            break (Arc::clone(&n2), Arc::clone(&n1));
        }
        assert!(start.elapsed() < Duration::from_secs(10), "no leader");
        tokio::time::sleep(Duration::from_millis(25)).await;
    };

    put_file(&leader, "f", b"v1").await;
    assert!(
        eventually(Duration::from_secs(2), || follower.meta_version("f") == 1).await,
        "metadata v1 did not replicate"
    );

    let cache = FileCache::new(Arc::clone(&follower), cache_dir.path()).unwrap();
    assert_eq!(cache.ensure("f").await.unwrap().as_ref(), b"v1");

    put_file(&leader, "f", b"v2").await;
    assert!(
        eventually(Duration::from_secs(2), || follower.meta_version("f") == 2).await,
        "metadata v2 did not replicate"
    );

    // The cached v1 entry no longer matches; ensure re-fetches v2.
    assert_eq!(cache.ensure("f").await.unwrap().as_ref(), b"v2");
    let ver = cache_dir.path().join(format!("f{VERSION_SUFFIX}"));
    assert!(
        eventually(Duration::from_secs(2), || {
            std::fs::read_to_string(&ver)
                .map(|s| s == "2")
                .unwrap_or(false)
        })
        .await,
        "version file was not rewritten to 2"
    );

    n1.shutdown().await;
    n2.shutdown().await;
}

#[tokio::test]
async fn test_checker_refreshes_and_purges() {
    let data_dir = tempdir().unwrap();
    let cache_dir = tempdir().unwrap();
    let addr = free_addr();
    let mut config = test_config("n1", &addr, data_dir.path());
    config.bootstrap = true;

    let node = Node::start(config).await.unwrap();
    node.wait_for_leader(Duration::from_secs(5)).await.unwrap();
    put_file(&node, "a.txt", b"current").await;

    // Stale blob: wrong bytes, wrong version.
    std::fs::write(cache_dir.path().join("a.txt"), b"old").unwrap();
    // Orphan blob: no metadata behind it.
    std::fs::write(cache_dir.path().join("orphan.txt"), b"junk").unwrap();

    let checker = Checker::new(Arc::clone(&node), cache_dir.path());
    checker.scan();

    assert_eq!(
        std::fs::read(cache_dir.path().join("a.txt")).unwrap(),
        b"current"
    );
    assert_eq!(
        std::fs::read_to_string(cache_dir.path().join(format!("a.txt{VERSION_SUFFIX}"))).unwrap(),
        "1"
    );
    assert!(!cache_dir.path().join("orphan.txt").exists());

    // Tombstoned paths are swept on the next pass.
    node.delete(b"a.txt").await.unwrap();
    node.sync_meta(MetaEntry::tombstone("a.txt", 2)).await.unwrap();
    checker.scan();
    assert!(!cache_dir.path().join("a.txt").exists());
    assert!(!cache_dir
        .path()
        .join(format!("a.txt{VERSION_SUFFIX}"))
        .exists());

    node.shutdown().await;
}
