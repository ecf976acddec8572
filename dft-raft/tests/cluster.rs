//! End-to-end cluster scenarios against real nodes on loopback TCP.

#![allow(clippy::unwrap_used)]

use bytes::Bytes;
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

async fn leader_of(nodes: &[Arc<Node>], deadline: Duration) -> Arc<Node> {
    let start = tokio::time::Instant::now();
    loop {
        for node in nodes {
            if node.is_leader() {
                return Arc::clone(node);
            }
        }
        assert!(start.elapsed() < deadline, "no leader elected in time");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn test_single_node_write_read() {
    let dir = tempdir().unwrap();
    let addr = free_addr();
    let mut config = test_config("n1", &addr, dir.path());
    config.bootstrap = true;

    let node = Node::start(config).await.unwrap();
    node.wait_for_leader(Duration::from_secs(5)).await.unwrap();
    assert!(node.is_leader());

    node.put(b"foo", Bytes::from_static(b"bar")).await.unwrap();
    assert_eq!(node.get(b"foo").unwrap().as_ref(), b"bar");
    assert!(matches!(node.get(b"missing"), Err(DriftError::NotFound)));

    node.shutdown().await;
}

#[tokio::test]
async fn test_two_node_replication() {
    let dir1 = tempdir().unwrap();
    let dir2 = tempdir().unwrap();
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
    let nodes = [Arc::clone(&n1), Arc::clone(&n2)];

    let leader = leader_of(&nodes, Duration::from_secs(10)).await;
    let follower = if leader.id() == "n1" {
        Arc::clone(&n2)
    } else {
        Arc::clone(&n1)
    };

    leader.put(b"k", Bytes::from_static(b"v")).await.unwrap();
    assert!(
        eventually(Duration::from_secs(2), || follower
            .get(b"k")
            .map(|v| v.as_ref() == b"v")
            .unwrap_or(false))
        .await,
        "follower did not observe the replicated write"
    );

    n1.shutdown().await;
    n2.shutdown().await;
}

#[tokio::test]
async fn test_follower_write_rejected_with_hint() {
    let dir1 = tempdir().unwrap();
    let dir2 = tempdir().unwrap();
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
    let nodes = [Arc::clone(&n1), Arc::clone(&n2)];

    let leader = leader_of(&nodes, Duration::from_secs(10)).await;
    let follower = if leader.id() == "n1" {
        Arc::clone(&n2)
    } else {
        Arc::clone(&n1)
    };
    // Let the first heartbeat deliver the leader address to the follower.
    assert!(
        eventually(Duration::from_secs(2), || follower.leader().is_some()).await,
        "follower never learned the leader"
    );

    let err = follower
        .put(b"k2", Bytes::from_static(b"v2"))
        .await
        .unwrap_err();
    match err {
        DriftError::NotLeader { hint } => {
            assert_eq!(hint.as_deref(), Some(leader.advertise_addr()));
        }
        other => panic!("expected NotLeader, got {other:?}"),
    }
    // The rejected write left no trace on either node.
    assert!(follower.get(b"k2").is_err());
    assert!(leader.get(b"k2").is_err());

    n1.shutdown().await;
    n2.shutdown().await;
}

#[tokio::test]
async fn test_dynamic_membership() {
    let dir1 = tempdir().unwrap();
    let dir2 = tempdir().unwrap();
    let addr1 = free_addr();
    let addr2 = free_addr();

    let mut c1 = test_config("n1", &addr1, dir1.path());
    c1.bootstrap = true;
    let n1 = Node::start(c1).await.unwrap();
    n1.wait_for_leader(Duration::from_secs(5)).await.unwrap();

    let c2 = test_config("n2", &addr2, dir2.path());
    let n2 = Node::start(c2).await.unwrap();
    assert!(!n2.is_leader());

    n1.add_peer("n2", &addr2).await.unwrap();
    n1.put(b"k1", Bytes::from_static(b"v1")).await.unwrap();
    assert!(
        eventually(Duration::from_secs(5), || n2
            .get(b"k1")
            .map(|v| v.as_ref() == b"v1")
            .unwrap_or(false))
        .await,
        "added peer did not catch up"
    );

    n1.remove_peer("n2").await.unwrap();
    n1.put(b"k2", Bytes::from_static(b"v2")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(
        n2.get(b"k2").is_err(),
        "removed peer kept receiving replicated writes"
    );

    n1.shutdown().await;
    n2.shutdown().await;
}

#[tokio::test]
async fn test_meta_sync_and_tombstone() {
    let dir = tempdir().unwrap();
    let addr = free_addr();
    let mut config = test_config("n1", &addr, dir.path());
    config.bootstrap = true;

    let node = Node::start(config).await.unwrap();
    node.wait_for_leader(Duration::from_secs(5)).await.unwrap();

    node.put(b"f", Bytes::from_static(b"v1")).await.unwrap();
    node.sync_meta(MetaEntry::live("f", 1, sha256(b"v1")))
        .await
        .unwrap();
    let meta = node.meta_get("f").unwrap();
    assert_eq!(meta.version, 1);
    assert_eq!(meta.hash, sha256(b"v1"));

    node.sync_meta(MetaEntry::tombstone("f", 2)).await.unwrap();
    assert!(matches!(node.meta_get("f"), Err(DriftError::NotFound)));
    assert_eq!(node.meta_version("f"), 2);

    // Empty paths are rejected before they reach the log.
    assert!(matches!(
        node.sync_meta(MetaEntry::live("", 1, [0; 32])).await,
        Err(DriftError::InvalidArgument(_))
    ));

    node.shutdown().await;
}

#[tokio::test]
async fn test_snapshot_and_restart_restore() {
    let dir = tempdir().unwrap();
    let addr = free_addr();

    {
        let mut config = test_config("n1", &addr, dir.path());
        config.bootstrap = true;
        config.snapshot_threshold = 64;

        let node = Node::start(config).await.unwrap();
        node.wait_for_leader(Duration::from_secs(5)).await.unwrap();

        for i in 0..1024u32 {
            node.put(format!("k{i}").as_bytes(), Bytes::from_static(b"v"))
                .await
                .unwrap();
        }
        // Give the background snapshot a moment to land.
        tokio::time::sleep(Duration::from_millis(500)).await;
        node.shutdown().await;
    }

    let mut config = test_config("n1", &addr, dir.path());
    config.bootstrap = true;
    config.snapshot_threshold = 64;
    let node = Node::start(config).await.unwrap();
    node.wait_for_leader(Duration::from_secs(5)).await.unwrap();

    // The tail of the log re-applies after the restart election commits it;
    // the last key is the slowest to reappear.
    assert!(
        eventually(Duration::from_secs(5), || node
            .get(b"k1023")
            .map(|v| v.as_ref() == b"v")
            .unwrap_or(false))
        .await,
        "restarted node did not recover its state"
    );
    for i in 0..1024u32 {
        assert_eq!(
            node.get(format!("k{i}").as_bytes()).unwrap().as_ref(),
            b"v",
            "k{i} missing after restart"
        );
    }

    node.shutdown().await;
}

#[tokio::test]
async fn test_report_lists_all_pairs() {
    let dir = tempdir().unwrap();
    let addr = free_addr();
    let mut config = test_config("n1", &addr, dir.path());
    config.bootstrap = true;

    let node = Node::start(config).await.unwrap();
    node.wait_for_leader(Duration::from_secs(5)).await.unwrap();

    node.put(b"a", Bytes::from_static(b"1")).await.unwrap();
    node.put(b"b", Bytes::from_static(b"2")).await.unwrap();
    node.delete(b"a").await.unwrap();

    let report = node.report();
    assert_eq!(report.len(), 1);
    assert_eq!(report[0].0.as_ref(), b"b");

    node.shutdown().await;
}
