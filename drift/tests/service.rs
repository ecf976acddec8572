//! The client RPC service end to end: node + listener + framed client.

#![allow(clippy::unwrap_used)]

use bytes::Bytes;
use dft_client::{Client, ClientError};
use dft_core::{sha256, MetaEntry};
use dft_raft::{Node, NodeConfig};
use drift::{files, server};
use std::net::TcpListener as StdTcpListener;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::broadcast;

fn free_addr() -> String {
    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

fn node_config(id: &str, raft_addr: &str, dir: &Path) -> NodeConfig {
    let mut config = NodeConfig::new(id, raft_addr, dir.to_path_buf());
    config.election_timeout = Duration::from_millis(150);
    config.heartbeat_interval = Duration::from_millis(15);
    config
}

async fn connect_with_retry(addr: &str) -> Client {
    let start = tokio::time::Instant::now();
    loop {
        match Client::connect(addr).await {
            Ok(client) => return client,
            Err(_) if start.elapsed() < Duration::from_secs(5) => {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
            Err(err) => panic!("service never came up: {err}"),
        }
    }
}

struct TestServer {
    node: Arc<Node>,
    client_addr: String,
    shutdown: broadcast::Sender<()>,
}

async fn start_server(id: &str, dir: &Path, bootstrap: bool) -> TestServer {
    let raft_addr = free_addr();
    let client_addr = free_addr();
    let mut config = node_config(id, &raft_addr, dir);
    config.bootstrap = bootstrap;
    let node = Node::start(config).await.unwrap();

    let (shutdown, _) = broadcast::channel(1);
    let server_node = Arc::clone(&node);
    let rx = shutdown.subscribe();
    let addr = client_addr.clone();
    tokio::spawn(async move { server::run(&addr, server_node, rx).await });

    TestServer {
        node,
        client_addr,
        shutdown,
    }
}

#[tokio::test]
async fn test_put_get_delete_over_the_wire() {
    let dir = tempdir().unwrap();
    let server = start_server("n1", dir.path(), true).await;
    server
        .node
        .wait_for_leader(Duration::from_secs(5))
        .await
        .unwrap();

    let mut client = connect_with_retry(&server.client_addr).await;

    client.put("foo", b"bar").await.unwrap();
    assert_eq!(client.get("foo").await.unwrap().as_ref(), b"bar");
    assert!(matches!(
        client.get("missing").await,
        Err(ClientError::NotFound)
    ));

    client.delete("foo").await.unwrap();
    assert!(matches!(client.get("foo").await, Err(ClientError::NotFound)));
    // Delete tombstones the metadata as well.
    assert!(matches!(
        client.metadata("foo").await,
        Err(ClientError::NotFound)
    ));

    let _ = server.shutdown.send(());
    server.node.shutdown().await;
}

#[tokio::test]
async fn test_sync_metadata_and_report() {
    let dir = tempdir().unwrap();
    let server = start_server("n1", dir.path(), true).await;
    server
        .node
        .wait_for_leader(Duration::from_secs(5))
        .await
        .unwrap();

    let mut client = connect_with_retry(&server.client_addr).await;

    client.put("a/f", b"v1").await.unwrap();
    client
        .sync_metadata(&MetaEntry::live("a/f", 1, sha256(b"v1")))
        .await
        .unwrap();

    let meta = client.metadata("a/f").await.unwrap();
    assert_eq!(meta.version, 1);
    assert_eq!(meta.hash, sha256(b"v1"));

    let report = client.report().await.unwrap();
    assert_eq!(report.len(), 1);
    assert_eq!(report[0].0.as_ref(), b"a/f");
    assert_eq!(report[0].1.as_ref(), b"v1");

    let _ = server.shutdown.send(());
    server.node.shutdown().await;
}

#[tokio::test]
async fn test_file_api_versions_and_tombstones() {
    let dir = tempdir().unwrap();
    let server = start_server("n1", dir.path(), true).await;
    server
        .node
        .wait_for_leader(Duration::from_secs(5))
        .await
        .unwrap();
    let node = &server.node;

    files::put_file_on(node, "/etc/app.conf", Bytes::from_static(b"one"))
        .await
        .unwrap();
    let meta = files::metadata_on(node, "etc/app.conf").unwrap();
    assert_eq!(meta.version, 1);
    assert_eq!(meta.hash, sha256(b"one"));

    files::put_file_on(node, "etc/app.conf", Bytes::from_static(b"two"))
        .await
        .unwrap();
    assert_eq!(
        files::get_file_on(node, "etc/app.conf").unwrap().as_ref(),
        b"two"
    );
    assert_eq!(files::metadata_on(node, "etc/app.conf").unwrap().version, 2);

    files::delete_file_on(node, "etc/app.conf").await.unwrap();
    assert!(files::get_file_on(node, "etc/app.conf").is_err());
    assert!(files::metadata_on(node, "etc/app.conf").is_err());
    assert_eq!(node.meta_version("etc/app.conf"), 3);

    let _ = server.shutdown.send(());
    server.node.shutdown().await;
}

#[tokio::test]
async fn test_follower_redirects_client_writes() {
    let dir1 = tempdir().unwrap();
    let dir2 = tempdir().unwrap();

    // Build a two-node cluster through AddPeer so ids map cleanly.
    let s1 = start_server("n1", dir1.path(), true).await;
    s1.node.wait_for_leader(Duration::from_secs(5)).await.unwrap();
    let s2 = start_server("n2", dir2.path(), false).await;
    s1.node
        .add_peer("n2", s2.node.advertise_addr())
        .await
        .unwrap();

    // Wait for n2 to learn the leader.
    let start = tokio::time::Instant::now();
    while s2.node.leader().is_none() {
        assert!(start.elapsed() < Duration::from_secs(5), "no leader learned");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    let mut follower = connect_with_retry(&s2.client_addr).await;
    let err = follower.put("k", b"v").await.unwrap_err();
    match err {
        ClientError::NotLeader { hint } => {
            assert_eq!(hint.as_deref(), Some(s1.node.advertise_addr()));
        }
        other => panic!("expected NotLeader, got {other:?}"),
    }

    let _ = s1.shutdown.send(());
    let _ = s2.shutdown.send(());
    s1.node.shutdown().await;
    s2.node.shutdown().await;
}
