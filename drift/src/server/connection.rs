//! Per-connection request dispatch.
//!
//! Writes must go through the leader to be replicated; any node serves
//! reads from its local state machine. Rejections for non-leaders carry the
//! current leader address so clients can redirect.

use bytes::Bytes;
use dft_core::{
    DriftError, MetaEntry, Method, Status, WireReader, WireWriter, FRAME_HEADER_SIZE,
    MAX_FRAME_SIZE,
};
use dft_metrics as metrics;
use dft_raft::Node;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

pub async fn handle_connection(mut conn: TcpStream, node: Arc<Node>) {
    loop {
        let body = match read_frame(&mut conn).await {
            Ok(body) => body,
            Err(_) => break,
        };
        let frame = dispatch(&node, &body).await;
        if frame
            .get(FRAME_HEADER_SIZE)
            .map(|tag| Status::from_u8(*tag) != Some(Status::Ok))
            .unwrap_or(true)
        {
            metrics::record(&metrics::RPC_ERRORS_TOTAL);
        }
        if conn.write_all(&frame).await.is_err() {
            break;
        }
        if conn.flush().await.is_err() {
            break;
        }
    }
    trace!(target: "drift::server", "Connection closed");
}

async fn read_frame(conn: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    conn.read_exact(&mut header).await?;
    let len = u32::from_le_bytes(header) as usize;
    if len == 0 || len > MAX_FRAME_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("invalid frame length {len}"),
        ));
    }
    let mut body = vec![0u8; len];
    conn.read_exact(&mut body).await?;
    Ok(body)
}

/// Handles one request body (method byte + payload) and returns the complete
/// response frame, length prefix included.
async fn dispatch(node: &Node, body: &[u8]) -> Bytes {
    let Some(&method_byte) = body.first() else {
        return error_frame(Status::InvalidArgument, "empty request");
    };
    let Some(method) = Method::from_u8(method_byte) else {
        return error_frame(Status::InvalidArgument, "unknown method");
    };
    let mut r = WireReader::new(&body[1..]);

    let result = match method {
        Method::Put => {
            metrics::record(&metrics::PUTS_TOTAL);
            handle_put(node, &mut r).await
        }
        Method::Get => {
            metrics::record(&metrics::GETS_TOTAL);
            handle_get(node, &mut r)
        }
        Method::Delete => {
            metrics::record(&metrics::DELETES_TOTAL);
            handle_delete(node, &mut r).await
        }
        Method::AddPeer => {
            metrics::record(&metrics::PEER_CHANGES_TOTAL);
            handle_add_peer(node, &mut r).await
        }
        Method::RemovePeer => {
            metrics::record(&metrics::PEER_CHANGES_TOTAL);
            handle_remove_peer(node, &mut r).await
        }
        Method::SyncMetadata => {
            metrics::record(&metrics::META_SYNCS_TOTAL);
            handle_sync_metadata(node, &mut r).await
        }
        Method::Metadata => {
            metrics::record(&metrics::META_GETS_TOTAL);
            handle_metadata(node, &mut r)
        }
        Method::Report => {
            metrics::record(&metrics::REPORTS_TOTAL);
            handle_report(node)
        }
    };

    match result {
        Ok(payload) => {
            let mut w = WireWriter::new(Status::Ok as u8);
            w.array(&payload);
            w.finish()
        }
        Err(err) => {
            debug!(target: "drift::server", method = ?method, error = %err, "Request failed");
            let (status, message) = classify(&err);
            error_frame(status, &message)
        }
    }
}

async fn handle_put(node: &Node, r: &mut WireReader<'_>) -> dft_core::Result<Bytes> {
    let key = r.bytes()?;
    let data = r.bytes()?;
    node.put(&key, data).await?;
    Ok(Bytes::new())
}

fn handle_get(node: &Node, r: &mut WireReader<'_>) -> dft_core::Result<Bytes> {
    let key = r.bytes()?;
    node.get(&key)
}

async fn handle_delete(node: &Node, r: &mut WireReader<'_>) -> dft_core::Result<Bytes> {
    let key = r.bytes()?;
    node.delete(&key).await?;
    // Tombstone the metadata so replicas and caches drop the path too.
    if let Ok(path) = std::str::from_utf8(&key) {
        let version = node.meta_version(path) + 1;
        node.sync_meta(MetaEntry::tombstone(path, version)).await?;
    }
    Ok(Bytes::new())
}

async fn handle_add_peer(node: &Node, r: &mut WireReader<'_>) -> dft_core::Result<Bytes> {
    let id = r.string()?;
    let address = r.string()?;
    node.add_peer(&id, &address).await?;
    Ok(Bytes::new())
}

async fn handle_remove_peer(node: &Node, r: &mut WireReader<'_>) -> dft_core::Result<Bytes> {
    let id = r.string()?;
    node.remove_peer(&id).await?;
    Ok(Bytes::new())
}

async fn handle_sync_metadata(node: &Node, r: &mut WireReader<'_>) -> dft_core::Result<Bytes> {
    let entry = MetaEntry::decode_from(r)?;
    node.sync_meta(entry).await?;
    Ok(Bytes::new())
}

fn handle_metadata(node: &Node, r: &mut WireReader<'_>) -> dft_core::Result<Bytes> {
    let path = r.string()?;
    let entry = node.meta_get(&path)?;
    let mut w = WireWriter::raw();
    entry.encode_into(&mut w);
    Ok(w.finish())
}

fn handle_report(node: &Node) -> dft_core::Result<Bytes> {
    let pairs = node.report();
    let mut w = WireWriter::raw();
    w.u32(pairs.len() as u32);
    for (key, data) in &pairs {
        w.bytes(key).bytes(data);
    }
    Ok(w.finish())
}

fn classify(err: &DriftError) -> (Status, String) {
    match err {
        DriftError::NotLeader { hint } => (
            Status::FailedPrecondition,
            hint.clone().unwrap_or_default(),
        ),
        DriftError::NotFound => (Status::NotFound, String::new()),
        DriftError::InvalidArgument(msg) | DriftError::Protocol(msg) => {
            (Status::InvalidArgument, msg.clone())
        }
        DriftError::Timeout | DriftError::ClusterUnavailable => {
            (Status::Unavailable, err.to_string())
        }
        other => (Status::Internal, other.to_string()),
    }
}

fn error_frame(status: Status, message: &str) -> Bytes {
    let mut w = WireWriter::new(status as u8);
    w.array(message.as_bytes());
    w.finish()
}
