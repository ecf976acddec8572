//! Framed TCP client for the DRIFT file service.
//!
//! One request/response pair per call over a persistent connection. The
//! caller is responsible for redirecting to the leader when a call returns
//! [`ClientError::NotLeader`]; the hint carries the address to retry.

use crate::error::{ClientError, Result};
use bytes::Bytes;
use dft_core::{MetaEntry, Method, Status, WireReader, WireWriter, FRAME_HEADER_SIZE, MAX_FRAME_SIZE};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Client {
    stream: TcpStream,
    address: String,
}

impl Client {
    /// Connects with the default dial timeout.
    pub async fn connect(address: &str) -> Result<Self> {
        Self::connect_timeout(address, DEFAULT_CONNECT_TIMEOUT).await
    }

    pub async fn connect_timeout(address: &str, deadline: Duration) -> Result<Self> {
        let stream = timeout(deadline, TcpStream::connect(address))
            .await
            .map_err(|_| ClientError::Timeout)??;
        stream.set_nodelay(true)?;
        trace!(target: "drift::client", address, "Connected");
        Ok(Self {
            stream,
            address: address.to_string(),
        })
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn put(&mut self, key: &str, data: &[u8]) -> Result<()> {
        let mut w = WireWriter::new(Method::Put as u8);
        w.bytes(key.as_bytes()).bytes(data);
        self.call(w.finish()).await.map(|_| ())
    }

    pub async fn get(&mut self, key: &str) -> Result<Bytes> {
        let mut w = WireWriter::new(Method::Get as u8);
        w.bytes(key.as_bytes());
        let payload = self.call(w.finish()).await?;
        Ok(Bytes::from(payload))
    }

    pub async fn delete(&mut self, key: &str) -> Result<()> {
        let mut w = WireWriter::new(Method::Delete as u8);
        w.bytes(key.as_bytes());
        self.call(w.finish()).await.map(|_| ())
    }

    pub async fn add_peer(&mut self, id: &str, address: &str) -> Result<()> {
        let mut w = WireWriter::new(Method::AddPeer as u8);
        w.string(id).string(address);
        self.call(w.finish()).await.map(|_| ())
    }

    pub async fn remove_peer(&mut self, id: &str) -> Result<()> {
        let mut w = WireWriter::new(Method::RemovePeer as u8);
        w.string(id);
        self.call(w.finish()).await.map(|_| ())
    }

    pub async fn sync_metadata(&mut self, entry: &MetaEntry) -> Result<()> {
        let mut w = WireWriter::new(Method::SyncMetadata as u8);
        entry.encode_into(&mut w);
        self.call(w.finish()).await.map(|_| ())
    }

    pub async fn metadata(&mut self, path: &str) -> Result<MetaEntry> {
        let mut w = WireWriter::new(Method::Metadata as u8);
        w.string(path);
        let payload = self.call(w.finish()).await?;
        let mut r = WireReader::new(&payload);
        MetaEntry::decode_from(&mut r).map_err(|e| ClientError::Protocol(e.to_string()))
    }

    /// Streams every live (key, data) pair held by the node.
    pub async fn report(&mut self) -> Result<Vec<(Bytes, Bytes)>> {
        let w = WireWriter::new(Method::Report as u8);
        let payload = self.call(w.finish()).await?;
        let mut r = WireReader::new(&payload);
        let count = r.u32().map_err(|e| ClientError::Protocol(e.to_string()))? as usize;
        let mut pairs = Vec::with_capacity(count.min(1 << 20));
        for _ in 0..count {
            let key = r.bytes().map_err(|e| ClientError::Protocol(e.to_string()))?;
            let data = r.bytes().map_err(|e| ClientError::Protocol(e.to_string()))?;
            pairs.push((key, data));
        }
        Ok(pairs)
    }

    async fn call(&mut self, frame: Bytes) -> Result<Vec<u8>> {
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;

        let mut header = [0u8; FRAME_HEADER_SIZE];
        self.stream.read_exact(&mut header).await?;
        let len = u32::from_le_bytes(header) as usize;
        if len == 0 || len > MAX_FRAME_SIZE {
            return Err(ClientError::Protocol(format!("invalid frame length {len}")));
        }
        let mut body = vec![0u8; len];
        self.stream.read_exact(&mut body).await?;

        let status = Status::from_u8(body[0])
            .ok_or_else(|| ClientError::Protocol(format!("unknown status {:#04x}", body[0])))?;
        let payload = body.split_off(1);
        match status {
            Status::Ok => Ok(payload),
            Status::NotFound => Err(ClientError::NotFound),
            Status::FailedPrecondition => {
                let hint = String::from_utf8(payload).ok().filter(|s| !s.is_empty());
                Err(ClientError::NotLeader { hint })
            }
            Status::InvalidArgument => Err(ClientError::InvalidArgument(text(payload))),
            Status::Unavailable => Err(ClientError::Unavailable(text(payload))),
            Status::Internal => Err(ClientError::Server(text(payload))),
        }
    }
}

fn text(payload: Vec<u8>) -> String {
    String::from_utf8_lossy(&payload).into_owned()
}
