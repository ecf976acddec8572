//! Outbound peer connections for consensus RPCs.
//!
//! One task per configured peer owns a TCP connection and services requests
//! handed to it by the consensus core, one outstanding request at a time.
//! Connection failures are retried with exponential backoff; replies and
//! failures flow back to the core as [`PeerEvent`]s.

use crate::codec::{Message, ServerId};
use dft_core::{DriftError, Result, FRAME_HEADER_SIZE, MAX_FRAME_SIZE};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Timing knobs for peer connections.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub dial_timeout: Duration,
    pub request_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(5),
        }
    }
}

/// Outcome of one request handed to a peer task.
#[derive(Debug)]
pub(crate) enum PeerEvent {
    Reply { peer: ServerId, msg: Message },
    Unreachable { peer: ServerId },
}

/// Handle to one running peer task. Dropping it closes the job channel and
/// ends the task.
pub(crate) struct PeerHandle {
    pub tx: mpsc::Sender<Message>,
    task: JoinHandle<()>,
}

impl PeerHandle {
    /// Hands a request to the peer task without blocking. Returns false when
    /// the peer already has a request outstanding.
    pub fn try_send(&self, msg: Message) -> bool {
        self.tx.try_send(msg).is_ok()
    }
}

impl Drop for PeerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub(crate) fn spawn_peer(
    peer: ServerId,
    address: String,
    config: PeerConfig,
    events: mpsc::UnboundedSender<PeerEvent>,
    shutdown: broadcast::Receiver<()>,
) -> PeerHandle {
    // Capacity 1 bounds outstanding requests per peer.
    let (tx, rx) = mpsc::channel(1);
    let task = tokio::spawn(run_peer(peer, address, config, rx, events, shutdown));
    PeerHandle { tx, task }
}

async fn run_peer(
    peer: ServerId,
    address: String,
    config: PeerConfig,
    mut jobs: mpsc::Receiver<Message>,
    events: mpsc::UnboundedSender<PeerEvent>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut stream: Option<TcpStream> = None;
    let mut backoff = config.backoff_base;

    loop {
        let msg = tokio::select! {
            _ = shutdown.recv() => break,
            job = jobs.recv() => match job {
                Some(msg) => msg,
                None => break,
            },
        };

        match exchange(&mut stream, &address, &config, &msg).await {
            Ok(reply) => {
                backoff = config.backoff_base;
                if events
                    .send(PeerEvent::Reply {
                        peer: peer.clone(),
                        msg: reply,
                    })
                    .is_err()
                {
                    break;
                }
            }
            Err(err) => {
                debug!(
                    target: "drift::peer",
                    peer = %peer,
                    address = %address,
                    error = %err,
                    "Peer request failed"
                );
                stream = None;
                if events
                    .send(PeerEvent::Unreachable { peer: peer.clone() })
                    .is_err()
                {
                    break;
                }
                // Back off before servicing the next request so a dead peer
                // is not hammered at heartbeat cadence.
                tokio::select! {
                    _ = shutdown.recv() => break,
                    () = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(config.backoff_max);
            }
        }
    }
    trace!(target: "drift::peer", peer = %peer, "Peer task stopped");
}

async fn exchange(
    stream: &mut Option<TcpStream>,
    address: &str,
    config: &PeerConfig,
    msg: &Message,
) -> Result<Message> {
    if stream.is_none() {
        let connected = timeout(config.dial_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| DriftError::Timeout)??;
        connected.set_nodelay(true)?;
        *stream = Some(connected);
    }
    let conn = stream
        .as_mut()
        .ok_or(DriftError::ChannelClosed("peer stream"))?;

    let result = timeout(config.request_timeout, async {
        write_frame(conn, &msg.encode()).await?;
        let body = read_frame(conn).await?;
        Message::decode(&body)
    })
    .await
    .map_err(|_| DriftError::Timeout)?;

    if result.is_err() {
        *stream = None;
    }
    result
}

/// Writes a complete frame (length prefix already included by the encoder).
pub(crate) async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one length-prefixed frame and returns its body.
pub(crate) async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    reader.read_exact(&mut header).await?;
    let len = u32::from_le_bytes(header) as usize;
    if len == 0 || len > MAX_FRAME_SIZE {
        return Err(DriftError::Protocol(format!("invalid frame length {len}")));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::codec::{VoteRequest, VoteResponse};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_frame_roundtrip_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let body = read_frame(&mut conn).await.unwrap();
            let msg = Message::decode(&body).unwrap();
            assert!(matches!(msg, Message::VoteRequest(_)));
            let reply = Message::VoteResponse(VoteResponse {
                term: 3,
                vote_granted: true,
            });
            write_frame(&mut conn, &reply.encode()).await.unwrap();
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let req = Message::VoteRequest(VoteRequest {
            term: 3,
            candidate_id: "n1".into(),
            last_log_index: 0,
            last_log_term: 0,
        });
        write_frame(&mut client, &req.encode()).await.unwrap();
        let body = read_frame(&mut client).await.unwrap();
        match Message::decode(&body).unwrap() {
            Message::VoteResponse(resp) => assert!(resp.vote_granted),
            other => panic!("unexpected reply {other:?}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_reports_unreachable() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);
        let config = PeerConfig {
            dial_timeout: Duration::from_millis(200),
            backoff_base: Duration::from_millis(10),
            ..PeerConfig::default()
        };
        // Nothing listens on this port.
        let handle = spawn_peer(
            "n9".into(),
            "127.0.0.1:1".into(),
            config,
            events_tx,
            shutdown_tx.subscribe(),
        );

        assert!(handle.try_send(Message::VoteRequest(VoteRequest {
            term: 1,
            candidate_id: "n1".into(),
            last_log_index: 0,
            last_log_term: 0,
        })));

        match events_rx.recv().await.unwrap() {
            PeerEvent::Unreachable { peer } => assert_eq!(peer, "n9"),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
