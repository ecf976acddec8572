//! Wire codec for consensus RPCs.
//!
//! Every message travels as one length-prefixed frame
//! (`len: u32 LE | tag: u8 | body`), mirroring the client protocol framing.
//! Decoding is bounds-checked and returns protocol errors rather than
//! panicking on malformed input.

use bytes::Bytes;
use dft_core::{DriftError, Result, WireReader, WireWriter};

/// Server identifier. Unique within a cluster, human-assigned.
pub type ServerId = String;

/// Configuration role. Only voters count toward quorum and elections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Role {
    Voter = 0,
    NonVoter = 1,
}

impl Role {
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Voter),
            1 => Some(Self::NonVoter),
            _ => None,
        }
    }
}

/// One server in a cluster configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Server {
    pub id: ServerId,
    pub address: String,
    pub role: Role,
}

/// Ordered list of cluster members. At most one uncommitted configuration
/// exists at a time; changes add or remove a single server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterConfig {
    pub servers: Vec<Server>,
}

impl ClusterConfig {
    #[must_use]
    pub fn new(servers: Vec<Server>) -> Self {
        Self { servers }
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.servers.iter().any(|s| s.id == id)
    }

    #[must_use]
    pub fn address_of(&self, id: &str) -> Option<&str> {
        self.servers
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.address.as_str())
    }

    pub fn voters(&self) -> impl Iterator<Item = &Server> {
        self.servers.iter().filter(|s| s.role == Role::Voter)
    }

    #[must_use]
    pub fn voter_count(&self) -> usize {
        self.voters().count()
    }

    /// Majority size over the voting members.
    #[must_use]
    pub fn quorum(&self) -> usize {
        self.voter_count() / 2 + 1
    }

    #[must_use]
    pub fn is_voter(&self, id: &str) -> bool {
        self.voters().any(|s| s.id == id)
    }

    /// New configuration with `server` added (replacing any same-id member).
    #[must_use]
    pub fn with_added(&self, server: Server) -> Self {
        let mut servers: Vec<Server> = self
            .servers
            .iter()
            .filter(|s| s.id != server.id)
            .cloned()
            .collect();
        servers.push(server);
        Self { servers }
    }

    /// New configuration with `id` removed.
    #[must_use]
    pub fn with_removed(&self, id: &str) -> Self {
        Self {
            servers: self.servers.iter().filter(|s| s.id != id).cloned().collect(),
        }
    }

    pub fn encode_into(&self, w: &mut WireWriter) {
        w.u32(self.servers.len() as u32);
        for s in &self.servers {
            w.string(&s.id);
            w.string(&s.address);
            w.u8(s.role as u8);
        }
    }

    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut w = WireWriter::raw();
        self.encode_into(&mut w);
        w.finish()
    }

    pub fn decode_from(r: &mut WireReader<'_>) -> Result<Self> {
        let count = r.u32()? as usize;
        let mut servers = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let id = r.string()?;
            let address = r.string()?;
            let role = Role::from_u8(r.u8()?)
                .ok_or_else(|| DriftError::Protocol("unknown server role".into()))?;
            servers.push(Server { id, address, role });
        }
        Ok(Self { servers })
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(buf);
        let config = Self::decode_from(&mut r)?;
        if !r.is_empty() {
            return Err(DriftError::Protocol("trailing bytes after config".into()));
        }
        Ok(config)
    }
}

/// Log entry kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryKind {
    /// A replicated state machine command.
    Normal = 0,
    /// Leader barrier appended at term start; never reaches the state machine.
    Noop = 1,
    /// A serialized [`ClusterConfig`], authoritative as soon as appended.
    Configuration = 2,
}

impl EntryKind {
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Normal),
            1 => Some(Self::Noop),
            2 => Some(Self::Configuration),
            _ => None,
        }
    }
}

/// One entry in the replicated log. Immutable once persisted; indexes are
/// gapless and start at 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub index: u64,
    pub term: u64,
    pub kind: EntryKind,
    pub payload: Bytes,
}

impl LogEntry {
    pub(crate) fn encode_into(&self, w: &mut WireWriter) {
        w.u64(self.index);
        w.u64(self.term);
        w.u8(self.kind as u8);
        w.bytes(&self.payload);
    }

    pub(crate) fn decode_from(r: &mut WireReader<'_>) -> Result<Self> {
        let index = r.u64()?;
        let term = r.u64()?;
        let kind = EntryKind::from_u8(r.u8()?)
            .ok_or_else(|| DriftError::Protocol("unknown entry kind".into()))?;
        let payload = r.bytes()?;
        Ok(Self {
            index,
            term,
            kind,
            payload,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteRequest {
    pub term: u64,
    pub candidate_id: ServerId,
    pub last_log_index: u64,
    pub last_log_term: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteResponse {
    pub term: u64,
    pub vote_granted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendEntriesRequest {
    pub term: u64,
    pub leader_id: ServerId,
    /// Advertised address of the leader, propagated into `NotLeader` hints.
    pub leader_addr: String,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
    pub leader_commit: u64,
    /// Empty for heartbeats.
    pub entries: Vec<LogEntry>,
}

/// `conflict_index`/`conflict_term` implement the fast-backoff hint: on a
/// prev mismatch the follower reports the first index of the conflicting
/// term so the leader can skip the whole term instead of probing entry by
/// entry. `conflict_index == 0` means no hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendEntriesResponse {
    pub term: u64,
    pub success: bool,
    /// Highest index known replicated on the follower (valid when `success`).
    pub match_index: u64,
    pub conflict_index: u64,
    pub conflict_term: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallSnapshotRequest {
    pub term: u64,
    pub leader_id: ServerId,
    /// Advertised address of the leader, propagated into `NotLeader` hints.
    pub leader_addr: String,
    pub snapshot_index: u64,
    pub snapshot_term: u64,
    pub chunk_offset: u64,
    pub data: Bytes,
    pub done: bool,
    /// Configuration captured at `snapshot_index`.
    pub config: ClusterConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallSnapshotResponse {
    pub term: u64,
}

const TAG_VOTE_REQ: u8 = 1;
const TAG_VOTE_RESP: u8 = 2;
const TAG_APPEND_REQ: u8 = 3;
const TAG_APPEND_RESP: u8 = 4;
const TAG_SNAP_REQ: u8 = 5;
const TAG_SNAP_RESP: u8 = 6;

/// All consensus RPC messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    VoteRequest(VoteRequest),
    VoteResponse(VoteResponse),
    AppendRequest(AppendEntriesRequest),
    AppendResponse(AppendEntriesResponse),
    SnapshotRequest(InstallSnapshotRequest),
    SnapshotResponse(InstallSnapshotResponse),
}

impl Message {
    /// Encodes the message as a complete frame, length prefix included.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        match self {
            Message::VoteRequest(req) => {
                let mut w = WireWriter::new(TAG_VOTE_REQ);
                w.u64(req.term);
                w.string(&req.candidate_id);
                w.u64(req.last_log_index);
                w.u64(req.last_log_term);
                w.finish()
            }
            Message::VoteResponse(resp) => {
                let mut w = WireWriter::new(TAG_VOTE_RESP);
                w.u64(resp.term);
                w.u8(u8::from(resp.vote_granted));
                w.finish()
            }
            Message::AppendRequest(req) => {
                let mut w = WireWriter::new(TAG_APPEND_REQ);
                w.u64(req.term);
                w.string(&req.leader_id);
                w.string(&req.leader_addr);
                w.u64(req.prev_log_index);
                w.u64(req.prev_log_term);
                w.u64(req.leader_commit);
                w.u32(req.entries.len() as u32);
                for entry in &req.entries {
                    entry.encode_into(&mut w);
                }
                w.finish()
            }
            Message::AppendResponse(resp) => {
                let mut w = WireWriter::new(TAG_APPEND_RESP);
                w.u64(resp.term);
                w.u8(u8::from(resp.success));
                w.u64(resp.match_index);
                w.u64(resp.conflict_index);
                w.u64(resp.conflict_term);
                w.finish()
            }
            Message::SnapshotRequest(req) => {
                let mut w = WireWriter::new(TAG_SNAP_REQ);
                w.u64(req.term);
                w.string(&req.leader_id);
                w.string(&req.leader_addr);
                w.u64(req.snapshot_index);
                w.u64(req.snapshot_term);
                w.u64(req.chunk_offset);
                w.bytes(&req.data);
                w.u8(u8::from(req.done));
                req.config.encode_into(&mut w);
                w.finish()
            }
            Message::SnapshotResponse(resp) => {
                let mut w = WireWriter::new(TAG_SNAP_RESP);
                w.u64(resp.term);
                w.finish()
            }
        }
    }

    /// Decodes one frame body (tag byte included, length prefix excluded).
    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(body);
        let tag = r.u8()?;
        let msg = match tag {
            TAG_VOTE_REQ => Message::VoteRequest(VoteRequest {
                term: r.u64()?,
                candidate_id: r.string()?,
                last_log_index: r.u64()?,
                last_log_term: r.u64()?,
            }),
            TAG_VOTE_RESP => Message::VoteResponse(VoteResponse {
                term: r.u64()?,
                vote_granted: r.u8()? != 0,
            }),
            TAG_APPEND_REQ => {
                let term = r.u64()?;
                let leader_id = r.string()?;
                let leader_addr = r.string()?;
                let prev_log_index = r.u64()?;
                let prev_log_term = r.u64()?;
                let leader_commit = r.u64()?;
                let count = r.u32()? as usize;
                let mut entries = Vec::with_capacity(count.min(4096));
                for _ in 0..count {
                    entries.push(LogEntry::decode_from(&mut r)?);
                }
                Message::AppendRequest(AppendEntriesRequest {
                    term,
                    leader_id,
                    leader_addr,
                    prev_log_index,
                    prev_log_term,
                    leader_commit,
                    entries,
                })
            }
            TAG_APPEND_RESP => Message::AppendResponse(AppendEntriesResponse {
                term: r.u64()?,
                success: r.u8()? != 0,
                match_index: r.u64()?,
                conflict_index: r.u64()?,
                conflict_term: r.u64()?,
            }),
            TAG_SNAP_REQ => {
                let term = r.u64()?;
                let leader_id = r.string()?;
                let leader_addr = r.string()?;
                let snapshot_index = r.u64()?;
                let snapshot_term = r.u64()?;
                let chunk_offset = r.u64()?;
                let data = r.bytes()?;
                let done = r.u8()? != 0;
                let config = ClusterConfig::decode_from(&mut r)?;
                Message::SnapshotRequest(InstallSnapshotRequest {
                    term,
                    leader_id,
                    leader_addr,
                    snapshot_index,
                    snapshot_term,
                    chunk_offset,
                    data,
                    done,
                    config,
                })
            }
            TAG_SNAP_RESP => Message::SnapshotResponse(InstallSnapshotResponse { term: r.u64()? }),
            other => {
                return Err(DriftError::Protocol(format!(
                    "unknown consensus message tag {other:#04x}"
                )));
            }
        };
        if !r.is_empty() {
            return Err(DriftError::Protocol("trailing bytes after message".into()));
        }
        Ok(msg)
    }

    /// The term the sender observed, used for step-down checks.
    #[must_use]
    pub fn term(&self) -> u64 {
        match self {
            Message::VoteRequest(m) => m.term,
            Message::VoteResponse(m) => m.term,
            Message::AppendRequest(m) => m.term,
            Message::AppendResponse(m) => m.term,
            Message::SnapshotRequest(m) => m.term,
            Message::SnapshotResponse(m) => m.term,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use dft_core::FRAME_HEADER_SIZE;

    fn roundtrip(msg: Message) {
        let frame = msg.encode();
        let decoded = Message::decode(&frame[FRAME_HEADER_SIZE..]).unwrap();
        assert_eq!(decoded, msg);
    }

    fn sample_config() -> ClusterConfig {
        ClusterConfig::new(vec![
            Server {
                id: "n1".into(),
                address: "127.0.0.1:7001".into(),
                role: Role::Voter,
            },
            Server {
                id: "n2".into(),
                address: "127.0.0.1:7002".into(),
                role: Role::NonVoter,
            },
        ])
    }

    #[test]
    fn test_vote_roundtrip() {
        roundtrip(Message::VoteRequest(VoteRequest {
            term: 3,
            candidate_id: "n1".into(),
            last_log_index: 11,
            last_log_term: 2,
        }));
        roundtrip(Message::VoteResponse(VoteResponse {
            term: 3,
            vote_granted: true,
        }));
    }

    #[test]
    fn test_append_roundtrip() {
        roundtrip(Message::AppendRequest(AppendEntriesRequest {
            term: 5,
            leader_id: "n2".into(),
            leader_addr: "127.0.0.1:7002".into(),
            prev_log_index: 9,
            prev_log_term: 4,
            leader_commit: 8,
            entries: vec![
                LogEntry {
                    index: 10,
                    term: 5,
                    kind: EntryKind::Normal,
                    payload: Bytes::from_static(b"cmd"),
                },
                LogEntry {
                    index: 11,
                    term: 5,
                    kind: EntryKind::Noop,
                    payload: Bytes::new(),
                },
            ],
        }));
        roundtrip(Message::AppendResponse(AppendEntriesResponse {
            term: 5,
            success: false,
            match_index: 0,
            conflict_index: 7,
            conflict_term: 3,
        }));
    }

    #[test]
    fn test_snapshot_roundtrip() {
        roundtrip(Message::SnapshotRequest(InstallSnapshotRequest {
            term: 7,
            leader_id: "n1".into(),
            leader_addr: "127.0.0.1:7001".into(),
            snapshot_index: 100,
            snapshot_term: 6,
            chunk_offset: 4096,
            data: Bytes::from(vec![1u8; 512]),
            done: true,
            config: sample_config(),
        }));
        roundtrip(Message::SnapshotResponse(InstallSnapshotResponse { term: 7 }));
    }

    #[test]
    fn test_config_helpers() {
        let config = sample_config();
        assert_eq!(config.voter_count(), 1);
        assert_eq!(config.quorum(), 1);
        assert!(config.is_voter("n1"));
        assert!(!config.is_voter("n2"));
        assert_eq!(config.address_of("n2"), Some("127.0.0.1:7002"));

        let grown = config.with_added(Server {
            id: "n3".into(),
            address: "127.0.0.1:7003".into(),
            role: Role::Voter,
        });
        assert_eq!(grown.voter_count(), 2);
        assert_eq!(grown.quorum(), 2);

        let shrunk = grown.with_removed("n1");
        assert!(!shrunk.contains("n1"));
        assert_eq!(shrunk.quorum(), 1);
    }

    #[test]
    fn test_decode_rejects_unknown_tag() {
        assert!(Message::decode(&[0x99, 0, 0]).is_err());
    }

    #[test]
    fn test_decode_rejects_truncated_append() {
        let msg = Message::AppendRequest(AppendEntriesRequest {
            term: 1,
            leader_id: "n1".into(),
            leader_addr: "127.0.0.1:7001".into(),
            prev_log_index: 0,
            prev_log_term: 0,
            leader_commit: 0,
            entries: vec![LogEntry {
                index: 1,
                term: 1,
                kind: EntryKind::Normal,
                payload: Bytes::from_static(b"xyz"),
            }],
        });
        let frame = msg.encode();
        let body = &frame[FRAME_HEADER_SIZE..frame.len() - 2];
        assert!(Message::decode(body).is_err());
    }
}
