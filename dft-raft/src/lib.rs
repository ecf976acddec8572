#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![allow(clippy::module_name_repetitions)]

mod codec;
mod log_store;
mod node;
mod peer;
mod raft;
mod snapshot;
mod stable;

pub use codec::{
    AppendEntriesRequest, AppendEntriesResponse, ClusterConfig, EntryKind, InstallSnapshotRequest,
    InstallSnapshotResponse, LogEntry, Message, Role, Server, ServerId, VoteRequest, VoteResponse,
};
pub use log_store::LogStore;
pub use node::{Node, NodeConfig, NodeStatus};
pub use peer::PeerConfig;
pub use snapshot::{SnapshotMeta, SnapshotSink, SnapshotStore};
pub use stable::StableStore;
