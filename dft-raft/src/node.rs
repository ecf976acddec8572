//! The node: façade over the consensus core, its stores, and its tasks.
//!
//! Concurrency topology:
//!
//! - **Consensus task** — owns the log, stable, and snapshot stores plus the
//!   [`RaftState`]; the only place that mutates any of them. Driven by a
//!   bounded command channel (RPCs, proposals, membership changes), internal
//!   event channels (peer replies, apply acknowledgements), and its own
//!   election/heartbeat timers.
//! - **Apply task** — the sole writer to the state machine. Receives
//!   committed entries in index order and acknowledges each application.
//! - **Peer tasks** — one per configured peer, one outstanding request each
//!   (see `peer.rs`).
//! - **RPC listener** — accepts peer connections and forwards decoded
//!   messages into the command channel, so the core stays single-consumer.
//!
//! Reads are served directly from the shared state machine; writes are
//! linearized through the log and complete once applied, so a caller that
//! saw `put` succeed observes its own write on the leader.

use crate::codec::{
    AppendEntriesRequest, AppendEntriesResponse, ClusterConfig, EntryKind, InstallSnapshotRequest,
    InstallSnapshotResponse, LogEntry, Message, Role, Server, ServerId, VoteRequest, VoteResponse,
};
use crate::log_store::LogStore;
use crate::peer::{self, PeerConfig, PeerEvent, PeerHandle};
use crate::raft::{random_election_timeout, RaftRole, RaftState};
use crate::snapshot::SnapshotStore;
use crate::stable::StableStore;
use bytes::Bytes;
use dft_core::{Command, DriftError, MetaEntry, Result};
use dft_store::StateMachine;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Max entries shipped in one AppendEntries batch.
const APPEND_BATCH: u64 = 64;
/// Snapshot chunk size for InstallSnapshot.
const SNAPSHOT_CHUNK: usize = 256 * 1024;
/// Capacity of the command channel feeding the consensus task.
const COMMAND_QUEUE: usize = 256;
/// Capacity of the channel feeding the apply task.
const APPLY_QUEUE: usize = 1024;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Unique server ID.
    pub id: String,
    /// Bind address for consensus RPCs.
    pub raft_bind: String,
    /// Address peers use to reach this node. Defaults to `raft_bind`.
    pub raft_advertise: Option<String>,
    /// Root for the log, stable, and snapshot stores.
    pub data_dir: PathBuf,
    /// Initial peer raft addresses, used only when bootstrapping.
    pub peers: Vec<String>,
    /// Seed the initial configuration (self + peers) on first start.
    pub bootstrap: bool,
    /// Election timeout lower bound; the timer is randomized in [T, 2T).
    pub election_timeout: Duration,
    /// Leader heartbeat cadence.
    pub heartbeat_interval: Duration,
    /// Client-facing write deadline.
    pub apply_timeout: Duration,
    /// Log length that triggers a snapshot.
    pub snapshot_threshold: u64,
    pub peer: PeerConfig,
}

impl NodeConfig {
    #[must_use]
    pub fn new(id: impl Into<String>, raft_bind: impl Into<String>, data_dir: PathBuf) -> Self {
        Self {
            id: id.into(),
            raft_bind: raft_bind.into(),
            raft_advertise: None,
            data_dir,
            peers: Vec::new(),
            bootstrap: false,
            election_timeout: Duration::from_millis(250),
            heartbeat_interval: Duration::from_millis(25),
            apply_timeout: Duration::from_secs(5),
            snapshot_threshold: 8192,
            peer: PeerConfig::default(),
        }
    }
}

/// Snapshot of the node's consensus position, published on a watch channel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeStatus {
    pub term: u64,
    pub is_leader: bool,
    pub leader_id: Option<String>,
    pub leader_addr: Option<String>,
    pub commit_index: u64,
    pub last_applied: u64,
}

enum CoreMsg {
    Rpc {
        msg: Message,
        reply: oneshot::Sender<Message>,
    },
    Propose {
        payload: Bytes,
        reply: oneshot::Sender<Result<()>>,
    },
    AddPeer {
        id: String,
        address: String,
        reply: oneshot::Sender<Result<()>>,
    },
    RemovePeer {
        id: String,
        reply: oneshot::Sender<Result<()>>,
    },
}

struct AppliedEvent {
    index: u64,
    term: u64,
    result: std::result::Result<(), String>,
}

enum ApplyJob {
    Entry(LogEntry),
    Restore { index: u64, term: u64, image: Bytes },
    Snapshot { reply: oneshot::Sender<(u64, Bytes)> },
}

/// A running DRIFT node. Owns every store and task for its lifetime;
/// external consumers only see this façade.
pub struct Node {
    id: String,
    advertise: String,
    machine: Arc<StateMachine>,
    core_tx: mpsc::Sender<CoreMsg>,
    status_rx: watch::Receiver<NodeStatus>,
    apply_timeout: Duration,
    shutdown_tx: broadcast::Sender<()>,
    core_handle: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl Node {
    /// Opens the stores, recovers persisted state, and starts all tasks.
    pub async fn start(config: NodeConfig) -> Result<Arc<Self>> {
        let advertise = config
            .raft_advertise
            .clone()
            .unwrap_or_else(|| config.raft_bind.clone());

        let stable = StableStore::open(&config.data_dir.join("stable"))?;
        let mut log = LogStore::open(&config.data_dir.join("log"))?;
        let snaps = SnapshotStore::open(&config.data_dir.join("snapshots"))?;

        let current_term = stable.current_term()?;
        let voted_for = stable.voted_for()?;
        let mut state = RaftState::new(config.id.clone(), current_term, voted_for);

        let machine = Arc::new(StateMachine::new());
        let (apply_tx, apply_rx) = mpsc::channel(APPLY_QUEUE);
        let (applied_tx, applied_rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (core_tx, core_rx) = mpsc::channel(COMMAND_QUEUE);
        let (shutdown_tx, _) = broadcast::channel(4);

        // Recover snapshot state first, then replay configuration entries
        // the log holds beyond it (configs are authoritative on append).
        let mut snapshot_index = 0;
        let mut snapshot_term = 0;
        let mut restore_job = None;
        if let Some((meta, image)) = snaps.load_latest()? {
            snapshot_index = meta.index;
            snapshot_term = meta.term;
            state.set_config(meta.config.clone(), meta.index + 1);
            state.commit_index = meta.index;
            restore_job = Some(ApplyJob::Restore {
                index: meta.index,
                term: meta.term,
                image: Bytes::from(image),
            });
        }
        if !log.is_empty() {
            let from = log.first_index().max(snapshot_index + 1);
            for index in from..=log.last_index() {
                if let Some(entry) = log.entry(index)? {
                    if entry.kind == EntryKind::Configuration {
                        state.set_config(ClusterConfig::decode(&entry.payload)?, index + 1);
                    }
                }
            }
        }

        // Seed the initial configuration on a fresh bootstrap node.
        if config.bootstrap
            && log.is_empty()
            && snapshot_index == 0
            && state.config.servers.is_empty()
        {
            let mut servers: Vec<Server> = config
                .peers
                .iter()
                .filter(|p| !p.is_empty() && **p != advertise)
                .map(|p| Server {
                    id: p.clone(),
                    address: p.clone(),
                    role: Role::Voter,
                })
                .collect();
            servers.push(Server {
                id: config.id.clone(),
                address: advertise.clone(),
                role: Role::Voter,
            });
            let bootstrap_config = ClusterConfig::new(servers);

            if state.current_term == 0 {
                state.current_term = 1;
                stable.set_current_term(1)?;
            }
            let entry = LogEntry {
                index: 1,
                term: state.current_term,
                kind: EntryKind::Configuration,
                payload: bootstrap_config.encode(),
            };
            log.append(&[entry])?;
            state.set_config(bootstrap_config, 2);
            info!(
                target: "drift::node",
                id = %config.id,
                servers = state.config.servers.len(),
                "Bootstrapped initial configuration"
            );
        }

        let listener = TcpListener::bind(&config.raft_bind).await?;
        info!(
            target: "drift::node",
            id = %config.id,
            bind = %config.raft_bind,
            advertise = %advertise,
            "Consensus listener bound"
        );

        let (status_tx, status_rx) = watch::channel(NodeStatus::default());

        tokio::spawn(run_apply(Arc::clone(&machine), apply_rx, applied_tx));
        if let Some(job) = restore_job {
            apply_tx
                .send(job)
                .await
                .map_err(|_| DriftError::ChannelClosed("apply queue"))?;
        }

        tokio::spawn(run_listener(
            listener,
            core_tx.clone(),
            shutdown_tx.subscribe(),
        ));

        let mut core = Core {
            id: config.id.clone(),
            advertise: advertise.clone(),
            state,
            log,
            stable,
            snaps,
            snapshot_index,
            snapshot_term,
            last_index: 0,
            last_term: 0,
            dispatched: snapshot_index,
            last_applied: snapshot_index,
            last_leader_contact: None,
            election_base: config.election_timeout,
            heartbeat: config.heartbeat_interval,
            snapshot_threshold: config.snapshot_threshold,
            peer_cfg: config.peer.clone(),
            apply_tx,
            peer_tx,
            peers: HashMap::new(),
            pending: BTreeMap::new(),
            pending_restore: None,
            snap_install: None,
            snap_cache: None,
            status_tx,
            shutdown_tx: shutdown_tx.clone(),
        };
        core.refresh_log_position()?;
        core.sync_peers();
        core.publish_status();

        let core_handle = tokio::spawn(core.run(
            core_rx,
            applied_rx,
            peer_rx,
            shutdown_tx.subscribe(),
        ));

        Ok(Arc::new(Self {
            id: config.id,
            advertise,
            machine,
            core_tx,
            status_rx,
            apply_timeout: config.apply_timeout,
            shutdown_tx,
            core_handle: Mutex::new(Some(core_handle)),
        }))
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The address peers and redirected clients use to reach this node.
    #[must_use]
    pub fn advertise_addr(&self) -> &str {
        &self.advertise
    }

    #[must_use]
    pub fn status(&self) -> NodeStatus {
        self.status_rx.borrow().clone()
    }

    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.status_rx.borrow().is_leader
    }

    /// Current leader address, if known.
    #[must_use]
    pub fn leader(&self) -> Option<String> {
        self.status_rx.borrow().leader_addr.clone()
    }

    /// Replicates a `Put` command. Leader only.
    pub async fn put(&self, key: &[u8], data: Bytes) -> Result<()> {
        let cmd = Command::Put {
            key: Bytes::copy_from_slice(key),
            data,
        };
        self.propose(cmd.encode()).await
    }

    /// Replicates a `Delete` command. Leader only.
    pub async fn delete(&self, key: &[u8]) -> Result<()> {
        let cmd = Command::Delete {
            key: Bytes::copy_from_slice(key),
        };
        self.propose(cmd.encode()).await
    }

    /// Replicates a metadata merge. Leader only.
    pub async fn sync_meta(&self, entry: MetaEntry) -> Result<()> {
        if entry.path.is_empty() {
            return Err(DriftError::InvalidArgument("empty metadata path".into()));
        }
        self.propose(Command::Meta(entry).encode()).await
    }

    /// Local read; any replica serves it.
    pub fn get(&self, key: &[u8]) -> Result<Bytes> {
        self.machine.get(key).ok_or(DriftError::NotFound)
    }

    /// Local metadata read; tombstones read as absent.
    pub fn meta_get(&self, path: &str) -> Result<MetaEntry> {
        self.machine.meta_get(path).ok_or(DriftError::NotFound)
    }

    /// Current version for `path`, tombstones included. 0 when unknown.
    #[must_use]
    pub fn meta_version(&self, path: &str) -> u64 {
        self.machine.meta_version(path)
    }

    #[must_use]
    pub fn meta_list(&self) -> Vec<MetaEntry> {
        self.machine.meta_list()
    }

    /// Every live (key, value) pair on this replica.
    #[must_use]
    pub fn report(&self) -> Vec<(Bytes, Bytes)> {
        self.machine.report()
    }

    /// Adds one server to the configuration. Leader only.
    pub async fn add_peer(&self, id: &str, address: &str) -> Result<()> {
        if id.is_empty() || address.is_empty() {
            return Err(DriftError::InvalidArgument(
                "peer id and address are required".into(),
            ));
        }
        let (tx, rx) = oneshot::channel();
        self.send_core(CoreMsg::AddPeer {
            id: id.to_string(),
            address: address.to_string(),
            reply: tx,
        })
        .await?;
        self.await_reply(rx).await
    }

    /// Removes one server from the configuration. Leader only.
    pub async fn remove_peer(&self, id: &str) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send_core(CoreMsg::RemovePeer {
            id: id.to_string(),
            reply: tx,
        })
        .await?;
        self.await_reply(rx).await
    }

    /// Waits until some node is leader and returns its address; this node's
    /// own address when it wins.
    pub async fn wait_for_leader(&self, deadline: Duration) -> Result<String> {
        let mut rx = self.status_rx.clone();
        let wait = async {
            loop {
                {
                    let status = rx.borrow();
                    if status.is_leader {
                        return Ok(self.advertise.clone());
                    }
                    if let Some(addr) = &status.leader_addr {
                        return Ok(addr.clone());
                    }
                }
                if rx.changed().await.is_err() {
                    return Err(DriftError::ClusterUnavailable);
                }
            }
        };
        tokio::time::timeout(deadline, wait)
            .await
            .map_err(|_| DriftError::Timeout)?
    }

    /// Stops all tasks. Idempotent.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let handle = self.take_core_handle();
        if let Some(handle) = handle {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(target: "drift::node", error = %err, "Consensus task exited with error");
                }
                Err(err) => {
                    warn!(target: "drift::node", error = %err, "Consensus task panicked");
                }
            }
        }
    }

    /// Resolves when the consensus task stops; an error means a fatal
    /// storage failure took the node down.
    pub async fn wait(&self) -> Result<()> {
        match self.take_core_handle() {
            Some(handle) => handle
                .await
                .map_err(|e| DriftError::Internal(format!("consensus task panicked: {e}")))?,
            None => Ok(()),
        }
    }

    fn take_core_handle(&self) -> Option<JoinHandle<Result<()>>> {
        let mut guard = match self.core_handle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.take()
    }

    async fn propose(&self, payload: Bytes) -> Result<()> {
        // Fast rejection off the cached status; the core re-checks.
        {
            let status = self.status_rx.borrow();
            if !status.is_leader {
                return Err(DriftError::NotLeader {
                    hint: status.leader_addr.clone(),
                });
            }
        }
        let (tx, rx) = oneshot::channel();
        self.send_core(CoreMsg::Propose { payload, reply: tx })
            .await?;
        self.await_reply(rx).await
    }

    async fn send_core(&self, msg: CoreMsg) -> Result<()> {
        self.core_tx
            .send(msg)
            .await
            .map_err(|_| DriftError::ClusterUnavailable)
    }

    async fn await_reply(&self, rx: oneshot::Receiver<Result<()>>) -> Result<()> {
        match tokio::time::timeout(self.apply_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(DriftError::ClusterUnavailable),
            Err(_) => Err(DriftError::Timeout),
        }
    }
}

/// The apply loop: sole writer to the state machine.
async fn run_apply(
    machine: Arc<StateMachine>,
    mut jobs: mpsc::Receiver<ApplyJob>,
    events: mpsc::UnboundedSender<AppliedEvent>,
) {
    let mut last_applied = 0u64;
    while let Some(job) = jobs.recv().await {
        match job {
            ApplyJob::Entry(entry) => {
                let result = match entry.kind {
                    EntryKind::Normal => machine.apply(&entry.payload).map_err(|e| e.to_string()),
                    // Noop and configuration entries advance the applied
                    // cursor without touching the maps.
                    EntryKind::Noop | EntryKind::Configuration => Ok(()),
                };
                if let Err(err) = &result {
                    warn!(
                        target: "drift::apply",
                        index = entry.index,
                        error = %err,
                        "Command application failed"
                    );
                }
                last_applied = entry.index;
                if events
                    .send(AppliedEvent {
                        index: entry.index,
                        term: entry.term,
                        result,
                    })
                    .is_err()
                {
                    break;
                }
            }
            ApplyJob::Restore { index, term, image } => match machine.restore(&image) {
                Ok(()) => {
                    info!(target: "drift::apply", index, "State machine restored from snapshot");
                    last_applied = index;
                    if events
                        .send(AppliedEvent {
                            index,
                            term,
                            result: Ok(()),
                        })
                        .is_err()
                    {
                        break;
                    }
                }
                Err(err) => {
                    error!(target: "drift::apply", error = %err, "Snapshot restore failed");
                }
            },
            ApplyJob::Snapshot { reply } => {
                let image = machine.snapshot_bytes();
                let _ = reply.send((last_applied, image));
            }
        }
    }
    trace!(target: "drift::apply", "Apply task stopped");
}

/// Accepts peer connections and forwards RPCs into the command channel.
async fn run_listener(
    listener: TcpListener,
    core_tx: mpsc::Sender<CoreMsg>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let conn = tokio::select! {
            _ = shutdown.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((conn, _)) => conn,
                Err(err) => {
                    warn!(target: "drift::rpc", error = %err, "Accept failed");
                    continue;
                }
            },
        };
        let _ = conn.set_nodelay(true);
        tokio::spawn(run_connection(conn, core_tx.clone()));
    }
}

async fn run_connection(mut conn: TcpStream, core_tx: mpsc::Sender<CoreMsg>) {
    loop {
        let body = match peer::read_frame(&mut conn).await {
            Ok(body) => body,
            Err(_) => break,
        };
        let msg = match Message::decode(&body) {
            Ok(msg) => msg,
            Err(err) => {
                debug!(target: "drift::rpc", error = %err, "Dropping undecodable frame");
                break;
            }
        };
        let (tx, rx) = oneshot::channel();
        if core_tx.send(CoreMsg::Rpc { msg, reply: tx }).await.is_err() {
            break;
        }
        let response = match rx.await {
            Ok(response) => response,
            Err(_) => break,
        };
        if peer::write_frame(&mut conn, &response.encode())
            .await
            .is_err()
        {
            break;
        }
    }
}

struct Core {
    id: ServerId,
    advertise: String,
    state: RaftState,
    log: LogStore,
    stable: StableStore,
    snaps: SnapshotStore,
    /// Last index/term covered by the newest durable snapshot.
    snapshot_index: u64,
    snapshot_term: u64,
    /// Cached log tail position (falls back to the snapshot when empty).
    last_index: u64,
    last_term: u64,
    /// Highest index handed to the apply task.
    dispatched: u64,
    /// Highest index the apply task has acknowledged.
    last_applied: u64,
    /// When this node last heard from a live leader.
    last_leader_contact: Option<std::time::Instant>,
    election_base: Duration,
    heartbeat: Duration,
    snapshot_threshold: u64,
    peer_cfg: PeerConfig,
    apply_tx: mpsc::Sender<ApplyJob>,
    peer_tx: mpsc::UnboundedSender<PeerEvent>,
    peers: HashMap<ServerId, PeerHandle>,
    /// Waiters for proposals and configuration changes, keyed by log index.
    pending: BTreeMap<u64, (u64, oneshot::Sender<Result<()>>)>,
    /// Snapshot restore waiting for apply-queue capacity.
    pending_restore: Option<ApplyJob>,
    /// In-progress inbound snapshot: (index, term, buffered image).
    snap_install: Option<(u64, u64, Vec<u8>)>,
    /// Latest snapshot image, cached for outbound installs.
    snap_cache: Option<(u64, Bytes)>,
    status_tx: watch::Sender<NodeStatus>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Core {
    async fn run(
        mut self,
        mut msg_rx: mpsc::Receiver<CoreMsg>,
        mut applied_rx: mpsc::UnboundedReceiver<AppliedEvent>,
        mut peer_rx: mpsc::UnboundedReceiver<PeerEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let mut election_deadline = Instant::now() + random_election_timeout(self.election_base);
        let mut next_heartbeat = Instant::now() + self.heartbeat;
        let mut snapshot_rx: Option<oneshot::Receiver<(u64, Bytes)>> = None;

        let result = loop {
            // Kick off a snapshot once enough applied entries accumulate.
            if snapshot_rx.is_none() && self.should_snapshot() {
                let (tx, rx) = oneshot::channel();
                if self
                    .apply_tx
                    .try_send(ApplyJob::Snapshot { reply: tx })
                    .is_ok()
                {
                    snapshot_rx = Some(rx);
                }
            }

            let wake = if self.state.is_leader() {
                next_heartbeat
            } else {
                election_deadline
            };

            let step = tokio::select! {
                _ = shutdown.recv() => break Ok(()),
                Some(msg) = msg_rx.recv() => self.handle_msg(msg, &mut election_deadline),
                Some(event) = applied_rx.recv() => self.handle_applied(event),
                Some(event) = peer_rx.recv() => self.handle_peer_event(event, &mut election_deadline),
                snapshot = async {
                    match snapshot_rx.as_mut() {
                        Some(rx) => rx.await,
                        None => std::future::pending().await,
                    }
                } => {
                    snapshot_rx = None;
                    match snapshot {
                        Ok((applied, image)) => self.finish_snapshot(applied, image),
                        Err(_) => Ok(()),
                    }
                }
                _ = tokio::time::sleep_until(wake) => {
                    if self.state.is_leader() {
                        next_heartbeat = Instant::now() + self.heartbeat;
                        self.broadcast_heartbeats()
                    } else {
                        election_deadline =
                            Instant::now() + random_election_timeout(self.election_base);
                        self.start_election()
                    }
                }
            };

            if let Err(err) = step {
                break Err(err);
            }
        };

        if let Err(err) = &result {
            error!(
                target: "drift::node",
                id = %self.id,
                error = %err,
                "Fatal storage failure; node shutting down"
            );
        }
        self.fail_all_pending();
        self.state.become_follower(self.state.current_term);
        self.publish_status();
        let _ = self.shutdown_tx.send(());
        result.map_err(|err| match err {
            DriftError::StorageFatal(_) => err,
            other => DriftError::StorageFatal(other.to_string()),
        })
    }

    // === command handling ===

    fn handle_msg(&mut self, msg: CoreMsg, election_deadline: &mut Instant) -> Result<()> {
        match msg {
            CoreMsg::Rpc { msg, reply } => {
                let response = match msg {
                    Message::VoteRequest(req) => {
                        self.handle_vote_request(&req, election_deadline)?
                    }
                    Message::AppendRequest(req) => {
                        self.handle_append_request(&req, election_deadline)?
                    }
                    Message::SnapshotRequest(req) => {
                        self.handle_snapshot_request(&req, election_deadline)?
                    }
                    other => {
                        debug!(target: "drift::rpc", "Unexpected inbound message {other:?}");
                        Message::VoteResponse(VoteResponse {
                            term: self.state.current_term,
                            vote_granted: false,
                        })
                    }
                };
                let _ = reply.send(response);
                Ok(())
            }
            CoreMsg::Propose { payload, reply } => self.handle_propose(payload, reply),
            CoreMsg::AddPeer { id, address, reply } => {
                self.handle_config_change(ConfigChange::Add { id, address }, reply)
            }
            CoreMsg::RemovePeer { id, reply } => {
                self.handle_config_change(ConfigChange::Remove { id }, reply)
            }
        }
    }

    fn handle_applied(&mut self, event: AppliedEvent) -> Result<()> {
        self.last_applied = self.last_applied.max(event.index);
        if let Some((expected_term, reply)) = self.pending.remove(&event.index) {
            if expected_term == event.term {
                let _ = reply.send(event.result.map_err(DriftError::InvalidArgument));
            } else {
                // A different entry was committed at this index; the original
                // proposal was lost to a leadership change.
                let _ = reply.send(Err(DriftError::ClusterUnavailable));
            }
        }
        self.pump_apply()?;
        self.publish_status();
        Ok(())
    }

    fn handle_peer_event(
        &mut self,
        event: PeerEvent,
        election_deadline: &mut Instant,
    ) -> Result<()> {
        match event {
            PeerEvent::Reply { peer, msg } => self.handle_peer_reply(&peer, msg, election_deadline),
            PeerEvent::Unreachable { peer } => {
                // Restart any snapshot transfer; the chunk may not have
                // arrived.
                if let Some(progress) = self.state.progress.get_mut(&peer) {
                    progress.snapshot_offset = None;
                }
                Ok(())
            }
        }
    }

    fn handle_propose(&mut self, payload: Bytes, reply: oneshot::Sender<Result<()>>) -> Result<()> {
        if !self.state.is_leader() {
            let _ = reply.send(Err(DriftError::NotLeader {
                hint: self.state.leader_addr.clone(),
            }));
            return Ok(());
        }
        let index = self.last_index + 1;
        let term = self.state.current_term;
        let entry = LogEntry {
            index,
            term,
            kind: EntryKind::Normal,
            payload,
        };
        self.leader_append(entry)?;
        self.pending.insert(index, (term, reply));
        self.replicate_all();
        self.try_commit()
    }

    fn handle_config_change(
        &mut self,
        change: ConfigChange,
        reply: oneshot::Sender<Result<()>>,
    ) -> Result<()> {
        if !self.state.is_leader() {
            let _ = reply.send(Err(DriftError::NotLeader {
                hint: self.state.leader_addr.clone(),
            }));
            return Ok(());
        }
        // Joint-less membership: one uncommitted configuration at a time.
        if self.state.pending_config.is_some() {
            let _ = reply.send(Err(DriftError::InvalidArgument(
                "a configuration change is already in flight".into(),
            )));
            return Ok(());
        }
        let new_config = match change {
            ConfigChange::Add { id, address } => self.state.config.with_added(Server {
                id,
                address,
                role: Role::Voter,
            }),
            ConfigChange::Remove { id } => {
                if !self.state.config.contains(&id) {
                    let _ = reply.send(Err(DriftError::NotFound));
                    return Ok(());
                }
                self.state.config.with_removed(&id)
            }
        };

        let index = self.last_index + 1;
        let term = self.state.current_term;
        let entry = LogEntry {
            index,
            term,
            kind: EntryKind::Configuration,
            payload: new_config.encode(),
        };
        self.leader_append(entry)?;
        self.pending.insert(index, (term, reply));
        self.replicate_all();
        self.try_commit()
    }

    /// Durable append on the leader; adopts configuration entries
    /// immediately (authoritative on append, not commit).
    fn leader_append(&mut self, entry: LogEntry) -> Result<()> {
        let is_config = entry.kind == EntryKind::Configuration;
        let payload = entry.payload.clone();
        let index = entry.index;
        self.log.append(&[entry])?;
        self.last_index = index;
        self.last_term = self.state.current_term;
        if is_config {
            let config = ClusterConfig::decode(&payload)?;
            self.adopt_config(config, index);
            self.state.pending_config = Some(index);
        }
        Ok(())
    }

    // === inbound RPCs ===

    fn handle_vote_request(
        &mut self,
        req: &VoteRequest,
        election_deadline: &mut Instant,
    ) -> Result<Message> {
        // Leader stickiness: a server that recently heard from a live leader
        // refuses to be dragged into an election by a higher term. This keeps
        // removed or partitioned nodes from disrupting a healthy cluster.
        let leader_active = match self.state.role {
            RaftRole::Leader => true,
            _ => {
                self.state.leader_id.is_some()
                    && self
                        .last_leader_contact
                        .map(|at| at.elapsed() < self.election_base)
                        .unwrap_or(false)
            }
        };
        if req.term > self.state.current_term && leader_active {
            return Ok(Message::VoteResponse(VoteResponse {
                term: self.state.current_term,
                vote_granted: false,
            }));
        }

        if req.term > self.state.current_term {
            self.state.become_follower(req.term);
            self.persist_term()?;
            self.publish_status();
        }

        let mut granted = false;
        if req.term == self.state.current_term {
            let can_vote = match &self.state.voted_for {
                None => true,
                Some(candidate) => candidate == &req.candidate_id,
            };
            let log_ok = self.state.candidate_up_to_date(
                req.last_log_term,
                req.last_log_index,
                self.last_term,
                self.last_index,
            );
            if can_vote && log_ok {
                granted = true;
                self.state.voted_for = Some(req.candidate_id.clone());
                // The grant must be durable before the reply leaves.
                self.stable.set_voted_for(Some(&req.candidate_id))?;
                *election_deadline = Instant::now() + random_election_timeout(self.election_base);
            }
        }

        trace!(
            target: "drift::raft",
            id = %self.id,
            candidate = %req.candidate_id,
            term = req.term,
            granted,
            "Vote request"
        );
        Ok(Message::VoteResponse(VoteResponse {
            term: self.state.current_term,
            vote_granted: granted,
        }))
    }

    fn handle_append_request(
        &mut self,
        req: &AppendEntriesRequest,
        election_deadline: &mut Instant,
    ) -> Result<Message> {
        let mut resp = AppendEntriesResponse {
            term: self.state.current_term,
            success: false,
            match_index: 0,
            conflict_index: 0,
            conflict_term: 0,
        };
        if req.term < self.state.current_term {
            return Ok(Message::AppendResponse(resp));
        }
        if req.term > self.state.current_term || self.state.role != RaftRole::Follower {
            self.state.become_follower(req.term);
            self.persist_term()?;
        }
        self.state.leader_id = Some(req.leader_id.clone());
        self.state.leader_addr = Some(req.leader_addr.clone());
        self.last_leader_contact = Some(std::time::Instant::now());
        *election_deadline = Instant::now() + random_election_timeout(self.election_base);
        resp.term = self.state.current_term;

        // Log matching check on the entry preceding the batch.
        let prev_ok = if req.prev_log_index == 0 {
            true
        } else {
            self.term_at(req.prev_log_index)? == Some(req.prev_log_term)
        };
        if !prev_ok {
            match self.term_at(req.prev_log_index)? {
                Some(conflicting) => {
                    resp.conflict_term = conflicting;
                    resp.conflict_index =
                        self.first_index_of_term(conflicting, req.prev_log_index)?;
                }
                None => {
                    resp.conflict_index = self.last_index + 1;
                }
            }
            self.publish_status();
            return Ok(Message::AppendResponse(resp));
        }

        // Append new entries, truncating at the first conflict.
        let mut to_append: Vec<LogEntry> = Vec::new();
        for entry in &req.entries {
            if entry.index <= self.snapshot_index {
                continue;
            }
            if !to_append.is_empty() {
                to_append.push(entry.clone());
                continue;
            }
            match self.term_at(entry.index)? {
                Some(existing) if existing == entry.term => {}
                Some(_) => {
                    self.log.truncate_suffix(entry.index)?;
                    self.fail_pending_from(entry.index);
                    self.refresh_log_position()?;
                    to_append.push(entry.clone());
                }
                None => to_append.push(entry.clone()),
            }
        }
        if !to_append.is_empty() {
            self.log.append(&to_append)?;
            if let Some(last) = to_append.last() {
                self.last_index = last.index;
                self.last_term = last.term;
            }
            for entry in &to_append {
                if entry.kind == EntryKind::Configuration {
                    let config = ClusterConfig::decode(&entry.payload)?;
                    self.adopt_config(config, entry.index);
                }
            }
        }

        resp.success = true;
        resp.match_index = req.prev_log_index + req.entries.len() as u64;

        if req.leader_commit > self.state.commit_index {
            self.state.commit_index = req.leader_commit.min(self.last_index);
            self.pump_apply()?;
        }
        self.publish_status();
        Ok(Message::AppendResponse(resp))
    }

    fn handle_snapshot_request(
        &mut self,
        req: &InstallSnapshotRequest,
        election_deadline: &mut Instant,
    ) -> Result<Message> {
        if req.term < self.state.current_term {
            return Ok(Message::SnapshotResponse(InstallSnapshotResponse {
                term: self.state.current_term,
            }));
        }
        if req.term > self.state.current_term || self.state.role != RaftRole::Follower {
            self.state.become_follower(req.term);
            self.persist_term()?;
        }
        self.state.leader_id = Some(req.leader_id.clone());
        self.state.leader_addr = Some(req.leader_addr.clone());
        self.last_leader_contact = Some(std::time::Instant::now());
        *election_deadline = Instant::now() + random_election_timeout(self.election_base);

        if req.chunk_offset == 0 {
            self.snap_install = Some((req.snapshot_index, req.snapshot_term, Vec::new()));
        }
        let aligned = matches!(
            &self.snap_install,
            Some((index, _, buffer))
                if *index == req.snapshot_index && buffer.len() as u64 == req.chunk_offset
        );
        if aligned {
            if let Some((_, _, buffer)) = self.snap_install.as_mut() {
                buffer.extend_from_slice(&req.data);
            }
            if req.done {
                if let Some((index, term, image)) = self.snap_install.take() {
                    self.install_snapshot(index, term, image, req.config.clone())?;
                }
            }
        } else {
            // Out-of-order chunk: drop the transfer, the leader restarts
            // from offset zero.
            self.snap_install = None;
        }

        self.publish_status();
        Ok(Message::SnapshotResponse(InstallSnapshotResponse {
            term: self.state.current_term,
        }))
    }

    /// Installs a complete inbound snapshot: persist it, drop covered log
    /// entries, adopt its configuration, and restore the state machine.
    fn install_snapshot(
        &mut self,
        index: u64,
        term: u64,
        image: Vec<u8>,
        config: ClusterConfig,
    ) -> Result<()> {
        if index <= self.snapshot_index {
            return Ok(());
        }
        let image = Bytes::from(image);
        let mut sink = self.snaps.create(index, term, config.clone())?;
        sink.write(&image)?;
        sink.close()?;

        self.log.truncate_prefix(index)?;
        self.snapshot_index = index;
        self.snapshot_term = term;
        self.snap_cache = None;
        self.refresh_log_position()?;
        self.adopt_config(config, index);
        self.state.commit_index = self.state.commit_index.max(index);
        self.dispatched = self.dispatched.max(index);

        self.pending_restore = Some(ApplyJob::Restore { index, term, image });
        info!(
            target: "drift::node",
            id = %self.id,
            index,
            term,
            "Installed snapshot from leader"
        );
        self.pump_apply()
    }

    // === peer replies ===

    fn handle_peer_reply(
        &mut self,
        peer: &str,
        msg: Message,
        election_deadline: &mut Instant,
    ) -> Result<()> {
        if msg.term() > self.state.current_term {
            self.state.become_follower(msg.term());
            self.persist_term()?;
            *election_deadline = Instant::now() + random_election_timeout(self.election_base);
            self.publish_status();
            return Ok(());
        }
        match msg {
            Message::VoteResponse(resp) => self.handle_vote_response(peer, &resp),
            Message::AppendResponse(resp) => self.handle_append_response(peer, &resp),
            Message::SnapshotResponse(_) => self.handle_snapshot_response(peer),
            other => {
                debug!(target: "drift::raft", "Unexpected peer reply {other:?}");
                Ok(())
            }
        }
    }

    fn handle_vote_response(&mut self, peer: &str, resp: &VoteResponse) -> Result<()> {
        if self.state.role != RaftRole::Candidate || resp.term < self.state.current_term {
            return Ok(());
        }
        if resp.vote_granted && self.state.record_vote(peer) {
            self.become_leader()?;
        }
        Ok(())
    }

    fn handle_append_response(&mut self, peer: &str, resp: &AppendEntriesResponse) -> Result<()> {
        if !self.state.is_leader() {
            return Ok(());
        }
        let Some(current_next) = self.state.progress.get(peer).map(|p| p.next_index) else {
            return Ok(());
        };
        if resp.success {
            let mut behind = false;
            if let Some(progress) = self.state.progress.get_mut(peer) {
                if resp.match_index > progress.match_index {
                    progress.match_index = resp.match_index;
                }
                progress.next_index = progress.match_index + 1;
                behind = progress.next_index <= self.last_index;
            }
            self.try_commit()?;
            if behind {
                self.send_to_peer(peer)?;
            }
        } else {
            // Fast backoff: skip the follower's whole conflicting term.
            let next = if resp.conflict_term != 0 {
                match self.last_index_of_term(resp.conflict_term)? {
                    Some(index) => index + 1,
                    None => resp.conflict_index.max(1),
                }
            } else if resp.conflict_index != 0 {
                resp.conflict_index
            } else {
                current_next.saturating_sub(1).max(1)
            };
            if let Some(progress) = self.state.progress.get_mut(peer) {
                progress.next_index = next.max(1);
            }
            self.send_to_peer(peer)?;
        }
        Ok(())
    }

    fn handle_snapshot_response(&mut self, peer: &str) -> Result<()> {
        if !self.state.is_leader() {
            return Ok(());
        }
        let snapshot_index = self.snapshot_index;
        let image_len = match &self.snap_cache {
            Some((_, image)) => image.len() as u64,
            None => return Ok(()),
        };
        let offset = match self.state.progress.get(peer) {
            Some(progress) => progress.snapshot_offset,
            None => return Ok(()),
        };
        match offset {
            Some(sent) if sent >= image_len => {
                // Final chunk acknowledged; resume normal replication.
                if let Some(progress) = self.state.progress.get_mut(peer) {
                    progress.snapshot_offset = None;
                    progress.match_index = snapshot_index;
                    progress.next_index = snapshot_index + 1;
                }
                self.try_commit()?;
                self.send_to_peer(peer)?;
            }
            Some(_) => {
                self.send_to_peer(peer)?;
            }
            None => {}
        }
        Ok(())
    }

    // === elections and leadership ===

    fn start_election(&mut self) -> Result<()> {
        if !self.state.electable() {
            return Ok(());
        }
        self.state.become_candidate();
        self.persist_term()?;
        self.publish_status();

        // Single-voter cluster: the self-vote already is a majority.
        if self.state.votes.len() >= self.state.config.quorum() {
            return self.become_leader();
        }

        let request = Message::VoteRequest(VoteRequest {
            term: self.state.current_term,
            candidate_id: self.id.clone(),
            last_log_index: self.last_index,
            last_log_term: self.last_term,
        });
        for (peer, handle) in &self.peers {
            if !handle.try_send(request.clone()) {
                trace!(target: "drift::raft", peer = %peer, "Vote request deferred; peer busy");
            }
        }
        Ok(())
    }

    fn become_leader(&mut self) -> Result<()> {
        self.state.become_leader(self.last_index);
        self.state.leader_addr = Some(self.advertise.clone());

        // A no-op entry at the head of the term makes earlier-term entries
        // committable under the current-term commit rule.
        let entry = LogEntry {
            index: self.last_index + 1,
            term: self.state.current_term,
            kind: EntryKind::Noop,
            payload: Bytes::new(),
        };
        self.leader_append(entry)?;
        self.publish_status();
        self.replicate_all();
        self.try_commit()
    }

    fn broadcast_heartbeats(&mut self) -> Result<()> {
        let peers: Vec<ServerId> = self.state.progress.keys().cloned().collect();
        for peer in peers {
            let due = self
                .state
                .progress
                .get(&peer)
                .map(|p| p.last_sent.elapsed() >= self.heartbeat)
                .unwrap_or(false);
            if due {
                self.send_to_peer(&peer)?;
            }
        }
        Ok(())
    }

    fn replicate_all(&mut self) {
        let peers: Vec<ServerId> = self.state.progress.keys().cloned().collect();
        for peer in peers {
            if let Err(err) = self.send_to_peer(&peer) {
                warn!(
                    target: "drift::raft",
                    peer = %peer,
                    error = %err,
                    "Replication dispatch failed"
                );
            }
        }
    }

    /// Builds and hands the next request for `peer` to its task, if the peer
    /// is idle. Chooses InstallSnapshot when the needed entries are gone.
    fn send_to_peer(&mut self, peer: &str) -> Result<()> {
        if !self.state.is_leader() {
            return Ok(());
        }
        let Some(progress) = self.state.progress.get(peer) else {
            return Ok(());
        };
        let needs_snapshot = self.snapshot_index > 0
            && (progress.snapshot_offset.is_some() || progress.next_index <= self.snapshot_index);

        let mut sent_snapshot_end = None;
        let message = if needs_snapshot {
            let offset = progress.snapshot_offset.unwrap_or(0);
            let Some((meta_index, image)) = self.snapshot_image()? else {
                return Ok(());
            };
            let offset = if offset >= image.len() as u64 { 0 } else { offset };
            let end = (offset as usize + SNAPSHOT_CHUNK).min(image.len());
            let chunk = image.slice(offset as usize..end);
            sent_snapshot_end = Some(end as u64);
            Message::SnapshotRequest(InstallSnapshotRequest {
                term: self.state.current_term,
                leader_id: self.id.clone(),
                leader_addr: self.advertise.clone(),
                snapshot_index: meta_index,
                snapshot_term: self.snapshot_term,
                chunk_offset: offset,
                data: chunk,
                done: end == image.len(),
                config: self.state.config.clone(),
            })
        } else {
            let next = progress.next_index.max(1);
            let prev = next - 1;
            let prev_term = match self.term_at(prev)? {
                Some(term) => term,
                None => {
                    // The entry before `next` is compacted away; fall back
                    // to a snapshot on the next round.
                    if let Some(progress) = self.state.progress.get_mut(peer) {
                        progress.next_index = self.snapshot_index;
                    }
                    return Ok(());
                }
            };
            let upto = self.last_index.min(next + APPEND_BATCH - 1);
            let entries = if next <= upto {
                self.log.entries(next, upto)?
            } else {
                Vec::new()
            };
            Message::AppendRequest(AppendEntriesRequest {
                term: self.state.current_term,
                leader_id: self.id.clone(),
                leader_addr: self.advertise.clone(),
                prev_log_index: prev,
                prev_log_term: prev_term,
                leader_commit: self.state.commit_index,
                entries,
            })
        };

        let accepted = self
            .peers
            .get(peer)
            .map(|handle| handle.try_send(message))
            .unwrap_or(false);
        if accepted {
            if let Some(progress) = self.state.progress.get_mut(peer) {
                progress.last_sent = std::time::Instant::now();
                if let Some(end) = sent_snapshot_end {
                    progress.snapshot_offset = Some(end);
                }
            }
        }
        Ok(())
    }

    // === commit and apply ===

    fn try_commit(&mut self) -> Result<()> {
        if !self.state.is_leader() {
            return Ok(());
        }
        let candidate = self.state.majority_match(self.last_index);
        if candidate <= self.state.commit_index {
            return Ok(());
        }
        // Only current-term entries commit by counting replicas.
        if self.term_at(candidate)? != Some(self.state.current_term) {
            return Ok(());
        }
        self.state.commit_index = candidate;
        debug!(
            target: "drift::raft",
            id = %self.id,
            commit_index = candidate,
            "Commit index advanced"
        );

        if let Some(config_index) = self.state.pending_config {
            if config_index <= candidate {
                self.state.pending_config = None;
                // A leader that removed itself steps down once the change
                // commits.
                if !self.state.config.contains(&self.id) {
                    info!(
                        target: "drift::raft",
                        id = %self.id,
                        "Removed from configuration; stepping down"
                    );
                    self.state.become_follower(self.state.current_term);
                    self.sync_peers();
                }
            }
        }

        self.pump_apply()?;
        self.publish_status();
        self.replicate_all();
        Ok(())
    }

    /// Feeds committed-but-undispatched entries to the apply task without
    /// blocking; retried whenever capacity frees up.
    fn pump_apply(&mut self) -> Result<()> {
        if let Some(job) = self.pending_restore.take() {
            match self.apply_tx.try_send(job) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(job)) => {
                    self.pending_restore = Some(job);
                    return Ok(());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    return Err(DriftError::ChannelClosed("apply queue"));
                }
            }
        }
        while self.dispatched < self.state.commit_index {
            let next = self.dispatched + 1;
            let Some(entry) = self.log.entry(next)? else {
                // Covered by an installed snapshot.
                if self.snapshot_index >= next {
                    self.dispatched = self.snapshot_index;
                    continue;
                }
                return Err(DriftError::StorageFatal(format!(
                    "committed entry {next} missing from the log"
                )));
            };
            match self.apply_tx.try_send(ApplyJob::Entry(entry)) {
                Ok(()) => self.dispatched = next,
                Err(mpsc::error::TrySendError::Full(_)) => break,
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    return Err(DriftError::ChannelClosed("apply queue"));
                }
            }
        }
        Ok(())
    }

    fn should_snapshot(&self) -> bool {
        self.last_applied > self.snapshot_index && self.log.len() >= self.snapshot_threshold
    }

    /// Persists a freshly serialized image and compacts the log behind it.
    fn finish_snapshot(&mut self, applied: u64, image: Bytes) -> Result<()> {
        if applied <= self.snapshot_index {
            return Ok(());
        }
        let Some(term) = self.term_at(applied)? else {
            return Ok(());
        };
        let mut sink = self.snaps.create(applied, term, self.state.config.clone())?;
        sink.write(&image)?;
        sink.close()?;
        self.log.truncate_prefix(applied)?;
        self.snapshot_index = applied;
        self.snapshot_term = term;
        self.snap_cache = Some((applied, image));
        self.refresh_log_position()?;
        Ok(())
    }

    fn snapshot_image(&mut self) -> Result<Option<(u64, Bytes)>> {
        match &self.snap_cache {
            Some((index, image)) if *index == self.snapshot_index => {
                Ok(Some((*index, image.clone())))
            }
            _ => match self.snaps.load_latest()? {
                Some((meta, image)) => {
                    let image = Bytes::from(image);
                    self.snap_cache = Some((meta.index, image.clone()));
                    Ok(Some((meta.index, image)))
                }
                None => Ok(None),
            },
        }
    }

    // === helpers ===

    fn term_at(&self, index: u64) -> Result<Option<u64>> {
        if index == 0 {
            return Ok(Some(0));
        }
        if index == self.snapshot_index {
            return Ok(Some(self.snapshot_term));
        }
        self.log.term(index)
    }

    /// First index of `term` at or below `upto`, for conflict hints.
    fn first_index_of_term(&self, term: u64, upto: u64) -> Result<u64> {
        let floor = self.log.first_index().max(1);
        let mut index = upto;
        while index > floor {
            match self.log.term(index - 1)? {
                Some(t) if t == term => index -= 1,
                _ => break,
            }
        }
        Ok(index)
    }

    /// Last index holding `term`, scanning back from the tail.
    fn last_index_of_term(&self, term: u64) -> Result<Option<u64>> {
        let floor = self.log.first_index().max(1);
        let mut index = self.log.last_index();
        while index >= floor && index > 0 {
            match self.log.term(index)? {
                Some(t) if t == term => return Ok(Some(index)),
                Some(t) if t < term => return Ok(None),
                _ => index -= 1,
            }
        }
        Ok(None)
    }

    fn refresh_log_position(&mut self) -> Result<()> {
        if self.log.is_empty() {
            self.last_index = self.snapshot_index;
            self.last_term = self.snapshot_term;
        } else {
            self.last_index = self.log.last_index();
            self.last_term = self.log.term(self.last_index)?.unwrap_or(0);
        }
        Ok(())
    }

    fn persist_term(&mut self) -> Result<()> {
        self.stable.set_current_term(self.state.current_term)?;
        self.stable.set_voted_for(self.state.voted_for.as_deref())?;
        Ok(())
    }

    fn adopt_config(&mut self, config: ClusterConfig, at_index: u64) {
        info!(
            target: "drift::raft",
            id = %self.id,
            at_index,
            servers = config.servers.len(),
            "Adopting configuration"
        );
        self.state.set_config(config, self.last_index + 1);
        self.sync_peers();
    }

    /// Reconciles running peer tasks with the current configuration.
    fn sync_peers(&mut self) {
        let config = self.state.config.clone();
        self.peers
            .retain(|id, _| config.contains(id) && *id != self.id);
        for server in &config.servers {
            if server.id == self.id || self.peers.contains_key(&server.id) {
                continue;
            }
            let handle = peer::spawn_peer(
                server.id.clone(),
                server.address.clone(),
                self.peer_cfg.clone(),
                self.peer_tx.clone(),
                self.shutdown_tx.subscribe(),
            );
            self.peers.insert(server.id.clone(), handle);
        }
    }

    fn fail_pending_from(&mut self, index: u64) {
        let stale: Vec<u64> = self.pending.range(index..).map(|(i, _)| *i).collect();
        for index in stale {
            if let Some((_, reply)) = self.pending.remove(&index) {
                let _ = reply.send(Err(DriftError::ClusterUnavailable));
            }
        }
    }

    fn fail_all_pending(&mut self) {
        for (_, (_, reply)) in std::mem::take(&mut self.pending) {
            let _ = reply.send(Err(DriftError::ClusterUnavailable));
        }
    }

    fn publish_status(&self) {
        let status = NodeStatus {
            term: self.state.current_term,
            is_leader: self.state.is_leader(),
            leader_id: self.state.leader_id.clone(),
            leader_addr: self.state.leader_addr.clone(),
            commit_index: self.state.commit_index,
            last_applied: self.last_applied,
        };
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

enum ConfigChange {
    Add { id: String, address: String },
    Remove { id: String },
}
