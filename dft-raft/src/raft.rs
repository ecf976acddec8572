//! Pure consensus state, independent of I/O.
//!
//! [`RaftState`] tracks the role, term, vote, configuration, and per-peer
//! replication progress. The driving task in `node.rs` owns one instance and
//! mutates it in response to timers, RPCs, and peer replies; nothing here
//! touches disk or network, which keeps the election and commit rules
//! testable in isolation.

use crate::codec::{ClusterConfig, ServerId};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RaftRole {
    Follower,
    Candidate,
    Leader,
}

/// Leader-side view of one peer.
#[derive(Debug, Clone)]
pub(crate) struct Progress {
    /// Next log index to send.
    pub next_index: u64,
    /// Highest index known replicated on the peer.
    pub match_index: u64,
    /// Offset of the next snapshot chunk while an install is in flight.
    pub snapshot_offset: Option<u64>,
    /// When the last request was handed to the peer task.
    pub last_sent: Instant,
}

impl Progress {
    fn new(next_index: u64) -> Self {
        Self {
            next_index,
            match_index: 0,
            snapshot_offset: None,
            last_sent: Instant::now(),
        }
    }
}

pub(crate) struct RaftState {
    pub id: ServerId,
    pub role: RaftRole,
    pub current_term: u64,
    pub voted_for: Option<ServerId>,
    pub leader_id: Option<ServerId>,
    /// Advertised address of the current leader, carried on AppendEntries.
    pub leader_addr: Option<String>,
    pub config: ClusterConfig,
    pub commit_index: u64,
    /// Votes received in the current candidacy.
    pub votes: HashSet<ServerId>,
    /// Replication progress per peer (leader only).
    pub progress: HashMap<ServerId, Progress>,
    /// Index of an appended-but-uncommitted configuration entry, if any.
    pub pending_config: Option<u64>,
}

impl RaftState {
    pub fn new(id: ServerId, current_term: u64, voted_for: Option<ServerId>) -> Self {
        Self {
            id,
            role: RaftRole::Follower,
            current_term,
            voted_for,
            leader_id: None,
            leader_addr: None,
            config: ClusterConfig::default(),
            commit_index: 0,
            votes: HashSet::new(),
            progress: HashMap::new(),
            pending_config: None,
        }
    }

    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.role == RaftRole::Leader
    }

    /// Any → Follower on observing a higher term.
    pub fn become_follower(&mut self, term: u64) {
        let was_leader = self.role == RaftRole::Leader;
        self.role = RaftRole::Follower;
        if term > self.current_term {
            self.current_term = term;
            self.voted_for = None;
        }
        self.leader_id = None;
        self.leader_addr = None;
        self.votes.clear();
        self.progress.clear();
        self.pending_config = None;
        if was_leader {
            warn!(
                target: "drift::raft",
                id = %self.id,
                term,
                "Stepped down from leader"
            );
        }
    }

    /// Follower/Candidate → Candidate at a fresh term, voting for self.
    pub fn become_candidate(&mut self) {
        self.role = RaftRole::Candidate;
        self.current_term += 1;
        self.voted_for = Some(self.id.clone());
        self.leader_id = None;
        self.leader_addr = None;
        self.votes.clear();
        self.votes.insert(self.id.clone());
        info!(
            target: "drift::raft",
            id = %self.id,
            term = self.current_term,
            "Starting election"
        );
    }

    /// Candidate → Leader. Initializes per-peer progress at `last_index + 1`.
    pub fn become_leader(&mut self, last_index: u64) {
        self.role = RaftRole::Leader;
        self.leader_id = Some(self.id.clone());
        self.progress.clear();
        for server in &self.config.servers {
            if server.id != self.id {
                self.progress
                    .insert(server.id.clone(), Progress::new(last_index + 1));
            }
        }
        info!(
            target: "drift::raft",
            id = %self.id,
            term = self.current_term,
            last_index,
            peers = self.progress.len(),
            "Became leader"
        );
    }

    /// Records a granted vote; true once a voter majority is reached.
    pub fn record_vote(&mut self, voter: &str) -> bool {
        if self.role != RaftRole::Candidate {
            return false;
        }
        if self.config.is_voter(voter) {
            self.votes.insert(voter.to_string());
        }
        self.votes.len() >= self.config.quorum()
    }

    /// Pair-lex comparison from the election rule: a candidate is electable
    /// by this server only if its (last_log_term, last_log_index) is ≥ ours.
    #[must_use]
    pub fn candidate_up_to_date(
        &self,
        candidate_last_term: u64,
        candidate_last_index: u64,
        own_last_term: u64,
        own_last_index: u64,
    ) -> bool {
        if candidate_last_term != own_last_term {
            candidate_last_term > own_last_term
        } else {
            candidate_last_index >= own_last_index
        }
    }

    /// Highest index replicated on a voter majority, counting the leader's
    /// own log at `own_last_index`.
    #[must_use]
    pub fn majority_match(&self, own_last_index: u64) -> u64 {
        let mut matches: Vec<u64> = self
            .config
            .voters()
            .map(|server| {
                if server.id == self.id {
                    own_last_index
                } else {
                    self.progress
                        .get(&server.id)
                        .map_or(0, |p| p.match_index)
                }
            })
            .collect();
        if matches.is_empty() {
            return 0;
        }
        matches.sort_unstable_by(|a, b| b.cmp(a));
        let quorum = self.config.quorum();
        if matches.len() < quorum {
            0
        } else {
            matches[quorum - 1]
        }
    }

    /// Installs a new configuration, reconciling the progress map. `next` is
    /// the next_index given to newly added peers.
    pub fn set_config(&mut self, config: ClusterConfig, next: u64) {
        if self.role == RaftRole::Leader {
            self.progress
                .retain(|id, _| config.contains(id) && *id != self.id);
            for server in &config.servers {
                if server.id != self.id {
                    self.progress
                        .entry(server.id.clone())
                        .or_insert_with(|| Progress::new(next));
                }
            }
        }
        self.config = config;
    }

    /// Whether this server may start an election at all.
    #[must_use]
    pub fn electable(&self) -> bool {
        self.config.is_voter(&self.id)
    }
}

/// Randomized election timeout in `[base, 2 * base)`.
///
/// Seeds from a hashed clock sample rather than an RNG dependency; spread,
/// not unpredictability, is what matters here.
pub(crate) fn random_election_timeout(base: Duration) -> Duration {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::time::SystemTime::now().hash(&mut hasher);
    let jitter = hasher.finish() % base.as_millis().max(1) as u64;
    base + Duration::from_millis(jitter)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::codec::{Role, Server};

    fn three_node_config() -> ClusterConfig {
        ClusterConfig::new(
            (1..=3)
                .map(|i| Server {
                    id: format!("n{i}"),
                    address: format!("127.0.0.1:700{i}"),
                    role: Role::Voter,
                })
                .collect(),
        )
    }

    fn state() -> RaftState {
        let mut s = RaftState::new("n1".into(), 0, None);
        s.set_config(three_node_config(), 1);
        s
    }

    #[test]
    fn test_election_flow() {
        let mut s = state();
        s.become_candidate();
        assert_eq!(s.current_term, 1);
        assert_eq!(s.voted_for.as_deref(), Some("n1"));
        // The self vote alone is below quorum in a three-node cluster.
        assert!(!s.record_vote("n1"));
        assert!(s.record_vote("n2"));

        s.become_leader(5);
        assert!(s.is_leader());
        assert_eq!(s.progress.len(), 2);
        assert_eq!(s.progress.get("n2").unwrap().next_index, 6);
    }

    #[test]
    fn test_votes_from_nonvoters_do_not_count() {
        let mut s = state();
        let mut config = three_node_config();
        config.servers[2].role = Role::NonVoter;
        s.set_config(config, 1);

        s.become_candidate();
        assert!(!s.record_vote("n3"));
        assert!(s.record_vote("n2")); // two voters, quorum 2
    }

    #[test]
    fn test_become_follower_clears_leader_state() {
        let mut s = state();
        s.become_candidate();
        s.record_vote("n2");
        s.become_leader(0);

        s.become_follower(7);
        assert!(!s.is_leader());
        assert_eq!(s.current_term, 7);
        assert_eq!(s.voted_for, None);
        assert!(s.progress.is_empty());
    }

    #[test]
    fn test_same_term_follower_keeps_vote() {
        let mut s = state();
        s.current_term = 3;
        s.voted_for = Some("n2".into());
        s.become_follower(3);
        assert_eq!(s.voted_for.as_deref(), Some("n2"));
    }

    #[test]
    fn test_candidate_up_to_date_pair_lex() {
        let s = state();
        assert!(s.candidate_up_to_date(2, 1, 1, 9)); // higher term wins
        assert!(!s.candidate_up_to_date(1, 9, 2, 1)); // lower term loses
        assert!(s.candidate_up_to_date(2, 5, 2, 5)); // equal is enough
        assert!(!s.candidate_up_to_date(2, 4, 2, 5)); // shorter log loses
    }

    #[test]
    fn test_majority_match() {
        let mut s = state();
        s.become_candidate();
        s.record_vote("n2");
        s.become_leader(10);

        // No follower acks yet: only the leader holds index 10.
        assert_eq!(s.majority_match(10), 0);

        s.progress.get_mut("n2").unwrap().match_index = 7;
        assert_eq!(s.majority_match(10), 7);

        s.progress.get_mut("n3").unwrap().match_index = 9;
        assert_eq!(s.majority_match(10), 9);
    }

    #[test]
    fn test_set_config_reconciles_progress() {
        let mut s = state();
        s.become_candidate();
        s.record_vote("n2");
        s.become_leader(4);

        let grown = s.config.with_added(Server {
            id: "n4".into(),
            address: "127.0.0.1:7004".into(),
            role: Role::Voter,
        });
        s.set_config(grown, 5);
        assert_eq!(s.progress.get("n4").unwrap().next_index, 5);

        let shrunk = s.config.with_removed("n2");
        s.set_config(shrunk, 5);
        assert!(!s.progress.contains_key("n2"));
    }

    #[test]
    fn test_empty_config_not_electable() {
        let s = RaftState::new("n1".into(), 0, None);
        assert!(!s.electable());
    }

    #[test]
    fn test_random_election_timeout_range() {
        let base = Duration::from_millis(250);
        for _ in 0..32 {
            let t = random_election_timeout(base);
            assert!(t >= base);
            assert!(t < base * 2);
        }
    }
}
