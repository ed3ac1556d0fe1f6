//! The per-node Raft state machine (§4.8): persistent state (term,
//! voted-for, log), volatile state (role, commit/apply indices, per-peer
//! next/match index), and the election/heartbeat timers. Grounded in
//! `include/dkv_raft.h`'s `RaftNode` fields and `src/dkv_raft.cpp`'s
//! election/heartbeat loop shape.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::error::{CResult, Error};
use crate::raft::rpc::{
    AppendEntriesRequest, AppendEntriesResponse, RequestVoteRequest, RequestVoteResponse,
};
use crate::raft::{NodeId, RaftLog, Term};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaftRole {
    Follower,
    Candidate,
    Leader,
}

/// 150-300ms, randomized per-node so followers don't all time out
/// simultaneously. spec.md explicitly overrides the C++ original's fixed
/// 500ms timeout (DESIGN.md Open Question decision).
const ELECTION_TIMEOUT_MIN_MS: u64 = 150;
const ELECTION_TIMEOUT_MAX_MS: u64 = 300;
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);

pub struct RaftNode {
    pub id: NodeId,
    peers: Vec<NodeId>,

    current_term: Term,
    voted_for: Option<NodeId>,
    log: RaftLog,

    role: RaftRole,
    commit_index: u64,
    last_applied: u64,
    current_leader_id: Option<NodeId>,

    next_index: HashMap<NodeId, u64>,
    match_index: HashMap<NodeId, u64>,

    election_deadline: Instant,
    election_timeout: Duration,
    votes_received: usize,
}

fn random_election_timeout() -> Duration {
    let ms = rand::thread_rng().gen_range(ELECTION_TIMEOUT_MIN_MS..=ELECTION_TIMEOUT_MAX_MS);
    Duration::from_millis(ms)
}

impl RaftNode {
    pub fn new(id: NodeId, peers: Vec<NodeId>) -> Self {
        Self {
            id,
            peers,
            current_term: 0,
            voted_for: None,
            log: RaftLog::new(),
            role: RaftRole::Follower,
            commit_index: 0,
            last_applied: 0,
            current_leader_id: None,
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            election_deadline: Instant::now(),
            election_timeout: random_election_timeout(),
            votes_received: 0,
        }
    }

    pub fn role(&self) -> RaftRole {
        self.role
    }

    pub fn term(&self) -> Term {
        self.current_term
    }

    pub fn log(&self) -> &RaftLog {
        &self.log
    }

    pub fn commit_index(&self) -> u64 {
        self.commit_index
    }

    pub fn leader_id(&self) -> Option<&NodeId> {
        self.current_leader_id.as_ref()
    }

    fn reset_election_timer(&mut self) {
        self.election_deadline = Instant::now();
        self.election_timeout = random_election_timeout();
    }

    pub fn election_timed_out(&self) -> bool {
        self.election_deadline.elapsed() >= self.election_timeout
    }

    fn become_follower(&mut self, term: Term) {
        self.current_term = term;
        self.voted_for = None;
        self.role = RaftRole::Follower;
        self.reset_election_timer();
    }

    /// Starts an election: increments term, votes for self, and returns the
    /// `RequestVote` to broadcast to every peer.
    pub fn start_election(&mut self) -> RequestVoteRequest {
        self.current_term += 1;
        self.role = RaftRole::Candidate;
        self.voted_for = Some(self.id.clone());
        self.votes_received = 1;
        self.current_leader_id = None;
        self.reset_election_timer();

        RequestVoteRequest {
            term: self.current_term,
            candidate_id: self.id.clone(),
            last_log_index: self.log.last_index(),
            last_log_term: self.log.last_term(),
        }
    }

    pub fn handle_request_vote(&mut self, req: &RequestVoteRequest) -> RequestVoteResponse {
        if req.term < self.current_term {
            return RequestVoteResponse { term: self.current_term, vote_granted: false };
        }
        if req.term > self.current_term {
            self.become_follower(req.term);
        }

        let can_vote = self.voted_for.is_none() || self.voted_for.as_deref() == Some(req.candidate_id.as_str());
        let log_ok = req.last_log_term > self.log.last_term()
            || (req.last_log_term == self.log.last_term() && req.last_log_index >= self.log.last_index());

        if can_vote && log_ok {
            self.voted_for = Some(req.candidate_id.clone());
            self.reset_election_timer();
            RequestVoteResponse { term: self.current_term, vote_granted: true }
        } else {
            RequestVoteResponse { term: self.current_term, vote_granted: false }
        }
    }

    /// Folds a vote response into the candidate's running tally; returns
    /// `true` the instant a majority (including self) is reached.
    pub fn record_vote(&mut self, resp: &RequestVoteResponse) -> bool {
        if resp.term > self.current_term {
            self.become_follower(resp.term);
            return false;
        }
        if self.role != RaftRole::Candidate || resp.term != self.current_term {
            return false;
        }
        if resp.vote_granted {
            self.votes_received += 1;
        }
        self.votes_received * 2 > self.peers.len() + 1
    }

    pub fn become_leader(&mut self) {
        if self.role != RaftRole::Candidate {
            return;
        }
        self.role = RaftRole::Leader;
        self.current_leader_id = Some(self.id.clone());
        let next = self.log.last_index() + 1;
        for peer in &self.peers {
            self.next_index.insert(peer.clone(), next);
            self.match_index.insert(peer.clone(), 0);
        }
    }

    pub fn make_heartbeat(&self, peer: &NodeId) -> AppendEntriesRequest {
        self.make_append_entries(peer)
    }

    pub fn make_append_entries(&self, peer: &NodeId) -> AppendEntriesRequest {
        let next = *self.next_index.get(peer).unwrap_or(&(self.log.last_index() + 1));
        let prev_log_index = next.saturating_sub(1);
        let prev_log_term = self.log.term_at(prev_log_index).unwrap_or(0);
        AppendEntriesRequest {
            term: self.current_term,
            leader_id: self.id.clone(),
            prev_log_index,
            prev_log_term,
            entries: self.log.entries_from(next),
            leader_commit: self.commit_index,
        }
    }

    pub fn handle_append_entries(&mut self, req: &AppendEntriesRequest) -> AppendEntriesResponse {
        if req.term < self.current_term {
            return AppendEntriesResponse {
                term: self.current_term,
                success: false,
                match_index: self.log.last_index(),
            };
        }
        if req.term > self.current_term || self.role != RaftRole::Follower {
            self.become_follower(req.term);
        } else {
            self.reset_election_timer();
        }
        self.current_leader_id = Some(req.leader_id.clone());

        let prev_ok = match self.log.term_at(req.prev_log_index) {
            Some(term) => term == req.prev_log_term,
            None => req.prev_log_index == 0,
        };
        if !prev_ok {
            return AppendEntriesResponse {
                term: self.current_term,
                success: false,
                match_index: self.log.last_index(),
            };
        }

        self.log.truncate_from(req.prev_log_index + 1);
        for entry in &req.entries {
            self.log.append(entry.term, entry.command.clone());
        }
        if req.leader_commit > self.commit_index {
            self.commit_index = req.leader_commit.min(self.log.last_index());
        }

        AppendEntriesResponse { term: self.current_term, success: true, match_index: self.log.last_index() }
    }

    /// Records a follower's reply to this leader's `AppendEntries`,
    /// advancing `match_index`/`next_index` or stepping down on a higher
    /// term.
    pub fn record_append_entries_response(&mut self, peer: &NodeId, resp: &AppendEntriesResponse) {
        if resp.term > self.current_term {
            self.become_follower(resp.term);
            return;
        }
        if self.role != RaftRole::Leader {
            return;
        }
        if resp.success {
            self.match_index.insert(peer.clone(), resp.match_index);
            self.next_index.insert(peer.clone(), resp.match_index + 1);
            self.advance_commit_index();
        } else {
            let next = self.next_index.entry(peer.clone()).or_insert(1);
            *next = next.saturating_sub(1).max(1);
        }
    }

    /// A leader advances `commit_index` to the highest index replicated on a
    /// majority of nodes whose term matches the current term.
    fn advance_commit_index(&mut self) {
        let mut indices: Vec<u64> = self.match_index.values().copied().collect();
        indices.push(self.log.last_index());
        indices.sort_unstable();
        // indices[i] is replicated to every node with match_index >= indices[i],
        // i.e. `indices.len() - i` nodes. A majority needs > len/2 nodes, so
        // pick the lowest index still held by more than half the cluster.
        let majority_index = indices[indices.len() - (indices.len() / 2 + 1)];
        if majority_index > self.commit_index {
            if let Some(term) = self.log.term_at(majority_index) {
                if term == self.current_term {
                    self.commit_index = majority_index;
                }
            }
        }
    }

    /// Leader-only: appends `command` to the log, to be replicated on the
    /// next `AppendEntries` round.
    pub fn start_command(&mut self, command: Vec<u8>) -> CResult<u64> {
        if self.role != RaftRole::Leader {
            return Err(Error::NotLeader(self.current_leader_id.clone()));
        }
        Ok(self.log.append(self.current_term, command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_node_cluster() -> (RaftNode, RaftNode) {
        (RaftNode::new("a".into(), vec!["b".into()]), RaftNode::new("b".into(), vec!["a".into()]))
    }

    #[test]
    fn candidate_wins_election_with_majority_vote() {
        let (mut a, mut b) = two_node_cluster();
        let req = a.start_election();
        let resp = b.handle_request_vote(&req);
        assert!(resp.vote_granted);
        assert!(a.record_vote(&resp));
        a.become_leader();
        assert_eq!(a.role(), RaftRole::Leader);
    }

    #[test]
    fn stale_term_request_vote_is_rejected() {
        let (mut a, mut b) = two_node_cluster();
        a.start_election();
        a.start_election();
        let stale_req = RequestVoteRequest {
            term: 1,
            candidate_id: "b".into(),
            last_log_index: 0,
            last_log_term: 0,
        };
        let resp = a.handle_request_vote(&stale_req);
        assert!(!resp.vote_granted);
        let _ = b.handle_request_vote(&stale_req);
    }

    #[test]
    fn leader_replicates_entries_and_advances_commit_index() {
        let (mut a, mut b) = two_node_cluster();
        let req = a.start_election();
        let resp = b.handle_request_vote(&req);
        a.record_vote(&resp);
        a.become_leader();

        a.start_command(b"SET k v".to_vec()).unwrap();
        let append_req = a.make_append_entries(&"b".to_string());
        let append_resp = b.handle_append_entries(&append_req);
        assert!(append_resp.success);
        a.record_append_entries_response(&"b".to_string(), &append_resp);
        assert_eq!(a.commit_index(), 1);
    }

    #[test]
    fn follower_cannot_start_command() {
        let mut node = RaftNode::new("a".into(), vec!["b".into()]);
        assert!(node.start_command(b"x".to_vec()).is_err());
    }

    #[test]
    fn higher_term_append_entries_converts_candidate_to_follower() {
        let (mut a, _b) = two_node_cluster();
        a.start_election();
        let leader_req = AppendEntriesRequest {
            term: 99,
            leader_id: "c".into(),
            prev_log_index: 0,
            prev_log_term: 0,
            entries: vec![],
            leader_commit: 0,
        };
        let resp = a.handle_append_entries(&leader_req);
        assert!(resp.success);
        assert_eq!(a.role(), RaftRole::Follower);
        assert_eq!(a.term(), 99);
    }

    #[test]
    fn majority_commit_index_requires_more_than_half_for_even_cluster_size() {
        let mut leader = RaftNode::new("a".into(), vec!["b".into(), "c".into(), "d".into()]);
        leader.role = RaftRole::Leader;
        for _ in 0..10 {
            leader.log.append(leader.current_term, b"x".to_vec());
        }
        leader.match_index.insert("b".into(), 3);
        leader.match_index.insert("c".into(), 6);
        leader.match_index.insert("d".into(), 9);
        // leader's own last_index is 10; sorted [3, 6, 9, 10] over 4 nodes.
        // Index 9 is only held by 2/4 nodes (not a majority); index 6 is
        // held by 3/4 nodes and is the correct commit point.
        leader.advance_commit_index();
        assert_eq!(leader.commit_index(), 6);
    }
}
