//! RPC request/response shapes (§4.8), matching `include/dkv_raft.h`'s
//! `AppendEntriesArgs`/`RequestVoteArgs`/`InstallSnapshotArgs` structs and
//! their replies.

use crate::raft::{LogEntry, NodeId, Term};

#[derive(Debug, Clone)]
pub struct RequestVoteRequest {
    pub term: Term,
    pub candidate_id: NodeId,
    pub last_log_index: u64,
    pub last_log_term: Term,
}

#[derive(Debug, Clone)]
pub struct RequestVoteResponse {
    pub term: Term,
    pub vote_granted: bool,
}

#[derive(Debug, Clone)]
pub struct AppendEntriesRequest {
    pub term: Term,
    pub leader_id: NodeId,
    pub prev_log_index: u64,
    pub prev_log_term: Term,
    pub entries: Vec<LogEntry>,
    pub leader_commit: u64,
}

#[derive(Debug, Clone)]
pub struct AppendEntriesResponse {
    pub term: Term,
    pub success: bool,
    /// The follower's last log index, so the leader can fast-forward
    /// `next_index` on conflict rather than backing off one entry at a time.
    pub match_index: u64,
}

#[derive(Debug, Clone)]
pub struct InstallSnapshotRequest {
    pub term: Term,
    pub leader_id: NodeId,
    pub last_included_index: u64,
    pub last_included_term: Term,
    pub snapshot_data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct InstallSnapshotResponse {
    pub term: Term,
}
