//! Raft replication (§4.8), grounded in `include/dkv_raft.h`/`src/dkv_raft.cpp`:
//! node role state machine, RPC request/response shapes, randomized election
//! timeout (150-300ms per spec.md's override of the original's fixed 500ms),
//! 100ms heartbeat, and log compaction via a pluggable state machine.
//!
//! The network transport itself is out of scope (SPEC_FULL.md Non-goals);
//! this module models the RPC *shapes* and the node's reaction to them, so a
//! transport can be layered on without touching consensus logic.

pub mod log;
pub mod node;
pub mod rpc;
pub mod state_machine;

pub use log::{LogEntry, RaftLog};
pub use node::{RaftNode, RaftRole};
pub use rpc::{AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse, RequestVoteRequest, RequestVoteResponse};
pub use state_machine::StateMachine;

pub type NodeId = String;
pub type Term = u64;
