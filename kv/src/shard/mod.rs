//! Shard router (§4.9), grounded in `dkv_shard.cpp`/`.hpp`: a consistent-hash
//! ring mapping keys to shards, each shard pairing a `RaftNode` with a
//! `Database`, plus migration-state bookkeeping and heartbeat-driven
//! failover.
//!
//! `md5` is used for the ring hash — not a teacher dependency, but carried
//! from `examples/estuary-flow`'s `Cargo.toml`, the only pack repo to depend
//! on a hashing crate suited to this (see DESIGN.md).
//!
//! Each shard's `RaftNode` is constructed with an empty peer list: cross-node
//! replication transport is a documented Non-goal, so every shard here is a
//! single-voter group that self-elects its own leader on creation (a
//! majority of one). `handle_command` still routes writes through
//! `RaftNode::start_command` so the log/term bookkeeping stays authoritative
//! for whichever layer eventually adds a transport.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::engine::Database;
use crate::error::{CResult, Error};
use crate::eviction::EvictionPolicy;
use crate::raft::RaftNode;

pub type ShardId = u32;
pub type RingPosition = u32;

/// Matches `raft::node::HEARTBEAT_INTERVAL`: how often the router expects a
/// live shard to have its heartbeat refreshed.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);
/// A shard missing this many consecutive heartbeat windows is declared
/// failed (5x the interval, the same multiplier `dkv_shard.cpp` uses for its
/// `failover_timeout_ms`).
pub const DEFAULT_FAILOVER_TIMEOUT: Duration = Duration::from_millis(500);

fn ring_hash(key: &[u8]) -> RingPosition {
    let digest = md5::compute(key);
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// A shard's migration status: `Stable` normally, `Migrating` while its key
/// range is being handed to another shard (§4.9).
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationState {
    Stable,
    Migrating { to_shard: ShardId, start: RingPosition, end: RingPosition, progress: u8 },
}

/// Liveness as tracked by the router's heartbeat/failover loop, independent
/// of the shard's own Raft role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardHealth {
    Healthy,
    Failed,
}

pub struct ShardEntry {
    pub shard_id: ShardId,
    pub migration: MigrationState,
    health: ShardHealth,
    last_heartbeat: Instant,
    raft: RaftNode,
    db: Database,
}

impl ShardEntry {
    pub fn health(&self) -> ShardHealth {
        self.health
    }

    pub fn raft(&self) -> &RaftNode {
        &self.raft
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

/// Maps ring positions to shards via a consistent-hash ring
/// (`BTreeMap<RingPosition, ShardId>`, walked clockwise from a key's hash).
pub struct ShardRouter {
    ring: BTreeMap<RingPosition, ShardId>,
    shards: BTreeMap<ShardId, ShardEntry>,
    heartbeat_interval: Duration,
    failover_timeout: Duration,
}

impl ShardRouter {
    pub fn new() -> Self {
        Self {
            ring: BTreeMap::new(),
            shards: BTreeMap::new(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            failover_timeout: DEFAULT_FAILOVER_TIMEOUT,
        }
    }

    pub fn with_failover_timeout(mut self, timeout: Duration) -> Self {
        self.failover_timeout = timeout;
        self
    }

    /// Registers a shard at `virtual_nodes` positions around the ring, to
    /// smooth out load distribution. The shard's own `RaftNode` is a
    /// single-voter group (no configured peers) and self-elects immediately.
    pub fn add_shard(&mut self, shard_id: ShardId, virtual_nodes: u32) {
        let mut raft = RaftNode::new(shard_id.to_string(), Vec::new());
        raft.start_election();
        raft.become_leader();

        self.shards.insert(
            shard_id,
            ShardEntry {
                shard_id,
                migration: MigrationState::Stable,
                health: ShardHealth::Healthy,
                last_heartbeat: Instant::now(),
                raft,
                db: Database::new(EvictionPolicy::NoEviction),
            },
        );
        for i in 0..virtual_nodes {
            let vnode_key = format!("shard-{}-{}", shard_id, i);
            self.ring.insert(ring_hash(vnode_key.as_bytes()), shard_id);
        }
    }

    pub fn remove_shard(&mut self, shard_id: ShardId) {
        self.shards.remove(&shard_id);
        self.ring.retain(|_, id| *id != shard_id);
    }

    /// Routes `key` to a shard by walking clockwise from its hash position
    /// to the first ring entry at or after it, wrapping to the first entry
    /// if none is found.
    pub fn route(&self, key: &[u8]) -> CResult<ShardId> {
        if self.ring.is_empty() {
            return Err(Error::Internal("no shards registered".into()));
        }
        let pos = ring_hash(key);
        let shard = self
            .ring
            .range(pos..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, id)| *id)
            .expect("ring non-empty");
        Ok(shard)
    }

    pub fn begin_migration(&mut self, from_shard: ShardId, to_shard: ShardId, start: RingPosition, end: RingPosition) -> CResult<()> {
        let entry = self
            .shards
            .get_mut(&from_shard)
            .ok_or_else(|| Error::Internal(format!("no such shard {}", from_shard)))?;
        entry.migration = MigrationState::Migrating { to_shard, start, end, progress: 0 };
        Ok(())
    }

    pub fn advance_migration(&mut self, shard_id: ShardId, progress: u8) -> CResult<()> {
        let entry = self
            .shards
            .get_mut(&shard_id)
            .ok_or_else(|| Error::Internal(format!("no such shard {}", shard_id)))?;
        match &mut entry.migration {
            MigrationState::Migrating { progress: p, .. } => {
                *p = progress.min(100);
                Ok(())
            }
            MigrationState::Stable => Err(Error::Internal("shard is not migrating".into())),
        }
    }

    pub fn complete_migration(&mut self, shard_id: ShardId) -> CResult<()> {
        let entry = self
            .shards
            .get_mut(&shard_id)
            .ok_or_else(|| Error::Internal(format!("no such shard {}", shard_id)))?;
        entry.migration = MigrationState::Stable;
        Ok(())
    }

    pub fn migration_state(&self, shard_id: ShardId) -> Option<&MigrationState> {
        self.shards.get(&shard_id).map(|e| &e.migration)
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Routes `key` to its owning shard and runs `apply` against that
    /// shard's `Database` (§4.9's per-shard `handle_command`). Mutating
    /// commands pass `is_write: true` so `command` is first appended to the
    /// shard's Raft log via `start_command`; read-only commands pass an
    /// empty `command` and `is_write: false` to skip log bookkeeping. Fails
    /// if the shard is currently `ShardHealth::Failed`, or (for writes) if
    /// this node is not that shard's Raft leader.
    pub fn handle_command<T>(
        &mut self,
        key: &[u8],
        command: Vec<u8>,
        is_write: bool,
        apply: impl FnOnce(&Database) -> CResult<T>,
    ) -> CResult<T> {
        let shard_id = self.route(key)?;
        let entry = self
            .shards
            .get_mut(&shard_id)
            .ok_or_else(|| Error::Internal(format!("no such shard {}", shard_id)))?;
        if entry.health == ShardHealth::Failed {
            return Err(Error::Internal(format!("shard {} has failed over", shard_id)));
        }
        if is_write {
            entry.raft.start_command(command)?;
        }
        apply(&entry.db)
    }

    pub fn shard_health(&self, shard_id: ShardId) -> Option<ShardHealth> {
        self.shards.get(&shard_id).map(|e| e.health)
    }

    pub fn shard_entry(&self, shard_id: ShardId) -> Option<&ShardEntry> {
        self.shards.get(&shard_id)
    }

    /// Refreshes a shard's liveness; called whenever its leader successfully
    /// sends (or its follower receives) a heartbeat. Clears `Failed` back to
    /// `Healthy` on a late-arriving heartbeat, the same recovery behavior as
    /// the original's `failover_timeout` handling.
    pub fn record_heartbeat(&mut self, shard_id: ShardId) {
        if let Some(entry) = self.shards.get_mut(&shard_id) {
            entry.last_heartbeat = Instant::now();
            entry.health = ShardHealth::Healthy;
        }
    }

    /// Marks any shard whose last heartbeat is older than `failover_timeout`
    /// as `Failed`; returns the ids newly marked this call.
    pub fn check_health(&mut self) -> Vec<ShardId> {
        let timeout = self.failover_timeout;
        let mut newly_failed = Vec::new();
        for entry in self.shards.values_mut() {
            if entry.health == ShardHealth::Healthy && entry.last_heartbeat.elapsed() > timeout {
                entry.health = ShardHealth::Failed;
                newly_failed.push(entry.shard_id);
            }
        }
        newly_failed
    }

    /// Spawns a background thread that calls `check_health` on
    /// `heartbeat_interval`, the same pattern `Database::spawn_ttl_sweeper`
    /// uses for TTL expiry. Stops once `running` is cleared.
    pub fn spawn_health_check_loop(router: Arc<Mutex<Self>>, running: Arc<AtomicBool>) {
        let interval = router.lock().expect("shard router poisoned").heartbeat_interval;
        thread::spawn(move || {
            while running.load(Ordering::Relaxed) {
                thread::sleep(interval);
                router.lock().expect("shard router poisoned").check_health();
            }
        });
    }
}

impl Default for ShardRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_fails_with_no_shards() {
        let router = ShardRouter::new();
        assert!(router.route(b"k").is_err());
    }

    #[test]
    fn route_is_deterministic_for_the_same_key() {
        let mut router = ShardRouter::new();
        router.add_shard(1, 8);
        router.add_shard(2, 8);
        let a = router.route(b"user:123").unwrap();
        let b = router.route(b"user:123").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn removing_a_shard_redistributes_its_keys() {
        let mut router = ShardRouter::new();
        router.add_shard(1, 16);
        router.add_shard(2, 16);
        let before = router.route(b"k").unwrap();
        router.remove_shard(before);
        let after = router.route(b"k").unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn migration_lifecycle() {
        let mut router = ShardRouter::new();
        router.add_shard(1, 4);
        router.add_shard(2, 4);
        router.begin_migration(1, 2, 0, u32::MAX).unwrap();
        assert!(matches!(router.migration_state(1), Some(MigrationState::Migrating { .. })));
        router.advance_migration(1, 150).unwrap();
        if let Some(MigrationState::Migrating { progress, .. }) = router.migration_state(1) {
            assert_eq!(*progress, 100);
        } else {
            panic!("expected migrating state");
        }
        router.complete_migration(1).unwrap();
        assert_eq!(router.migration_state(1), Some(&MigrationState::Stable));
    }

    #[test]
    fn added_shard_self_elects_leader() {
        let mut router = ShardRouter::new();
        router.add_shard(1, 4);
        let entry = router.shard_entry(1).unwrap();
        assert_eq!(entry.raft().role(), crate::raft::RaftRole::Leader);
        assert_eq!(entry.health(), ShardHealth::Healthy);
    }

    #[test]
    fn handle_command_writes_through_raft_log_and_applies_to_database() {
        let mut router = ShardRouter::new();
        router.add_shard(1, 4);
        let shard_id = router.route(b"k").unwrap();

        router
            .handle_command(b"k", b"SET k v".to_vec(), true, |db| db.set(None, b"k", b"v".to_vec(), None))
            .unwrap();

        let read = router.handle_command(b"k", Vec::new(), false, |db| db.get(None, b"k")).unwrap();
        assert_eq!(read, Some(b"v".to_vec()));
        assert_eq!(router.shard_entry(shard_id).unwrap().raft().log().last_index(), 1);
    }

    #[test]
    fn check_health_marks_shard_failed_after_timeout_and_heartbeat_recovers_it() {
        let mut router = ShardRouter::new().with_failover_timeout(Duration::from_millis(0));
        router.add_shard(1, 4);

        let failed = router.check_health();
        assert_eq!(failed, vec![1]);
        assert_eq!(router.shard_health(1), Some(ShardHealth::Failed));

        router.record_heartbeat(1);
        assert_eq!(router.shard_health(1), Some(ShardHealth::Healthy));
    }

    #[test]
    fn failed_shard_rejects_commands() {
        let mut router = ShardRouter::new().with_failover_timeout(Duration::from_millis(0));
        router.add_shard(1, 4);
        router.check_health();

        let result = router.handle_command(b"k", Vec::new(), false, |db| db.get(None, b"k"));
        assert!(result.is_err());
    }
}
