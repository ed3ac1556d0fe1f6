//! Transaction manager (§4.4), grounded in `dkv_transaction_manager.cpp` /
//! `include/dkv_transaction_manager.hpp`: ID allocation, active-set
//! bookkeeping, and MULTI/EXEC/DISCARD queuing.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::envelope::TxId;
use crate::error::{CResult, Error};
use crate::mvcc::read_view::ReadView;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl Default for IsolationLevel {
    fn default() -> Self {
        IsolationLevel::RepeatableRead
    }
}

/// A key/envelope-transaction-id pair installed by a transaction, retained
/// so `rollback` can mark them `discard` (§3 "Transaction record").
#[derive(Debug, Clone)]
pub struct WrittenVersion {
    pub key: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub id: TxId,
    pub read_view: ReadView,
    pub isolation: IsolationLevel,
    pub writes: Vec<WrittenVersion>,
}

struct Inner {
    next_id: AtomicU64,
    active: Mutex<HashMap<TxId, TransactionRecord>>,
    rolled_back: Mutex<HashSet<TxId>>,
}

/// Holds the monotonic ID counter (starts at 1; 0 is reserved for
/// non-transactional work such as replay/restore), the active map, and the
/// rolled-back map.
pub struct TransactionManager {
    inner: Inner,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self {
            inner: Inner {
                next_id: AtomicU64::new(1),
                active: Mutex::new(HashMap::new()),
                rolled_back: Mutex::new(HashSet::new()),
            },
        }
    }
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an ID, constructs a read view, and inserts into the active
    /// set. The view construction captures `low`/`high`/`actives`
    /// atomically with this same lock, per §4.3 "View construction".
    pub fn begin(&self, isolation: IsolationLevel) -> CResult<TxId> {
        if isolation == IsolationLevel::Serializable {
            return Err(Error::Internal(
                "SERIALIZABLE isolation is not implemented".into(),
            ));
        }

        let mut active = self.inner.active.lock().expect("txn manager poisoned");
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let actives: HashSet<TxId> = active.keys().copied().collect();
        let low = actives.iter().copied().min().unwrap_or(id);
        let view = ReadView { creator_tx: id, low, high: id, actives };
        active.insert(
            id,
            TransactionRecord { id, read_view: view, isolation, writes: Vec::new() },
        );
        Ok(id)
    }

    /// `READ_COMMITTED` reconstructs a fresh view on every read; this
    /// returns a view anchored at "now" rather than the transaction's frozen
    /// start-of-transaction view.
    pub fn fresh_view(&self) -> ReadView {
        let active = self.inner.active.lock().expect("txn manager poisoned");
        let id = self.inner.next_id.load(Ordering::SeqCst);
        let actives: HashSet<TxId> = active.keys().copied().collect();
        let low = actives.iter().copied().min().unwrap_or(id);
        ReadView { creator_tx: id, low, high: id, actives }
    }

    /// Returns the transaction's frozen view (REPEATABLE_READ) or a fresh
    /// view (READ_COMMITTED), per its isolation level.
    pub fn get_read_view(&self, id: TxId) -> CResult<ReadView> {
        let active = self.inner.active.lock().expect("txn manager poisoned");
        let record = active
            .get(&id)
            .ok_or_else(|| Error::TransactionState(format!("no such transaction {}", id)))?;
        match record.isolation {
            IsolationLevel::ReadCommitted => {
                drop(active);
                Ok(self.fresh_view())
            }
            _ => Ok(record.read_view.clone()),
        }
    }

    pub fn is_active(&self, id: TxId) -> bool {
        self.inner.active.lock().expect("txn manager poisoned").contains_key(&id)
    }

    pub fn record_write(&self, id: TxId, key: Vec<u8>) {
        if let Some(record) =
            self.inner.active.lock().expect("txn manager poisoned").get_mut(&id)
        {
            record.writes.push(WrittenVersion { key });
        }
    }

    /// Removes from active; installed versions remain addressable as history.
    pub fn commit(&self, id: TxId) -> CResult<()> {
        let mut active = self.inner.active.lock().expect("txn manager poisoned");
        active
            .remove(&id)
            .ok_or_else(|| Error::TransactionState(format!("no such transaction {}", id)))?;
        Ok(())
    }

    /// Returns the keys this transaction wrote, so the caller can mark their
    /// envelopes `discard`, then moves the record to the rolled-back set.
    pub fn rollback(&self, id: TxId) -> CResult<Vec<Vec<u8>>> {
        let mut active = self.inner.active.lock().expect("txn manager poisoned");
        let record = active
            .remove(&id)
            .ok_or_else(|| Error::TransactionState(format!("no such transaction {}", id)))?;
        self.inner.rolled_back.lock().expect("txn manager poisoned").insert(id);
        Ok(record.writes.into_iter().map(|w| w.key).collect())
    }

    pub fn active_transactions(&self) -> Vec<TxId> {
        self.inner.active.lock().expect("txn manager poisoned").keys().copied().collect()
    }

    pub fn peek_next_id(&self) -> TxId {
        self.inner.next_id.load(Ordering::SeqCst)
    }
}

/// MULTI/EXEC/DISCARD queuing state held per connection (§4.4). Commands
/// forbidden inside a transaction are rejected at `queue` time.
#[derive(Debug, Default)]
pub struct MultiState {
    queued: Option<Vec<QueuedCommand>>,
}

#[derive(Debug, Clone)]
pub struct QueuedCommand {
    pub verb: String,
    pub args: Vec<Vec<u8>>,
}

const FORBIDDEN_IN_MULTI: &[&str] =
    &["FLUSHDB", "SHUTDOWN", "SAVE", "BGSAVE", "MULTI", "RESTORE_HLL"];

impl MultiState {
    pub fn open(&mut self) -> CResult<()> {
        if self.queued.is_some() {
            return Err(Error::TransactionState("MULTI calls can not be nested".into()));
        }
        self.queued = Some(Vec::new());
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.queued.is_some()
    }

    pub fn queue(&mut self, verb: String, args: Vec<Vec<u8>>) -> CResult<()> {
        let upper = verb.to_ascii_uppercase();
        if FORBIDDEN_IN_MULTI.contains(&upper.as_str()) {
            return Err(Error::TransactionState(format!("{} is not allowed in MULTI", upper)));
        }
        match &mut self.queued {
            Some(q) => {
                q.push(QueuedCommand { verb, args });
                Ok(())
            }
            None => Err(Error::TransactionState("MULTI not called".into())),
        }
    }

    pub fn exec(&mut self) -> CResult<Vec<QueuedCommand>> {
        self.queued.take().ok_or_else(|| Error::TransactionState("EXEC without MULTI".into()))
    }

    pub fn discard(&mut self) -> CResult<()> {
        self.queued.take().ok_or_else(|| Error::TransactionState("DISCARD without MULTI".into()))?;
        Ok(())
    }
}
