//! The command-dispatch layer: translates named operations into MVCC
//! `get`/`set`/`del` calls, enforcing per-type shape and building
//! non-transactional (`tx_id = 0`) or transactional read views as needed.
//!
//! Naming follows `get`/`set`/`delete`/`status` convention, generalized to a
//! typed value store instead of a byte store.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::envelope::{now_secs, Envelope, TxId};
use crate::error::{CResult, Error};
use crate::eviction::{EvictionPolicy, Evictor};
use crate::mvcc::mvcc::MvccStore;
use crate::mvcc::read_view::ReadView;
use crate::mvcc::scan;
use crate::mvcc::transaction::{IsolationLevel, TransactionManager};
use crate::value::{Bitmap, HyperLogLog, Value, ZSet};

/// Database-wide stats for the INFO command.
#[derive(Debug, Default, Clone)]
pub struct Status {
    pub keys: usize,
    pub commands_processed: u64,
}

/// Ties the MVCC store, transaction manager, and eviction policy together
/// and exposes one method per §6 verb. Non-transactional callers pass
/// `tx_id = 0`; `TransactionManager::begin` never allocates 0.
pub struct Database {
    mvcc: Arc<MvccStore>,
    txns: TransactionManager,
    evictor: Evictor,
    running: Arc<AtomicBool>,
    /// Byte budget for `enforce_memory_budget`; 0 means unlimited (§4.10
    /// `maxmemory 0`).
    max_memory: AtomicUsize,
}

const NON_TX_ID: TxId = 0;

impl Database {
    pub fn new(policy: EvictionPolicy) -> Self {
        let db = Self {
            mvcc: Arc::new(MvccStore::new()),
            txns: TransactionManager::new(),
            evictor: Evictor::new(policy),
            running: Arc::new(AtomicBool::new(true)),
            max_memory: AtomicUsize::new(0),
        };
        db.spawn_ttl_sweeper();
        db
    }

    /// Sets the `maxmemory` byte budget; 0 disables enforcement.
    pub fn set_max_memory(&self, bytes: usize) {
        self.max_memory.store(bytes, Ordering::Relaxed);
    }

    fn view_for(&self, tx_id: Option<TxId>) -> CResult<ReadView> {
        match tx_id {
            Some(id) => self.txns.get_read_view(id),
            // Mirrors `TransactionManager::fresh_view`: `low` is the min
            // currently-active tx id, not `next_id`, so a started-but-
            // uncommitted transaction's writes stay invisible here.
            None => Ok(self.txns.fresh_view()),
        }
    }

    fn effective_tx(&self, tx_id: Option<TxId>) -> TxId {
        tx_id.unwrap_or(NON_TX_ID)
    }

    fn record_write_if_tx(&self, tx_id: Option<TxId>, key: &[u8]) {
        if let Some(id) = tx_id {
            self.txns.record_write(id, key.to_vec());
        }
    }

    /// Reads through MVCC; transparently treats a lazily-expired key as
    /// absent and schedules its physical deletion.
    fn get_live(&self, tx_id: Option<TxId>, key: &[u8]) -> CResult<Option<Envelope>> {
        let view = self.view_for(tx_id)?;
        match self.mvcc.get(&view, key)? {
            Some(mut env) if env.is_expired(now_secs()) => {
                self.mvcc.del(self.effective_tx(tx_id), key)?;
                let _ = &mut env;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    // ---- Transactions -----------------------------------------------

    pub fn begin(&self, isolation: IsolationLevel) -> CResult<TxId> {
        self.txns.begin(isolation)
    }

    pub fn commit(&self, tx_id: TxId) -> CResult<()> {
        self.txns.commit(tx_id)
    }

    pub fn rollback(&self, tx_id: TxId) -> CResult<()> {
        let keys = self.txns.rollback(tx_id)?;
        for key in keys {
            self.mvcc.discard(&key, tx_id)?;
        }
        Ok(())
    }

    // ---- String -------------------------------------------------------

    pub fn set(&self, tx_id: Option<TxId>, key: &[u8], value: Vec<u8>, ex_secs: Option<u64>) -> CResult<()> {
        self.enforce_memory_budget(key.len() + value.len())?;
        let tx = self.effective_tx(tx_id);
        self.mvcc.set(tx, key, Value::Str(value))?;
        if let Some(secs) = ex_secs {
            self.expire(tx_id, key, secs)?;
        }
        self.record_write_if_tx(tx_id, key);
        Ok(())
    }

    pub fn get(&self, tx_id: Option<TxId>, key: &[u8]) -> CResult<Option<Vec<u8>>> {
        match self.get_live(tx_id, key)? {
            Some(env) => Ok(Some(env.value.as_str()?.to_vec())),
            None => Ok(None),
        }
    }

    pub fn del(&self, tx_id: Option<TxId>, key: &[u8]) -> CResult<bool> {
        let existed = self.get_live(tx_id, key)?.is_some();
        if existed {
            self.mvcc.del(self.effective_tx(tx_id), key)?;
            self.record_write_if_tx(tx_id, key);
        }
        Ok(existed)
    }

    pub fn exists(&self, tx_id: Option<TxId>, key: &[u8]) -> CResult<bool> {
        Ok(self.get_live(tx_id, key)?.is_some())
    }

    fn incr_by(&self, tx_id: Option<TxId>, key: &[u8], delta: i64) -> CResult<i64> {
        let current = match self.get_live(tx_id, key)? {
            Some(env) => env.value.as_int()?,
            None => 0,
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| Error::InvalidArgument("increment would overflow".into()))?;
        let encoded = next.to_string().into_bytes();
        self.enforce_memory_budget(key.len() + encoded.len())?;
        self.mvcc.set_keep_expire(self.effective_tx(tx_id), key, Value::Str(encoded))?;
        self.record_write_if_tx(tx_id, key);
        Ok(next)
    }

    pub fn incr(&self, tx_id: Option<TxId>, key: &[u8]) -> CResult<i64> {
        self.incr_by(tx_id, key, 1)
    }

    pub fn decr(&self, tx_id: Option<TxId>, key: &[u8]) -> CResult<i64> {
        self.incr_by(tx_id, key, -1)
    }

    // ---- TTL ------------------------------------------------------------

    pub fn expire(&self, tx_id: Option<TxId>, key: &[u8], secs: u64) -> CResult<bool> {
        let Some(env) = self.get_live(tx_id, key)? else { return Ok(false) };
        let tx = self.effective_tx(tx_id);
        self.mvcc.set_with_expire(tx, key, env.value, Some(now_secs() + secs))?;
        self.record_write_if_tx(tx_id, key);
        Ok(true)
    }

    pub fn ttl(&self, tx_id: Option<TxId>, key: &[u8]) -> CResult<Option<i64>> {
        let Some(env) = self.get_live(tx_id, key)? else { return Ok(None) };
        match env.expire_at {
            Some(at) => Ok(Some((at as i64 - now_secs() as i64).max(0))),
            None => Ok(Some(-1)),
        }
    }

    // ---- Hash -----------------------------------------------------------

    fn mutate_or_default<T>(
        &self,
        tx_id: Option<TxId>,
        key: &[u8],
        default: impl FnOnce() -> Value,
        f: impl FnOnce(&mut Value) -> CResult<T>,
    ) -> CResult<T> {
        let mut value = match self.get_live(tx_id, key)? {
            Some(env) => env.value,
            None => default(),
        };
        let result = f(&mut value)?;
        self.enforce_memory_budget(key.len() + value.approx_memory_size())?;
        self.mvcc.set_keep_expire(self.effective_tx(tx_id), key, value)?;
        self.record_write_if_tx(tx_id, key);
        Ok(result)
    }

    pub fn hset(&self, tx_id: Option<TxId>, key: &[u8], field: Vec<u8>, val: Vec<u8>) -> CResult<bool> {
        self.mutate_or_default(
            tx_id,
            key,
            || Value::Hash(Default::default()),
            |v| Ok(v.as_hash_mut()?.insert(field, val).is_none()),
        )
    }

    pub fn hget(&self, tx_id: Option<TxId>, key: &[u8], field: &[u8]) -> CResult<Option<Vec<u8>>> {
        match self.get_live(tx_id, key)? {
            Some(env) => Ok(env.value.as_hash()?.get(field).cloned()),
            None => Ok(None),
        }
    }

    pub fn hgetall(&self, tx_id: Option<TxId>, key: &[u8]) -> CResult<Vec<(Vec<u8>, Vec<u8>)>> {
        match self.get_live(tx_id, key)? {
            Some(env) => Ok(env.value.as_hash()?.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            None => Ok(Vec::new()),
        }
    }

    pub fn hdel(&self, tx_id: Option<TxId>, key: &[u8], field: &[u8]) -> CResult<bool> {
        let Some(env) = self.get_live(tx_id, key)? else { return Ok(false) };
        let mut value = env.value;
        let removed = value.as_hash_mut()?.remove(field).is_some();
        self.mvcc.set_keep_expire(self.effective_tx(tx_id), key, value)?;
        self.record_write_if_tx(tx_id, key);
        Ok(removed)
    }

    pub fn hexists(&self, tx_id: Option<TxId>, key: &[u8], field: &[u8]) -> CResult<bool> {
        match self.get_live(tx_id, key)? {
            Some(env) => Ok(env.value.as_hash()?.contains_key(field)),
            None => Ok(false),
        }
    }

    pub fn hkeys(&self, tx_id: Option<TxId>, key: &[u8]) -> CResult<Vec<Vec<u8>>> {
        Ok(self.hgetall(tx_id, key)?.into_iter().map(|(k, _)| k).collect())
    }

    pub fn hvals(&self, tx_id: Option<TxId>, key: &[u8]) -> CResult<Vec<Vec<u8>>> {
        Ok(self.hgetall(tx_id, key)?.into_iter().map(|(_, v)| v).collect())
    }

    pub fn hlen(&self, tx_id: Option<TxId>, key: &[u8]) -> CResult<usize> {
        match self.get_live(tx_id, key)? {
            Some(env) => Ok(env.value.as_hash()?.len()),
            None => Ok(0),
        }
    }

    // ---- List -------------------------------------------------------------

    pub fn lpush(&self, tx_id: Option<TxId>, key: &[u8], val: Vec<u8>) -> CResult<usize> {
        self.mutate_or_default(
            tx_id,
            key,
            || Value::List(VecDeque::new()),
            |v| {
                let l = v.as_list_mut()?;
                l.push_front(val);
                Ok(l.len())
            },
        )
    }

    pub fn rpush(&self, tx_id: Option<TxId>, key: &[u8], val: Vec<u8>) -> CResult<usize> {
        self.mutate_or_default(
            tx_id,
            key,
            || Value::List(VecDeque::new()),
            |v| {
                let l = v.as_list_mut()?;
                l.push_back(val);
                Ok(l.len())
            },
        )
    }

    fn pop(&self, tx_id: Option<TxId>, key: &[u8], count: usize, front: bool) -> CResult<Vec<Vec<u8>>> {
        let Some(env) = self.get_live(tx_id, key)? else { return Ok(Vec::new()) };
        let mut value = env.value;
        let mut popped = Vec::with_capacity(count);
        {
            let l = value.as_list_mut()?;
            for _ in 0..count {
                let item = if front { l.pop_front() } else { l.pop_back() };
                match item {
                    Some(v) => popped.push(v),
                    None => break,
                }
            }
        }
        self.mvcc.set_keep_expire(self.effective_tx(tx_id), key, value)?;
        self.record_write_if_tx(tx_id, key);
        Ok(popped)
    }

    pub fn lpop(&self, tx_id: Option<TxId>, key: &[u8], count: usize) -> CResult<Vec<Vec<u8>>> {
        self.pop(tx_id, key, count, true)
    }

    pub fn rpop(&self, tx_id: Option<TxId>, key: &[u8], count: usize) -> CResult<Vec<Vec<u8>>> {
        self.pop(tx_id, key, count, false)
    }

    pub fn llen(&self, tx_id: Option<TxId>, key: &[u8]) -> CResult<usize> {
        match self.get_live(tx_id, key)? {
            Some(env) => Ok(env.value.as_list()?.len()),
            None => Ok(0),
        }
    }

    pub fn lrange(&self, tx_id: Option<TxId>, key: &[u8], start: i64, stop: i64) -> CResult<Vec<Vec<u8>>> {
        let Some(env) = self.get_live(tx_id, key)? else { return Ok(Vec::new()) };
        let list = env.value.as_list()?;
        let items: Vec<Vec<u8>> = list.iter().cloned().collect();
        let len = items.len() as i64;
        let norm = |i: i64| if i < 0 { (len + i).max(0) } else { i.min(len) };
        let s = norm(start);
        let e = (norm(stop) + 1).min(len);
        if s >= e {
            return Ok(Vec::new());
        }
        Ok(items[s as usize..e as usize].to_vec())
    }

    // ---- Set -----------------------------------------------------------

    pub fn sadd(&self, tx_id: Option<TxId>, key: &[u8], member: Vec<u8>) -> CResult<bool> {
        self.mutate_or_default(
            tx_id,
            key,
            || Value::Set(Default::default()),
            |v| Ok(v.as_set_mut()?.insert(member)),
        )
    }

    pub fn srem(&self, tx_id: Option<TxId>, key: &[u8], member: &[u8]) -> CResult<bool> {
        let Some(env) = self.get_live(tx_id, key)? else { return Ok(false) };
        let mut value = env.value;
        let removed = value.as_set_mut()?.remove(member);
        self.mvcc.set_keep_expire(self.effective_tx(tx_id), key, value)?;
        self.record_write_if_tx(tx_id, key);
        Ok(removed)
    }

    pub fn smembers(&self, tx_id: Option<TxId>, key: &[u8]) -> CResult<Vec<Vec<u8>>> {
        match self.get_live(tx_id, key)? {
            Some(env) => Ok(env.value.as_set()?.iter().cloned().collect()),
            None => Ok(Vec::new()),
        }
    }

    pub fn sismember(&self, tx_id: Option<TxId>, key: &[u8], member: &[u8]) -> CResult<bool> {
        match self.get_live(tx_id, key)? {
            Some(env) => Ok(env.value.as_set()?.contains(member)),
            None => Ok(false),
        }
    }

    pub fn scard(&self, tx_id: Option<TxId>, key: &[u8]) -> CResult<usize> {
        match self.get_live(tx_id, key)? {
            Some(env) => Ok(env.value.as_set()?.len()),
            None => Ok(0),
        }
    }

    // ---- Sorted set ------------------------------------------------------

    pub fn zadd(&self, tx_id: Option<TxId>, key: &[u8], member: Vec<u8>, score: f64) -> CResult<()> {
        self.mutate_or_default(
            tx_id,
            key,
            || Value::ZSet(ZSet::default()),
            |v| {
                v.as_zset_mut()?.zadd(member, score);
                Ok(())
            },
        )
    }

    pub fn zrem(&self, tx_id: Option<TxId>, key: &[u8], member: &[u8]) -> CResult<bool> {
        let Some(env) = self.get_live(tx_id, key)? else { return Ok(false) };
        let mut value = env.value;
        let removed = value.as_zset_mut()?.zrem(member);
        self.mvcc.set_keep_expire(self.effective_tx(tx_id), key, value)?;
        self.record_write_if_tx(tx_id, key);
        Ok(removed)
    }

    pub fn zscore(&self, tx_id: Option<TxId>, key: &[u8], member: &[u8]) -> CResult<Option<f64>> {
        match self.get_live(tx_id, key)? {
            Some(env) => Ok(env.value.as_zset()?.zscore(member)),
            None => Ok(None),
        }
    }

    pub fn zismember(&self, tx_id: Option<TxId>, key: &[u8], member: &[u8]) -> CResult<bool> {
        match self.get_live(tx_id, key)? {
            Some(env) => Ok(env.value.as_zset()?.zismember(member)),
            None => Ok(false),
        }
    }

    pub fn zcard(&self, tx_id: Option<TxId>, key: &[u8]) -> CResult<usize> {
        match self.get_live(tx_id, key)? {
            Some(env) => Ok(env.value.as_zset()?.zcard()),
            None => Ok(0),
        }
    }

    pub fn zrank(&self, tx_id: Option<TxId>, key: &[u8], member: &[u8]) -> CResult<Option<usize>> {
        match self.get_live(tx_id, key)? {
            Some(env) => Ok(env.value.as_zset()?.zrank(member)),
            None => Ok(None),
        }
    }

    pub fn zrevrank(&self, tx_id: Option<TxId>, key: &[u8], member: &[u8]) -> CResult<Option<usize>> {
        match self.get_live(tx_id, key)? {
            Some(env) => Ok(env.value.as_zset()?.zrevrank(member)),
            None => Ok(None),
        }
    }

    pub fn zrange(&self, tx_id: Option<TxId>, key: &[u8], start: i64, stop: i64, rev: bool) -> CResult<Vec<(Vec<u8>, f64)>> {
        match self.get_live(tx_id, key)? {
            Some(env) => Ok(env.value.as_zset()?.zrange(start, stop, rev)),
            None => Ok(Vec::new()),
        }
    }

    pub fn zrangebyscore(&self, tx_id: Option<TxId>, key: &[u8], min: f64, max: f64, rev: bool) -> CResult<Vec<(Vec<u8>, f64)>> {
        match self.get_live(tx_id, key)? {
            Some(env) => Ok(env.value.as_zset()?.zrangebyscore(min, max, rev)),
            None => Ok(Vec::new()),
        }
    }

    pub fn zcount(&self, tx_id: Option<TxId>, key: &[u8], min: f64, max: f64) -> CResult<usize> {
        match self.get_live(tx_id, key)? {
            Some(env) => Ok(env.value.as_zset()?.zcount(min, max)),
            None => Ok(0),
        }
    }

    // ---- Bitmap ----------------------------------------------------------

    pub fn setbit(&self, tx_id: Option<TxId>, key: &[u8], offset: usize, bit: bool) -> CResult<bool> {
        self.mutate_or_default(
            tx_id,
            key,
            || Value::Bitmap(Bitmap::default()),
            |v| Ok(v.as_bitmap_mut()?.setbit(offset, bit)),
        )
    }

    pub fn getbit(&self, tx_id: Option<TxId>, key: &[u8], offset: usize) -> CResult<bool> {
        match self.get_live(tx_id, key)? {
            Some(env) => Ok(env.value.as_bitmap()?.getbit(offset)),
            None => Ok(false),
        }
    }

    pub fn bitcount(&self, tx_id: Option<TxId>, key: &[u8], start: Option<usize>, end: Option<usize>) -> CResult<u64> {
        match self.get_live(tx_id, key)? {
            Some(env) => Ok(env.value.as_bitmap()?.bitcount(start, end)),
            None => Ok(0),
        }
    }

    pub fn bitop(&self, tx_id: Option<TxId>, op: &str, dest: &[u8], srcs: &[&[u8]]) -> CResult<usize> {
        let mut bitmaps = Vec::with_capacity(srcs.len());
        for src in srcs {
            match self.get_live(tx_id, src)? {
                Some(env) => bitmaps.push(env.value.as_bitmap()?.clone()),
                None => bitmaps.push(Bitmap::default()),
            }
        }
        let refs: Vec<&Bitmap> = bitmaps.iter().collect();
        let result = match op.to_ascii_uppercase().as_str() {
            "AND" => Bitmap::bitop_and(&refs),
            "OR" => Bitmap::bitop_or(&refs),
            "XOR" => Bitmap::bitop_xor(&refs),
            "NOT" => {
                if refs.len() != 1 {
                    return Err(Error::InvalidArgument("BITOP NOT takes exactly one source".into()));
                }
                refs[0].bitop_not()
            }
            other => return Err(Error::InvalidArgument(format!("unknown BITOP operation {}", other))),
        };
        let len = result.0.len();
        self.mvcc.set_keep_expire(self.effective_tx(tx_id), dest, Value::Bitmap(result))?;
        self.record_write_if_tx(tx_id, dest);
        Ok(len)
    }

    // ---- HyperLogLog ------------------------------------------------------

    pub fn pfadd(&self, tx_id: Option<TxId>, key: &[u8], element: &[u8]) -> CResult<bool> {
        self.mutate_or_default(
            tx_id,
            key,
            || Value::HyperLogLog(HyperLogLog::default()),
            |v| Ok(v.as_hll_mut()?.add(element)),
        )
    }

    pub fn pfcount(&self, tx_id: Option<TxId>, keys: &[&[u8]]) -> CResult<u64> {
        if keys.len() == 1 {
            return match self.get_live(tx_id, keys[0])? {
                Some(env) => Ok(env.value.as_hll()?.count()),
                None => Ok(0),
            };
        }
        let mut merged = HyperLogLog::default();
        for key in keys {
            if let Some(env) = self.get_live(tx_id, key)? {
                merged.merge(env.value.as_hll()?);
            }
        }
        Ok(merged.count())
    }

    pub fn pfmerge(&self, tx_id: Option<TxId>, dest: &[u8], srcs: &[&[u8]]) -> CResult<()> {
        let mut merged = match self.get_live(tx_id, dest)? {
            Some(env) => env.value.as_hll()?.clone(),
            None => HyperLogLog::default(),
        };
        for src in srcs {
            if let Some(env) = self.get_live(tx_id, src)? {
                merged.merge(env.value.as_hll()?);
            }
        }
        self.mvcc.set_keep_expire(self.effective_tx(tx_id), dest, Value::HyperLogLog(merged))?;
        self.record_write_if_tx(tx_id, dest);
        Ok(())
    }

    /// Internal restore path used by AOF replay (§4.7): installs a
    /// previously-serialized sketch verbatim rather than re-adding elements.
    pub fn restore_hll(&self, key: &[u8], hll: HyperLogLog) -> CResult<()> {
        self.mvcc.set(NON_TX_ID, key, Value::HyperLogLog(hll))
    }

    // ---- Admin ------------------------------------------------------------

    pub fn flushdb(&self) -> CResult<()> {
        for key in self.mvcc.inner().keys() {
            self.mvcc.del(NON_TX_ID, &key)?;
        }
        Ok(())
    }

    pub fn dbsize(&self) -> CResult<usize> {
        let view = self.txns.fresh_view();
        Ok(scan::scan(self.mvcc.inner(), &view).len())
    }

    pub fn status(&self) -> CResult<Status> {
        Ok(Status { keys: self.dbsize()?, commands_processed: 0 })
    }

    pub fn keys(&self, pattern_prefix: &[u8]) -> CResult<Vec<Vec<u8>>> {
        let view = self.txns.fresh_view();
        Ok(scan::scan_prefix(self.mvcc.inner(), &view, pattern_prefix)
            .into_iter()
            .map(|(k, _)| k)
            .collect())
    }

    // ---- Eviction / internals ----------------------------------------------

    pub(crate) fn mvcc(&self) -> &MvccStore {
        &self.mvcc
    }

    pub(crate) fn evictor(&self) -> &Evictor {
        &self.evictor
    }

    fn approx_memory_usage(&self) -> usize {
        let view = self.txns.fresh_view();
        scan::scan(self.mvcc.inner(), &view)
            .iter()
            .map(|(k, env)| k.len() + env.value.approx_memory_size())
            .sum()
    }

    fn eviction_candidates(&self) -> Vec<(Vec<u8>, Envelope)> {
        let view = self.txns.fresh_view();
        let mut candidates = scan::scan(self.mvcc.inner(), &view);
        if self.evictor.policy().volatile_only() {
            candidates.retain(|(_, env)| env.expire_at.is_some());
        }
        candidates
    }

    /// Called before admitting a write of `incoming_bytes` more data (§4.10):
    /// evicts keys via `evictor` until projected usage is under
    /// `max_memory`, or fails with `Error::Oom` if no further candidate
    /// exists. A no-op when `max_memory` is 0 (unlimited).
    fn enforce_memory_budget(&self, incoming_bytes: usize) -> CResult<()> {
        let budget = self.max_memory.load(Ordering::Relaxed);
        if budget == 0 {
            return Ok(());
        }
        while self.approx_memory_usage() + incoming_bytes > budget {
            let candidates = self.eviction_candidates();
            match self.evictor.select_victim(&candidates) {
                Some(key) => self.mvcc.del(NON_TX_ID, key)?,
                None => return Err(Error::Oom),
            }
        }
        Ok(())
    }

    fn spawn_ttl_sweeper(&self) {
        let running = Arc::clone(&self.running);
        let mvcc = Arc::clone(&self.mvcc);
        thread::spawn(move || {
            while running.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(500));
                let now = now_secs();
                let inner = mvcc.inner();
                for key in inner.keys() {
                    if let Some(slot) = inner.lookup(&key) {
                        let expired = {
                            let guard = slot.lock().expect("envelope mutex poisoned");
                            guard.is_expired(now)
                        };
                        if expired {
                            inner.erase(&key);
                        }
                    }
                }
            }
        });
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_roundtrip() {
        let db = Database::new(EvictionPolicy::NoEviction);
        db.set(None, b"k", b"v".to_vec(), None).unwrap();
        assert_eq!(db.get(None, b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn incr_decr_on_fresh_key() {
        let db = Database::new(EvictionPolicy::NoEviction);
        assert_eq!(db.incr(None, b"counter").unwrap(), 1);
        assert_eq!(db.incr(None, b"counter").unwrap(), 2);
        assert_eq!(db.decr(None, b"counter").unwrap(), 1);
    }

    #[test]
    fn del_returns_whether_key_existed() {
        let db = Database::new(EvictionPolicy::NoEviction);
        assert!(!db.del(None, b"missing").unwrap());
        db.set(None, b"k", b"v".to_vec(), None).unwrap();
        assert!(db.del(None, b"k").unwrap());
    }

    #[test]
    fn hash_set_get_del() {
        let db = Database::new(EvictionPolicy::NoEviction);
        assert!(db.hset(None, b"h", b"f".to_vec(), b"v".to_vec()).unwrap());
        assert_eq!(db.hget(None, b"h", b"f").unwrap(), Some(b"v".to_vec()));
        assert!(db.hdel(None, b"h", b"f").unwrap());
        assert_eq!(db.hget(None, b"h", b"f").unwrap(), None);
    }

    #[test]
    fn list_push_pop_and_range() {
        let db = Database::new(EvictionPolicy::NoEviction);
        db.rpush(None, b"l", b"a".to_vec()).unwrap();
        db.rpush(None, b"l", b"b".to_vec()).unwrap();
        db.lpush(None, b"l", b"z".to_vec()).unwrap();
        assert_eq!(db.lrange(None, b"l", 0, -1).unwrap(), vec![b"z".to_vec(), b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(db.lpop(None, b"l", 1).unwrap(), vec![b"z".to_vec()]);
    }

    #[test]
    fn transaction_commit_then_rollback() {
        let db = Database::new(EvictionPolicy::NoEviction);
        let tx = db.begin(IsolationLevel::RepeatableRead).unwrap();
        db.set(Some(tx), b"k", b"v1".to_vec(), None).unwrap();
        db.commit(tx).unwrap();
        assert_eq!(db.get(None, b"k").unwrap(), Some(b"v1".to_vec()));

        let tx2 = db.begin(IsolationLevel::RepeatableRead).unwrap();
        db.set(Some(tx2), b"k", b"v2".to_vec(), None).unwrap();
        db.rollback(tx2).unwrap();
        assert_eq!(db.get(None, b"k").unwrap(), Some(b"v1".to_vec()));
    }

    #[test]
    fn bitop_and_matches_value_level_semantics() {
        let db = Database::new(EvictionPolicy::NoEviction);
        db.setbit(None, b"x", 0, true).unwrap();
        db.setbit(None, b"x", 2, true).unwrap();
        db.setbit(None, b"y", 1, true).unwrap();
        db.setbit(None, b"y", 2, true).unwrap();
        db.bitop(None, "AND", b"dest", &[b"x", b"y"]).unwrap();
        assert!(db.getbit(None, b"dest", 2).unwrap());
        assert!(!db.getbit(None, b"dest", 0).unwrap());
    }

    #[test]
    fn expire_and_ttl() {
        let db = Database::new(EvictionPolicy::NoEviction);
        db.set(None, b"k", b"v".to_vec(), None).unwrap();
        db.expire(None, b"k", 100).unwrap();
        let ttl = db.ttl(None, b"k").unwrap().unwrap();
        assert!(ttl > 0 && ttl <= 100);
    }

    #[test]
    fn in_place_mutation_preserves_existing_ttl() {
        let db = Database::new(EvictionPolicy::NoEviction);
        db.set(None, b"h", b"ignored".to_vec(), None).unwrap();
        db.expire(None, b"h", 100).unwrap();
        db.hset(None, b"h", b"f".to_vec(), b"v".to_vec()).unwrap();
        let ttl = db.ttl(None, b"h").unwrap().unwrap();
        assert!(ttl > 0 && ttl <= 100, "HSET must not clear an existing TTL");
    }

    #[test]
    fn bare_set_clears_existing_ttl() {
        let db = Database::new(EvictionPolicy::NoEviction);
        db.set(None, b"k", b"v1".to_vec(), None).unwrap();
        db.expire(None, b"k", 100).unwrap();
        db.set(None, b"k", b"v2".to_vec(), None).unwrap();
        assert_eq!(db.ttl(None, b"k").unwrap(), Some(-1));
    }

    #[test]
    fn expire_participates_in_transaction_rollback() {
        let db = Database::new(EvictionPolicy::NoEviction);
        db.set(None, b"k", b"v".to_vec(), None).unwrap();

        let tx = db.begin(IsolationLevel::RepeatableRead).unwrap();
        db.expire(Some(tx), b"k", 100).unwrap();
        db.rollback(tx).unwrap();

        assert_eq!(db.ttl(None, b"k").unwrap(), Some(-1));
    }

    #[test]
    fn no_eviction_policy_returns_oom_once_over_budget() {
        let db = Database::new(EvictionPolicy::NoEviction);
        db.set_max_memory(4);
        let err = db.set(None, b"k", b"this value is long".to_vec(), None).unwrap_err();
        assert!(matches!(err, Error::Oom));
    }

    #[test]
    fn allkeys_lru_evicts_to_stay_under_budget() {
        let db = Database::new(EvictionPolicy::AllKeysLru);
        db.set(None, b"old", b"x".to_vec(), None).unwrap();
        db.get(None, b"old").unwrap();
        // "old" alone costs 4 bytes (3-byte key + 1-byte value); admitting
        // "new" at the same cost would total 8, over a budget of 6, forcing
        // eviction of "old" to make room.
        db.set_max_memory(6);
        db.set(None, b"new", b"y".to_vec(), None).unwrap();
        assert!(db.get(None, b"new").unwrap().is_some());
        assert!(db.get(None, b"old").unwrap().is_none());
    }
}
