//! The three MVCC operations plus view construction: `mvcc::mvcc` holds the
//! transactional engine built on the envelope + undo-chain scheme (not a
//! TiKV-style versioned-key scheme).

use std::sync::Arc;

use crate::envelope::{Envelope, TxId, UndoKind, UndoRecord};
use crate::error::{CResult, Error};
use crate::mvcc::inner::InnerStorage;
use crate::mvcc::read_view::ReadView;
use crate::value::Value;

/// Ties `InnerStorage` to the transaction manager's view construction. This
/// is the "MVCC layer" of §4.3; the transaction lifecycle itself lives in
/// `mvcc::transaction::TransactionManager`.
#[derive(Default)]
pub struct MvccStore {
    inner: InnerStorage,
}

impl MvccStore {
    pub fn new() -> Self {
        Self { inner: InnerStorage::default() }
    }

    pub fn inner(&self) -> &InnerStorage {
        &self.inner
    }

    /// `get(read_view, key)` under a read lock (§4.3).
    pub fn get(&self, view: &ReadView, key: &[u8]) -> CResult<Option<Envelope>> {
        let Some(slot) = self.inner.lookup(key) else {
            return Ok(None);
        };
        let head = slot.lock().expect("envelope mutex poisoned").clone();

        if !head.discard && view.is_visible(head.tx_id) {
            return if head.deleted { Ok(None) } else { Ok(Some(head)) };
        }

        let mut cursor = head.undo.clone();
        while let Some(undo) = cursor {
            let prior = &undo.prior;
            if !prior.discard && view.is_visible(prior.tx_id) {
                return if prior.deleted { Ok(None) } else { Ok(Some((**prior).clone())) };
            }
            cursor = prior.undo.clone();
        }
        Ok(None)
    }

    /// `set(tx, key, value)` under a write lock (§4.3): allocates an undo
    /// record owning the previous head (or a synthesized deleted sentinel if
    /// the key was absent) and installs the new envelope as head. Clears any
    /// TTL the key previously had, matching a bare `SET`.
    pub fn set(&self, tx: TxId, key: &[u8], value: Value) -> CResult<()> {
        self.install(tx, key, value, false, None)
    }

    /// Like `set`, but carries the key's current `expire_at` forward instead
    /// of clearing it. Used by in-place mutations (HSET, LPUSH, INCR, ...)
    /// that, unlike a bare `SET`, must not reset an existing TTL.
    pub fn set_keep_expire(&self, tx: TxId, key: &[u8], value: Value) -> CResult<()> {
        let expire_at = self.current_expire_at(key);
        self.install(tx, key, value, false, expire_at)
    }

    /// Reinstalls `value` under a caller-supplied `expire_at`, participating
    /// in the same undo chain as every other write. Used by `EXPIRE` so a TTL
    /// change is itself a versioned, roll-back-able mutation.
    pub fn set_with_expire(&self, tx: TxId, key: &[u8], value: Value, expire_at: Option<u64>) -> CResult<()> {
        self.install(tx, key, value, false, expire_at)
    }

    fn current_expire_at(&self, key: &[u8]) -> Option<u64> {
        self.inner.lookup(key).and_then(|slot| slot.lock().expect("envelope mutex poisoned").expire_at)
    }

    /// `del(tx, key)` under a write lock (§4.3): installs a tombstone clone of
    /// the prior head, undo kind DELETE.
    pub fn del(&self, tx: TxId, key: &[u8]) -> CResult<()> {
        let existing = self.inner.lookup(key);
        let had_value = match &existing {
            Some(slot) => !slot.lock().expect("envelope mutex poisoned").deleted,
            None => false,
        };
        if !had_value {
            return Ok(());
        }
        let prior_value = existing
            .as_ref()
            .map(|slot| slot.lock().expect("envelope mutex poisoned").value.clone())
            .unwrap_or(Value::Str(Vec::new()));
        self.install(tx, key, prior_value, true, None)
    }

    fn install(&self, tx: TxId, key: &[u8], value: Value, tombstone: bool, expire_at: Option<u64>) -> CResult<()> {
        let map = self.inner.write_lock();
        let mut new_envelope = Envelope::new(value, tx);
        new_envelope.expire_at = expire_at;
        new_envelope.deleted = tombstone;

        if let Some(slot) = map.get(key) {
            let mut guard = slot.lock().expect("envelope mutex poisoned");
            let prior = Arc::new(guard.clone());
            new_envelope.undo = Some(Arc::new(UndoRecord {
                kind: if tombstone { UndoKind::Delete } else { UndoKind::Set },
                prior,
            }));
            *guard = new_envelope;
            return Ok(());
        }
        drop(map);

        // Edge case (§4.3): the key has never existed. Synthesize a deleted
        // sentinel as the chain's tail so older readers see absence rather
        // than this write.
        let sentinel = Envelope::deleted_sentinel(Value::Str(Vec::new()), 0);
        new_envelope.undo =
            Some(Arc::new(UndoRecord { kind: UndoKind::Set, prior: Arc::new(sentinel) }));
        let mut map = self.inner.write_lock();
        map.entry(key.to_vec())
            .or_insert_with(|| Arc::new(std::sync::Mutex::new(new_envelope.clone())));
        Ok(())
    }

    /// Marks an installed envelope `discard` so readers walking the undo
    /// chain skip it (used by `TransactionManager::rollback`).
    pub fn discard(&self, key: &[u8], tx: TxId) -> CResult<()> {
        let Some(slot) = self.inner.lookup(key) else {
            return Ok(());
        };
        let mut guard = slot.lock().expect("envelope mutex poisoned");
        if guard.tx_id == tx {
            guard.discard = true;
            return Ok(());
        }
        let mut cursor = guard.undo.clone();
        drop(guard);
        while let Some(undo) = cursor {
            if undo.prior.tx_id == tx {
                // Prior envelopes are immutable `Arc` snapshots once chained;
                // `TransactionManager::rollback` only calls `discard` before
                // any later commit can observe the version, so this should
                // only ever be reached at head.
                return Err(Error::Internal(
                    "cannot discard a version already superseded".into(),
                ));
            }
            cursor = undo.prior.undo.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view_seeing_all_committed(next: TxId) -> ReadView {
        ReadView { creator_tx: 0, low: next, high: next, actives: Default::default() }
    }

    #[test]
    fn get_on_missing_key_returns_none() {
        let store = MvccStore::new();
        let view = view_seeing_all_committed(10);
        assert!(store.get(&view, b"k").unwrap().is_none());
    }

    #[test]
    fn set_then_get_returns_value() {
        let store = MvccStore::new();
        store.set(1, b"k", Value::Str(b"v1".to_vec())).unwrap();
        let view = view_seeing_all_committed(2);
        let got = store.get(&view, b"k").unwrap().unwrap();
        assert_eq!(got.value.as_str().unwrap(), b"v1");
    }

    #[test]
    fn repeatable_read_sees_old_version_via_undo_chain() {
        let store = MvccStore::new();
        store.set(1, b"k", Value::Str(b"v1".to_vec())).unwrap();

        // View opened after tx 1 committed but before tx 2.
        let view = ReadView { creator_tx: 2, low: 2, high: 2, actives: Default::default() };

        store.set(2, b"k", Value::Str(b"v2".to_vec())).unwrap();

        let via_view = store.get(&view, b"k").unwrap().unwrap();
        assert_eq!(via_view.value.as_str().unwrap(), b"v1");

        let fresh = view_seeing_all_committed(3);
        let via_fresh = store.get(&fresh, b"k").unwrap().unwrap();
        assert_eq!(via_fresh.value.as_str().unwrap(), b"v2");
    }

    #[test]
    fn tombstone_visibility_scenario() {
        let store = MvccStore::new();
        store.set(1, b"k", Value::Str(b"v1".to_vec())).unwrap();

        let b_view = ReadView { creator_tx: 2, low: 2, high: 2, actives: Default::default() };
        assert_eq!(store.get(&b_view, b"k").unwrap().unwrap().value.as_str().unwrap(), b"v1");

        store.del(3, b"k").unwrap();

        assert_eq!(store.get(&b_view, b"k").unwrap().unwrap().value.as_str().unwrap(), b"v1");

        let fresh = view_seeing_all_committed(4);
        assert!(store.get(&fresh, b"k").unwrap().is_none());
    }

    #[test]
    fn first_write_to_never_existing_key_is_invisible_to_older_view() {
        let store = MvccStore::new();
        let old_view = ReadView { creator_tx: 1, low: 1, high: 1, actives: Default::default() };
        store.set(5, b"new-key", Value::Str(b"v".to_vec())).unwrap();
        assert!(store.get(&old_view, b"new-key").unwrap().is_none());
    }
}
