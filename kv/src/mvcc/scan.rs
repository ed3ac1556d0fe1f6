//! MVCC-aware key scan: walks `InnerStorage`'s key order, resolving each
//! slot through the same visibility rule as `mvcc::mvcc::MvccStore::get`
//! (§4.3). Used by KEYS-style enumeration, RDB save, and DBSIZE.

use crate::envelope::Envelope;
use crate::mvcc::inner::{InnerStorage, Slot};
use crate::mvcc::read_view::ReadView;

/// A materialized, visibility-filtered snapshot of key/envelope pairs.
/// Building this eagerly (rather than a lazy iterator borrowing the map's
/// read lock) keeps the read lock held for the shortest possible span, at
/// the cost of allocating one `Vec` per scan; acceptable since `InnerStorage`
/// scans are assumed infrequent relative to point ops (§4.5).
pub fn scan(inner: &InnerStorage, view: &ReadView) -> Vec<(Vec<u8>, Envelope)> {
    let snapshot: Vec<(Vec<u8>, Slot)> = {
        let map = inner.read_lock();
        map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    };

    let mut out = Vec::with_capacity(snapshot.len());
    for (key, slot) in snapshot {
        if let Some(envelope) = resolve(&slot, view) {
            out.push((key, envelope));
        }
    }
    out
}

/// Scans only keys with the given prefix.
pub fn scan_prefix(inner: &InnerStorage, view: &ReadView, prefix: &[u8]) -> Vec<(Vec<u8>, Envelope)> {
    scan(inner, view).into_iter().filter(|(k, _)| k.starts_with(prefix)).collect()
}

fn resolve(slot: &Slot, view: &ReadView) -> Option<Envelope> {
    let head = slot.lock().expect("envelope mutex poisoned").clone();
    if !head.discard && view.is_visible(head.tx_id) {
        return if head.deleted { None } else { Some(head) };
    }
    let mut cursor = head.undo.clone();
    while let Some(undo) = cursor {
        let prior = &undo.prior;
        if !prior.discard && view.is_visible(prior.tx_id) {
            return if prior.deleted { None } else { Some((**prior).clone()) };
        }
        cursor = prior.undo.clone();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mvcc::mvcc::MvccStore;
    use crate::value::Value;

    #[test]
    fn scan_skips_tombstoned_and_invisible_keys() {
        let store = MvccStore::new();
        store.set(1, b"a", Value::Str(b"1".to_vec())).unwrap();
        store.set(2, b"b", Value::Str(b"2".to_vec())).unwrap();
        store.del(3, b"b").unwrap();

        let view = ReadView { creator_tx: 10, low: 10, high: 10, actives: Default::default() };
        let results = scan(store.inner(), &view);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, b"a");
    }

    #[test]
    fn scan_prefix_filters_by_key_prefix() {
        let store = MvccStore::new();
        store.set(1, b"user:1", Value::Str(b"x".to_vec())).unwrap();
        store.set(1, b"user:2", Value::Str(b"y".to_vec())).unwrap();
        store.set(1, b"other", Value::Str(b"z".to_vec())).unwrap();

        let view = ReadView { creator_tx: 10, low: 10, high: 10, actives: Default::default() };
        let results = scan_prefix(store.inner(), &view, b"user:");
        assert_eq!(results.len(), 2);
    }
}
