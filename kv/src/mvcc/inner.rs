//! Inner storage (§4.2): a mapping from key to the head envelope, guarded by
//! a single reader-writer lock. Per spec §9's Open Questions, this is the
//! canonical class — the C++ original's `MVCCInnerStorage`/`InnerStorage`
//! split collapses into this one type plus the MVCC operations in
//! `mvcc::engine`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::envelope::Envelope;

pub type Slot = Arc<Mutex<Envelope>>;

pub struct InnerStorage {
    map: RwLock<BTreeMap<Vec<u8>, Slot>>,
}

impl Default for InnerStorage {
    fn default() -> Self {
        Self { map: RwLock::new(BTreeMap::new()) }
    }
}

impl InnerStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, key: &[u8]) -> Option<Slot> {
        self.map.read().expect("inner storage poisoned").get(key).cloned()
    }

    /// Inserts a brand-new head slot for `key`, returning the slot. Used when
    /// a key has never existed and `mvcc::engine::set` needs a place to
    /// install the first envelope.
    pub fn insert(&self, key: Vec<u8>, slot: Slot) {
        self.map.write().expect("inner storage poisoned").insert(key, slot);
    }

    pub fn erase(&self, key: &[u8]) {
        self.map.write().expect("inner storage poisoned").remove(key);
    }

    pub fn read_lock(&self) -> RwLockReadGuard<'_, BTreeMap<Vec<u8>, Slot>> {
        self.map.read().expect("inner storage poisoned")
    }

    pub fn write_lock(&self) -> RwLockWriteGuard<'_, BTreeMap<Vec<u8>, Slot>> {
        self.map.write().expect("inner storage poisoned")
    }

    pub fn len(&self) -> usize {
        self.map.read().expect("inner storage poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates all keys under a single read lock, for RDB save / flush / DBSIZE.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.map.read().expect("inner storage poisoned").keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn lookup_missing_key_is_none() {
        let s = InnerStorage::new();
        assert!(s.lookup(b"k").is_none());
    }

    #[test]
    fn insert_then_lookup_finds_slot() {
        let s = InnerStorage::new();
        let slot = Arc::new(Mutex::new(Envelope::new(Value::Str(b"v".to_vec()), 1)));
        s.insert(b"k".to_vec(), slot);
        assert!(s.lookup(b"k").is_some());
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn erase_removes_key() {
        let s = InnerStorage::new();
        let slot = Arc::new(Mutex::new(Envelope::new(Value::Str(b"v".to_vec()), 1)));
        s.insert(b"k".to_vec(), slot);
        s.erase(b"k");
        assert!(s.lookup(b"k").is_none());
    }
}
