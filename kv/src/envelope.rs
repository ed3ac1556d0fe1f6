//! The per-version item envelope and its undo chain (§3).

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::value::Value;

pub type TxId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoKind {
    Set,
    Delete,
}

/// Links an envelope to the prior version it displaced. `prior` is an
/// immutable snapshot: once an envelope is pushed into the undo chain it is
/// never mutated again, only superseded by a new head.
#[derive(Debug)]
pub struct UndoRecord {
    pub kind: UndoKind,
    pub prior: Arc<Envelope>,
}

/// A single version of a key's value (§3 "Item envelope").
#[derive(Debug, Clone)]
pub struct Envelope {
    pub value: Value,
    pub expire_at: Option<u64>,
    pub last_access: u64,
    pub access_freq: u64,
    pub tx_id: TxId,
    pub undo: Option<Arc<UndoRecord>>,
    pub deleted: bool,
    pub discard: bool,
}

impl Envelope {
    pub fn new(value: Value, tx_id: TxId) -> Self {
        Self {
            value,
            expire_at: None,
            last_access: now_secs(),
            access_freq: 0,
            tx_id,
            undo: None,
            deleted: false,
            discard: false,
        }
    }

    /// A tombstone sentinel used as the synthesized tail when a key has
    /// never existed, so readers with older read views observe absence
    /// rather than this write (§4.3 edge case).
    pub fn deleted_sentinel(value: Value, tx_id: TxId) -> Self {
        let mut e = Self::new(value, tx_id);
        e.deleted = true;
        e
    }

    pub fn touch(&mut self) {
        self.last_access = now_secs();
        self.access_freq = self.access_freq.saturating_add(1);
    }

    pub fn is_expired(&self, now: u64) -> bool {
        matches!(self.expire_at, Some(at) if at <= now)
    }
}

pub fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn new_envelope_is_not_deleted_or_discarded() {
        let e = Envelope::new(Value::Str(b"v".to_vec()), 1);
        assert!(!e.deleted);
        assert!(!e.discard);
        assert!(e.undo.is_none());
    }

    #[test]
    fn deleted_sentinel_is_marked_deleted() {
        let e = Envelope::deleted_sentinel(Value::Str(vec![]), 0);
        assert!(e.deleted);
    }
}
