//! The replicated log. `log_start_index` (§4.8) lets a compacted log's
//! first retained entry sit above index 1, matching `dkv_raft.h`'s
//! `log_start_index` field used after `InstallSnapshot`.

use crate::raft::Term;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub index: u64,
    pub term: Term,
    pub command: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct RaftLog {
    entries: Vec<LogEntry>,
    /// Index of the first entry still held in `entries` (1 plus however many
    /// entries a snapshot has compacted away).
    pub log_start_index: u64,
}

impl RaftLog {
    pub fn new() -> Self {
        Self { entries: Vec::new(), log_start_index: 1 }
    }

    pub fn last_index(&self) -> u64 {
        self.log_start_index + self.entries.len() as u64 - 1
    }

    pub fn last_term(&self) -> Term {
        self.entries.last().map(|e| e.term).unwrap_or(0)
    }

    fn offset(&self, index: u64) -> Option<usize> {
        if index < self.log_start_index {
            return None;
        }
        let idx = (index - self.log_start_index) as usize;
        if idx < self.entries.len() {
            Some(idx)
        } else {
            None
        }
    }

    pub fn get(&self, index: u64) -> Option<&LogEntry> {
        self.offset(index).map(|i| &self.entries[i])
    }

    pub fn term_at(&self, index: u64) -> Option<Term> {
        if index == self.log_start_index.saturating_sub(1) {
            return Some(0);
        }
        self.get(index).map(|e| e.term)
    }

    pub fn append(&mut self, term: Term, command: Vec<u8>) -> u64 {
        let index = self.last_index() + 1;
        self.entries.push(LogEntry { index, term, command });
        index
    }

    /// Truncates any entries at or after `index`, used when a follower's log
    /// conflicts with the leader's `AppendEntries`.
    pub fn truncate_from(&mut self, index: u64) {
        if let Some(offset) = self.offset(index) {
            self.entries.truncate(offset);
        }
    }

    pub fn entries_from(&self, index: u64) -> Vec<LogEntry> {
        match self.offset(index) {
            Some(offset) => self.entries[offset..].to_vec(),
            None => Vec::new(),
        }
    }

    /// Discards entries up to and including `up_to_index`, recording the new
    /// `log_start_index` (§4.8 "log compaction via state-machine snapshot").
    pub fn compact_through(&mut self, up_to_index: u64) {
        if let Some(offset) = self.offset(up_to_index) {
            self.entries.drain(..=offset);
            self.log_start_index = up_to_index + 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_increments_index_from_one() {
        let mut log = RaftLog::new();
        assert_eq!(log.append(1, b"a".to_vec()), 1);
        assert_eq!(log.append(1, b"b".to_vec()), 2);
        assert_eq!(log.last_index(), 2);
    }

    #[test]
    fn truncate_from_drops_conflicting_suffix() {
        let mut log = RaftLog::new();
        log.append(1, b"a".to_vec());
        log.append(1, b"b".to_vec());
        log.append(2, b"c".to_vec());
        log.truncate_from(2);
        assert_eq!(log.last_index(), 1);
    }

    #[test]
    fn compact_through_advances_log_start_index() {
        let mut log = RaftLog::new();
        log.append(1, b"a".to_vec());
        log.append(1, b"b".to_vec());
        log.append(1, b"c".to_vec());
        log.compact_through(2);
        assert_eq!(log.log_start_index, 3);
        assert!(log.get(1).is_none());
        assert!(log.get(3).is_some());
    }
}
