//! The state machine interface applied entries are committed against
//! (§4.8 "state-machine interface apply/snapshot/restore"). `Database`
//! (`crate::engine::Database`) implements the concrete instance used in
//! production; tests use a simple in-memory log for clarity.

use crate::error::CResult;

pub trait StateMachine: Send {
    /// Applies one committed log entry's opaque command bytes.
    fn apply(&mut self, command: &[u8]) -> CResult<()>;

    /// Serializes current state into a snapshot blob, used after
    /// `RaftLog::compact_through`.
    fn snapshot(&self) -> CResult<Vec<u8>>;

    /// Restores state machine state from a snapshot blob, used when a
    /// follower falls behind the leader's retained log.
    fn restore(&mut self, snapshot: &[u8]) -> CResult<()>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    #[derive(Default)]
    pub struct RecordingStateMachine {
        pub applied: Vec<Vec<u8>>,
    }

    impl StateMachine for RecordingStateMachine {
        fn apply(&mut self, command: &[u8]) -> CResult<()> {
            self.applied.push(command.to_vec());
            Ok(())
        }

        fn snapshot(&self) -> CResult<Vec<u8>> {
            Ok(self.applied.concat())
        }

        fn restore(&mut self, snapshot: &[u8]) -> CResult<()> {
            self.applied = vec![snapshot.to_vec()];
            Ok(())
        }
    }
}
