//! Error types shared across the storage engine, persistence, and Raft layers.

use std::fmt::{self, Display, Formatter};

pub type CResult<T> = std::result::Result<T, Error>;

/// Error kinds surfaced to clients at the protocol boundary, plus the
/// internal kinds used to propagate failures between subsystems.
#[derive(Debug)]
pub enum Error {
    /// Operation against a key holding a different value variant.
    WrongType(String),

    /// Malformed integer, score, offset, or count argument.
    InvalidArgument(String),

    /// Missing key for a read command.
    NotFound(String),

    /// EXEC/DISCARD without MULTI, nested MULTI, or a forbidden-in-tx verb.
    TransactionState(String),

    /// Raft command submitted to a non-leader, with a hint if known.
    NotLeader(Option<String>),

    /// Raft commit wait exceeded its deadline.
    Timeout(String),

    /// Eviction could not free enough memory to admit the mutation.
    Oom,

    /// Persistence I/O failure, protocol parse failure, or other invariant
    /// violation that does not fit a client-facing kind.
    Internal(String),

    /// Value parsing/encoding failure, kept distinct from `Internal` since
    /// call sites already distinguish `Error::Value(..)` from `Error::Parse(..)`.
    Value(String),

    /// Deserialization/parse failure (config lines, RDB/AOF records).
    Parse(String),

    /// Wraps `std::io::Error` so `?` composes through file-backed engines.
    Io(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Error::WrongType(msg) => write!(f, "WRONGTYPE {}", msg),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Error::NotFound(msg) => write!(f, "not found: {}", msg),
            Error::TransactionState(msg) => write!(f, "transaction state: {}", msg),
            Error::NotLeader(Some(hint)) => write!(f, "not leader, try {}", hint),
            Error::NotLeader(None) => write!(f, "not leader"),
            Error::Timeout(msg) => write!(f, "timeout: {}", msg),
            Error::Oom => write!(
                f,
                "OOM command not allowed when used memory > 'maxmemory'"
            ),
            Error::Internal(msg) => write!(f, "internal error: {}", msg),
            Error::Value(msg) => write!(f, "{}", msg),
            Error::Parse(msg) => write!(f, "parse error: {}", msg),
            Error::Io(msg) => write!(f, "io error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Error::Parse(err.to_string())
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(err: std::num::ParseIntError) -> Self {
        Error::InvalidArgument(err.to_string())
    }
}

impl From<std::num::ParseFloatError> for Error {
    fn from(err: std::num::ParseFloatError) -> Self {
        Error::InvalidArgument(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<fs4::lock_contended_error::Error> for Error {
    fn from(err: fs4::lock_contended_error::Error) -> Self {
        Error::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_type_formats_with_prefix() {
        let err = Error::WrongType("expected set, got list".into());
        assert_eq!(err.to_string(), "WRONGTYPE expected set, got list");
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
