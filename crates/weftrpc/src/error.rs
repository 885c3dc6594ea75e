//! # Error Definitions
//!
//! Wire-level failures. Everything here is a protocol violation: a broken
//! invariant of the channel contract itself, fatal for the local endpoint
//! and never retried.

use weftpack::Error as PackError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Buffer framing failed (too short, out of bounds).
    Pack(PackError),
    /// A call token carried handler id 0, the null sentinel.
    NullHandler,
    /// A call token carried a handler id outside the registered range.
    HandlerOutOfRange(i32),
    /// A result block carried a result type the decoders do not accept
    /// (unknown, or one of the reserved values).
    UnsupportedResultType(i32),
    /// A synchronous source id does not fit the high byte of a call id.
    SyncSourceOutOfRange(i32),
    /// A local call id does not fit the low 24 bits of a sync call id.
    SyncLocalOutOfRange(i32),
    /// Method identifier bytes were not valid UTF-16LE.
    BadMethodNameEncoding,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pack(e) => write!(f, "buffer error: {}", e),
            Self::NullHandler => write!(f, "handler id is the null sentinel (0)"),
            Self::HandlerOutOfRange(id) => write!(f, "handler id {} out of range", id),
            Self::UnsupportedResultType(v) => write!(f, "unsupported result type {}", v),
            Self::SyncSourceOutOfRange(id) => write!(f, "sync source id {} does not fit the call id high byte", id),
            Self::SyncLocalOutOfRange(id) => write!(f, "local call id {} does not fit 24 bits", id),
            Self::BadMethodNameEncoding => write!(f, "method identifier is not valid UTF-16LE"),
        }
    }
}

impl std::error::Error for Error {}

impl From<PackError> for Error {
    fn from(e: PackError) -> Self {
        Self::Pack(e)
    }
}

/// A specialized Result type for wire operations.
pub type Result<T> = std::result::Result<T, Error>;
