//! # Error Definitions
//!
//! Failures of the buffer layer. These indicate broken framing or broken
//! local invariants; none of them are retryable.

/// Buffer access failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A read or write fell outside the buffer.
    OutOfBounds { offset: usize, len: usize, capacity: usize },
    /// The declared payload length is below the minimum for the frame kind.
    BufferTooShort { declared: i32, required: i32 },
    /// The scratch buffer was created below the protocol minimum.
    CapacityTooSmall { given: usize, minimum: usize },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfBounds { offset, len, capacity } => {
                write!(f, "access [{}..{}] outside buffer of {} bytes", offset, offset + len, capacity)
            }
            Self::BufferTooShort { declared, required } => {
                write!(f, "buffer too short: declared {} bytes, need {}", declared, required)
            }
            Self::CapacityTooSmall { given, minimum } => {
                write!(f, "scratch capacity {} below protocol minimum {}", given, minimum)
            }
        }
    }
}

impl std::error::Error for Error {}

/// A specialized Result type for buffer operations.
pub type Result<T> = std::result::Result<T, Error>;
