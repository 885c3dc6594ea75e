//! # Data Buffer
//!
//! The growable interop buffer holding variable-length payloads (staged
//! method identifiers, JSON arguments, result blocks). Capacity starts at
//! [`DATA_BUFFER_INITIAL`] and doubles until the required length fits; the
//! old allocation is released rather than grown in place, matching the
//! transport contract that offsets are only valid within one staging turn.

use crate::error::Error;
use crate::error::Result;

/// Initial capacity of the data buffer in bytes.
pub const DATA_BUFFER_INITIAL: usize = 1024;

/// Growable staging buffer addressed by offset.
pub struct DataBuffer {
    bytes: Vec<u8>,
}

impl DataBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DATA_BUFFER_INITIAL)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { bytes: vec![0; capacity.max(1)] }
    }

    /// Capacity of this buffer in bytes.
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Ensure the buffer can hold `required` bytes, doubling as needed.
    /// Growth discards the previous contents.
    pub fn ensure(&mut self, required: usize) {
        if self.bytes.len() >= required {
            return;
        }
        let mut capacity = self.bytes.len();
        while capacity < required {
            capacity *= 2;
        }
        self.bytes = vec![0; capacity];
    }

    /// Copy `src` into the buffer at `offset`.
    pub fn write_at(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        let end = offset + src.len();
        if end > self.bytes.len() {
            return Err(Error::OutOfBounds { offset, len: src.len(), capacity: self.bytes.len() });
        }
        self.bytes[offset..end].copy_from_slice(src);
        Ok(())
    }

    /// Borrow `len` bytes at `offset`.
    pub fn slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let end = offset + len;
        if end > self.bytes.len() {
            return Err(Error::OutOfBounds { offset, len, capacity: self.bytes.len() });
        }
        Ok(&self.bytes[offset..end])
    }
}

impl Default for DataBuffer {
    fn default() -> Self {
        Self::new()
    }
}
