//! # Scratch Buffer
//!
//! The fixed-capacity interop buffer holding call arguments as little-endian
//! `i32` slots. Slot 0 is always the declared payload length; a frame is
//! written by zeroing slot 0, filling the remaining slots, and committing
//! the final length last, so a reader never observes a half-written frame
//! as valid.

use crate::error::Error;
use crate::error::Result;

/// Smallest scratch buffer the protocol can operate with: one outbound
/// `SCall` frame of seven `i32` slots.
pub const MIN_SCRATCH_CAPACITY: usize = 28;

/// Default scratch capacity when the endpoint does not configure one.
pub const DEFAULT_SCRATCH_CAPACITY: usize = 256;

/// Fixed-capacity slot buffer for interop call arguments.
pub struct ScratchBuffer {
    bytes: Vec<u8>,
}

impl ScratchBuffer {
    /// Create a scratch buffer of the given capacity in bytes.
    ///
    /// # Errors
    /// Returns `CapacityTooSmall` below [`MIN_SCRATCH_CAPACITY`].
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity < MIN_SCRATCH_CAPACITY {
            return Err(Error::CapacityTooSmall { given: capacity, minimum: MIN_SCRATCH_CAPACITY });
        }
        Ok(Self { bytes: vec![0; capacity] })
    }

    /// Capacity of this buffer in bytes.
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Write an `i32` slot (slot N covers bytes `4N..4N+4`).
    pub fn write_slot(&mut self, slot: usize, value: i32) -> Result<()> {
        let offset = slot * 4;
        if offset + 4 > self.bytes.len() {
            return Err(Error::OutOfBounds { offset, len: 4, capacity: self.bytes.len() });
        }
        self.bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Read an `i32` slot.
    pub fn read_slot(&self, slot: usize) -> Result<i32> {
        let offset = slot * 4;
        if offset + 4 > self.bytes.len() {
            return Err(Error::OutOfBounds { offset, len: 4, capacity: self.bytes.len() });
        }
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.bytes[offset..offset + 4]);
        Ok(i32::from_le_bytes(raw))
    }

    /// The declared payload length (slot 0).
    pub fn payload_length(&self) -> Result<i32> {
        self.read_slot(0)
    }

    /// Validate the declared payload length against the minimum a decoder
    /// needs for the frame kind it is about to read.
    ///
    /// # Errors
    /// `BufferTooShort` when the frame is undersized. Fatal; never retried.
    pub fn require_payload(&self, required: i32) -> Result<()> {
        let declared = self.payload_length()?;
        if declared < required {
            return Err(Error::BufferTooShort { declared, required });
        }
        Ok(())
    }

    /// Begin writing a frame: invalidate slot 0 so partial writes are never
    /// observed as complete.
    pub fn begin_frame(&mut self) -> Result<()> {
        self.write_slot(0, 0)
    }

    /// Commit a frame by writing its final payload length into slot 0.
    pub fn commit_frame(&mut self, payload_length: i32) -> Result<()> {
        self.write_slot(0, payload_length)
    }

    /// The raw first `len` bytes of the buffer (used when the scratch frame
    /// itself is the wire block, e.g. a void result).
    pub fn prefix(&self, len: usize) -> Result<&[u8]> {
        if len > self.bytes.len() {
            return Err(Error::OutOfBounds { offset: 0, len, capacity: self.bytes.len() });
        }
        Ok(&self.bytes[..len])
    }
}
