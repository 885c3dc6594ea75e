//! # Call Header
//!
//! The 12-byte header prefixed to every outbound call: declared length,
//! unique call id, and call-kind flags.

use std::sync::atomic::AtomicI32;
use std::sync::atomic::Ordering;

use crate::error::Error;
use crate::error::Result;

/// Size of an encoded [`CallHeader`] in bytes.
pub const CALL_HEADER_LEN: i32 = 12;

/// Call metadata flags. `Static` is the absence of any other flag.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CallKind(i32);

impl CallKind {
    pub const STATIC: CallKind = CallKind(0);
    pub const INSTANCE: CallKind = CallKind(1);
    pub const CTOR: CallKind = CallKind(2);
    pub const SYNC: CallKind = CallKind(4);

    pub const fn from_bits(bits: i32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> i32 {
        self.0
    }

    pub const fn with(self, other: CallKind) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, other: CallKind) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when the `Sync` flag is set.
    pub const fn is_sync(self) -> bool {
        self.contains(Self::SYNC)
    }
}

/// Header of a serialized method call. Immutable once constructed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CallHeader {
    /// Size of this header in bytes, fixed at 12.
    pub payload_length: i32,
    /// Unique id of this call within the issuing context's lifetime.
    pub call_id: i32,
    /// Call metadata flags.
    pub call_kind: CallKind,
}

impl CallHeader {
    /// Build a header with a fresh call id drawn from `ids`.
    pub fn new(call_kind: CallKind, ids: &CallIdSource) -> Self {
        Self { payload_length: CALL_HEADER_LEN, call_id: ids.next(), call_kind }
    }

    /// Build a header around an already-minted call id (the synchronous
    /// path folds its source id into the call id before construction).
    pub fn with_call_id(call_kind: CallKind, call_id: i32) -> Self {
        Self { payload_length: CALL_HEADER_LEN, call_id, call_kind }
    }

    /// Encode to the 12-byte wire form.
    pub fn encode(&self) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[0..4].copy_from_slice(&self.payload_length.to_le_bytes());
        out[4..8].copy_from_slice(&self.call_id.to_le_bytes());
        out[8..12].copy_from_slice(&self.call_kind.bits().to_le_bytes());
        out
    }

    /// Decode from the first 12 bytes of `block`.
    ///
    /// # Errors
    /// `BufferTooShort` when the block cannot hold a header.
    pub fn decode(block: &[u8]) -> Result<Self> {
        if block.len() < 12 {
            return Err(Error::Pack(weftpack::Error::BufferTooShort {
                declared: block.len() as i32,
                required: CALL_HEADER_LEN,
            }));
        }
        Ok(Self {
            payload_length: i32::from_le_bytes(block[0..4].try_into().unwrap()),
            call_id: i32::from_le_bytes(block[4..8].try_into().unwrap()),
            call_kind: CallKind::from_bits(i32::from_le_bytes(block[8..12].try_into().unwrap())),
        })
    }
}

/// Monotonic source of call ids, unique within one issuing context.
///
/// Constructed explicitly and passed down rather than living in static
/// state, so tests get independent counters. Wraparound is outside the
/// session lifetime contract.
pub struct CallIdSource {
    next: AtomicI32,
}

impl CallIdSource {
    pub fn new() -> Self {
        Self { next: AtomicI32::new(0) }
    }

    /// Mint the next strictly increasing call id.
    pub fn next(&self) -> i32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for CallIdSource {
    fn default() -> Self {
        Self::new()
    }
}
