//! # Call Tokens
//!
//! A call token is a 64-bit value composing a handler id with a local call
//! id: `(handler_id << 32) | local_id`. It routes one result to exactly one
//! handler and, within it, to exactly one pending call. Tokens are minted
//! when a call is issued and consumed exactly once.

use crate::error::Error;
use crate::error::Result;

/// Identifies one of the two canonical handler endpoints. Zero is reserved
/// as the null/error sentinel and is never a live handler.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum HandlerId {
    /// The handler living in this execution context.
    ThisContext = 1,
    /// The handler fronting the context's counterpart.
    Counterpart = 2,
}

impl HandlerId {
    /// Validate a raw id. Zero and out-of-range values are programming
    /// errors, never recoverable.
    pub fn from_raw(raw: i32) -> Result<Self> {
        match raw {
            0 => Err(Error::NullHandler),
            1 => Ok(Self::ThisContext),
            2 => Ok(Self::Counterpart),
            other => Err(Error::HandlerOutOfRange(other)),
        }
    }

    pub const fn raw(self) -> i32 {
        self as i32
    }
}

/// Compose a handler id and a local call id into a call token.
pub fn compose(handler: HandlerId, local_id: i32) -> i64 {
    ((handler.raw() as i64) << 32) | (local_id as u32 as i64)
}

/// Decompose a call token into its handler id and local call id.
pub fn decompose(token: i64) -> Result<(HandlerId, i32)> {
    let handler = HandlerId::from_raw((token >> 32) as i32)?;
    let local = (token & u32::MAX as i64) as i32;
    Ok((handler, local))
}

/// Largest source id that fits the high byte of a synchronous call id.
pub const SYNC_SOURCE_MAX: i32 = 0x7f;

/// Largest local id that fits the low 24 bits of a synchronous call id.
pub const SYNC_LOCAL_MAX: i32 = (1 << 24) - 1;

/// Fold a synchronous source id into the high byte of a call id:
/// `source_id << 24 | local_id`. Overflow of either part is a hard error.
pub fn fold_sync(source_id: i32, local_id: i32) -> Result<i32> {
    if !(1..=SYNC_SOURCE_MAX).contains(&source_id) {
        return Err(Error::SyncSourceOutOfRange(source_id));
    }
    if !(0..=SYNC_LOCAL_MAX).contains(&local_id) {
        return Err(Error::SyncLocalOutOfRange(local_id));
    }
    Ok((source_id << 24) | local_id)
}

/// The source id folded into a synchronous call id.
pub fn sync_source_of(call_id: i32) -> i32 {
    (call_id >> 24) & 0x7f
}
