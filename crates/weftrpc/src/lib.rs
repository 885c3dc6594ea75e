//! # WeftRPC
//!
//! The wire protocol spoken between a coordinating context and its isolated
//! worker counterpart.
//!
//! ## Architecture
//!
//! Three message kinds cross the channel: `Init` (worker ready), `SCall`
//! (invoke a method from serialized arguments), and `Res` (return a call
//! result). Frames are laid out in the shared scratch/data buffer pair from
//! `weftpack`; this crate owns the exact field layout as a serialization
//! contract. Call results route back through 64-bit call tokens composing a
//! handler id with a per-call local id.
//!
//! ## Invariants
//! - **Declared Length First**: every frame decode validates the scratch
//!   payload length before reading any field.
//! - **Bit-Exact Layout**: headers are 12 bytes, result blocks are
//!   `{payload, call_id, result_type, value?}`, method identifiers travel
//!   as UTF-16LE, JSON as UTF-8.

pub mod error;
pub mod fault;
pub mod frame;
pub mod header;
pub mod message;
pub mod token;

pub use error::Error;
pub use error::Result;
pub use fault::RemoteFault;
pub use frame::ResFrame;
pub use frame::ResultType;
pub use frame::ScallFrame;
pub use header::CallHeader;
pub use header::CallIdSource;
pub use header::CallKind;
pub use message::Packet;
pub use message::PacketKind;
pub use token::HandlerId;

#[cfg(test)]
mod tests;
