//! # Channel Packets
//!
//! The tagged byte-buffer envelope the channel primitive carries between
//! contexts. A packet is `{ kind, id?, data? }`: `Init` has no payload,
//! `SCall` carries the staged header+name block and the JSON arguments,
//! `Res` carries a single result block.

/// Message kind tag.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PacketKind {
    /// Worker initialization completed. No payload.
    Init,
    /// Call a method from serialized arguments.
    SCall,
    /// Return a method call result.
    Res,
}

impl PacketKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "Init",
            Self::SCall => "SCall",
            Self::Res => "Res",
        }
    }
}

/// One message crossing the channel.
#[derive(Clone, Debug)]
pub struct Packet {
    pub kind: PacketKind,
    /// `Init`: the worker id that finished initializing.
    /// `SCall`: the source context id results should route back to.
    /// `Res`: unused.
    pub id: Option<i32>,
    /// Transferred buffers, per the kind's contract.
    pub data: Vec<Vec<u8>>,
}

impl Packet {
    pub fn init(worker_id: i32) -> Self {
        Self { kind: PacketKind::Init, id: Some(worker_id), data: Vec::new() }
    }

    pub fn scall(source_id: i32, header_and_name: Vec<u8>, json_args: Vec<u8>) -> Self {
        Self { kind: PacketKind::SCall, id: Some(source_id), data: vec![header_and_name, json_args] }
    }

    pub fn res(block: Vec<u8>) -> Self {
        Self { kind: PacketKind::Res, id: None, data: vec![block] }
    }
}
