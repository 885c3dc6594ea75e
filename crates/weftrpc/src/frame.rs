//! # Frame Layouts
//!
//! Encoding and decoding of the scratch/data buffer layouts for `SCall` and
//! `Res` frames. Writers populate the layouts before asking the transport
//! to deliver; the transport-side collectors assemble the packet buffers;
//! stagers copy inbound packet buffers into the data buffer for the handler
//! to decode. Field order and width here are a serialization contract.
//!
//! Layouts (little-endian `i32` slots, slot 0 = declared payload length):
//!
//! - `SCall` outbound, 28 bytes:
//!   `[28, header_off, header_len, name_off, name_len, args_off, args_len]`
//! - `SCall` inbound, 20 bytes:
//!   `[20, block_off, block_len, args_off, args_len]` where the block is
//!   `CallHeader ++ UTF-16LE method name`
//! - `Res` outbound void, 12 bytes: `[12, call_id, result_type]`; the
//!   scratch prefix itself is the wire block
//! - `Res` outbound valued, 20 bytes:
//!   `[20, call_id, result_type, value_off, value_len]`
//! - `Res` inbound, 12 bytes: `[12, block_off, block_len]` with the block
//!   `{payload, call_id, result_type, value?}` staged in the data buffer

use weftpack::DataBuffer;
use weftpack::ScratchBuffer;

use crate::error::Error;
use crate::error::Result;
use crate::header::CALL_HEADER_LEN;
use crate::header::CallHeader;

/// Outcome tag of a returned call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum ResultType {
    /// Execution succeeded and returned nothing.
    SuccessVoid = 0,
    /// Reserved. Never produced; decoders reject it.
    Allocated = 1,
    /// Execution succeeded and returned a JSON value.
    SuccessJson = 2,
    /// Reserved. Never produced; decoders reject it.
    FailedVoid = 3,
    /// Execution failed; the value is a serialized fault.
    Exception = 4,
}

impl ResultType {
    pub fn from_raw(raw: i32) -> Result<Self> {
        match raw {
            0 => Ok(Self::SuccessVoid),
            1 => Ok(Self::Allocated),
            2 => Ok(Self::SuccessJson),
            3 => Ok(Self::FailedVoid),
            4 => Ok(Self::Exception),
            other => Err(Error::UnsupportedResultType(other)),
        }
    }

    pub const fn raw(self) -> i32 {
        self as i32
    }
}

/// A decoded inbound `SCall` frame.
pub struct ScallFrame<'a> {
    pub header: CallHeader,
    pub method: String,
    /// UTF-8 JSON argument array, borrowed from the data buffer.
    pub args: &'a [u8],
}

/// A decoded inbound `Res` frame.
pub struct ResFrame<'a> {
    pub call_id: i32,
    pub result_type: ResultType,
    /// Present for `SuccessJson` and `Exception`.
    pub value: Option<&'a [u8]>,
}

/// Encode a method identifier to its UTF-16LE wire form.
pub fn encode_method_name(name: &str) -> Vec<u8> {
    name.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// Decode a UTF-16LE method identifier.
pub fn decode_method_name(bytes: &[u8]) -> Result<String> {
    if bytes.len() % 2 != 0 {
        return Err(Error::BadMethodNameEncoding);
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|_| Error::BadMethodNameEncoding)
}

fn read_i32(block: &[u8], offset: usize) -> Result<i32> {
    let end = offset + 4;
    if end > block.len() {
        return Err(Error::Pack(weftpack::Error::OutOfBounds {
            offset,
            len: 4,
            capacity: block.len(),
        }));
    }
    Ok(i32::from_le_bytes(block[offset..end].try_into().unwrap()))
}

/// Populate the outbound `SCall` layout: header, identifier, and arguments
/// staged in the data buffer, offsets in the scratch slots.
pub fn encode_scall(
    scratch: &mut ScratchBuffer,
    data: &mut DataBuffer,
    header: &CallHeader,
    method: &str,
    json_args: &[u8],
) -> Result<()> {
    scratch.begin_frame()?;

    let name = encode_method_name(method);
    let header_bytes = header.encode();
    let name_off = header_bytes.len();
    let args_off = name_off + name.len();

    data.ensure(args_off + json_args.len());
    data.write_at(0, &header_bytes)?;
    data.write_at(name_off, &name)?;
    data.write_at(args_off, json_args)?;

    scratch.write_slot(1, 0)?;
    scratch.write_slot(2, CALL_HEADER_LEN)?;
    scratch.write_slot(3, name_off as i32)?;
    scratch.write_slot(4, name.len() as i32)?;
    scratch.write_slot(5, args_off as i32)?;
    scratch.write_slot(6, json_args.len() as i32)?;
    scratch.commit_frame(28)?;
    Ok(())
}

/// Assemble the packet buffers for an outbound `SCall` frame:
/// `(header ++ method name, json args)`.
pub fn collect_scall(scratch: &ScratchBuffer, data: &DataBuffer) -> Result<(Vec<u8>, Vec<u8>)> {
    scratch.require_payload(28)?;

    let header_off = scratch.read_slot(1)? as usize;
    let header_len = scratch.read_slot(2)? as usize;
    let name_off = scratch.read_slot(3)? as usize;
    let name_len = scratch.read_slot(4)? as usize;
    let args_off = scratch.read_slot(5)? as usize;
    let args_len = scratch.read_slot(6)? as usize;

    let mut block = Vec::with_capacity(header_len + name_len);
    block.extend_from_slice(data.slice(header_off, header_len)?);
    block.extend_from_slice(data.slice(name_off, name_len)?);
    let args = data.slice(args_off, args_len)?.to_vec();
    Ok((block, args))
}

/// Stage an inbound `SCall` packet into the data buffer and populate the
/// 20-byte inbound layout.
pub fn stage_scall(
    scratch: &mut ScratchBuffer,
    data: &mut DataBuffer,
    block: &[u8],
    json_args: &[u8],
) -> Result<()> {
    scratch.begin_frame()?;

    data.ensure(block.len() + json_args.len());
    data.write_at(0, block)?;
    data.write_at(block.len(), json_args)?;

    scratch.write_slot(1, 0)?;
    scratch.write_slot(2, block.len() as i32)?;
    scratch.write_slot(3, block.len() as i32)?;
    scratch.write_slot(4, json_args.len() as i32)?;
    scratch.commit_frame(20)?;
    Ok(())
}

/// Decode a staged inbound `SCall` frame.
pub fn decode_scall<'a>(scratch: &ScratchBuffer, data: &'a DataBuffer) -> Result<ScallFrame<'a>> {
    scratch.require_payload(20)?;

    let block_off = scratch.read_slot(1)? as usize;
    let block_len = scratch.read_slot(2)? as usize;
    let args_off = scratch.read_slot(3)? as usize;
    let args_len = scratch.read_slot(4)? as usize;

    let block = data.slice(block_off, block_len)?;
    let header = CallHeader::decode(block)?;
    let split = header.payload_length as usize;
    if split > block.len() {
        return Err(Error::Pack(weftpack::Error::BufferTooShort {
            declared: block.len() as i32,
            required: header.payload_length,
        }));
    }
    let method = decode_method_name(&block[split..])?;
    let args = data.slice(args_off, args_len)?;

    Ok(ScallFrame { header, method, args })
}

/// Populate the 12-byte void result layout. The scratch prefix is the wire
/// block itself.
pub fn encode_res_void(scratch: &mut ScratchBuffer, call_id: i32) -> Result<()> {
    scratch.begin_frame()?;
    scratch.write_slot(1, call_id)?;
    scratch.write_slot(2, ResultType::SuccessVoid.raw())?;
    scratch.commit_frame(12)?;
    Ok(())
}

/// Populate the 20-byte valued result layout with the value staged in the
/// data buffer.
pub fn encode_res_value(
    scratch: &mut ScratchBuffer,
    data: &mut DataBuffer,
    call_id: i32,
    result_type: ResultType,
    value: &[u8],
) -> Result<()> {
    scratch.begin_frame()?;

    data.ensure(value.len());
    data.write_at(0, value)?;

    scratch.write_slot(1, call_id)?;
    scratch.write_slot(2, result_type.raw())?;
    scratch.write_slot(3, 0)?;
    scratch.write_slot(4, value.len() as i32)?;
    scratch.commit_frame(20)?;
    Ok(())
}

/// Assemble the wire block for an outbound `Res` frame:
/// `{payload, call_id, result_type, value?}`.
pub fn collect_res(scratch: &ScratchBuffer, data: &DataBuffer) -> Result<Vec<u8>> {
    scratch.require_payload(12)?;

    let result_type = ResultType::from_raw(scratch.read_slot(2)?)?;
    if result_type == ResultType::SuccessVoid {
        return Ok(scratch.prefix(12)?.to_vec());
    }

    scratch.require_payload(20)?;
    let call_id = scratch.read_slot(1)?;
    let value_off = scratch.read_slot(3)? as usize;
    let value_len = scratch.read_slot(4)? as usize;
    let value = data.slice(value_off, value_len)?;

    let mut block = Vec::with_capacity(12 + value.len());
    block.extend_from_slice(&(value.len() as i32 + 12).to_le_bytes());
    block.extend_from_slice(&call_id.to_le_bytes());
    block.extend_from_slice(&result_type.raw().to_le_bytes());
    block.extend_from_slice(value);
    Ok(block)
}

/// Stage an inbound `Res` block into the data buffer and populate the
/// 12-byte inbound layout.
pub fn stage_res(scratch: &mut ScratchBuffer, data: &mut DataBuffer, block: &[u8]) -> Result<()> {
    scratch.begin_frame()?;

    data.ensure(block.len());
    data.write_at(0, block)?;

    scratch.write_slot(1, 0)?;
    scratch.write_slot(2, block.len() as i32)?;
    scratch.commit_frame(12)?;
    Ok(())
}

/// Decode a staged inbound `Res` frame. Reserved result types are rejected
/// here rather than surfaced to callers.
pub fn decode_res<'a>(scratch: &ScratchBuffer, data: &'a DataBuffer) -> Result<ResFrame<'a>> {
    scratch.require_payload(12)?;

    let block_off = scratch.read_slot(1)? as usize;
    let block_len = scratch.read_slot(2)? as usize;
    let block = data.slice(block_off, block_len)?;

    let payload = read_i32(block, 0)?;
    let call_id = read_i32(block, 4)?;
    let result_type = ResultType::from_raw(read_i32(block, 8)?)?;

    let value = match result_type {
        ResultType::SuccessVoid => None,
        ResultType::SuccessJson | ResultType::Exception => {
            let end = payload as usize;
            if end < 12 || end > block.len() {
                return Err(Error::Pack(weftpack::Error::BufferTooShort {
                    declared: block.len() as i32,
                    required: payload,
                }));
            }
            Some(&block[12..end])
        }
        ResultType::Allocated | ResultType::FailedVoid => {
            return Err(Error::UnsupportedResultType(result_type.raw()));
        }
    };

    Ok(ResFrame { call_id, result_type, value })
}

/// Decode a `Res` wire block directly (the synchronous bridge hands blocks
/// to the blocked caller without staging them through a handler).
pub fn decode_res_block(block: &[u8]) -> Result<(i32, ResultType, Option<Vec<u8>>)> {
    let payload = read_i32(block, 0)?;
    let call_id = read_i32(block, 4)?;
    let result_type = ResultType::from_raw(read_i32(block, 8)?)?;

    let value = match result_type {
        ResultType::SuccessVoid => None,
        ResultType::SuccessJson | ResultType::Exception => {
            let end = payload as usize;
            if end < 12 || end > block.len() {
                return Err(Error::Pack(weftpack::Error::BufferTooShort {
                    declared: block.len() as i32,
                    required: payload,
                }));
            }
            Some(block[12..end].to_vec())
        }
        ResultType::Allocated | ResultType::FailedVoid => {
            return Err(Error::UnsupportedResultType(result_type.raw()));
        }
    };

    Ok((call_id, result_type, value))
}
