use weftpack::DataBuffer;
use weftpack::ScratchBuffer;

use crate::error::Error;
use crate::fault::RemoteFault;
use crate::frame;
use crate::frame::ResultType;
use crate::header::CallHeader;
use crate::header::CallIdSource;
use crate::header::CallKind;
use crate::token;
use crate::token::HandlerId;

fn buffers() -> (ScratchBuffer, DataBuffer) {
    (ScratchBuffer::new(256).unwrap(), DataBuffer::new())
}

#[test]
fn header_encode_decode_roundtrip() {
    let ids = CallIdSource::new();
    let header = CallHeader::new(CallKind::STATIC.with(CallKind::SYNC), &ids);
    let decoded = CallHeader::decode(&header.encode()).unwrap();
    assert_eq!(decoded, header);
    assert!(decoded.call_kind.is_sync());
}

#[test]
fn header_decode_rejects_short_block() {
    assert!(matches!(CallHeader::decode(&[0u8; 11]), Err(Error::Pack(_))));
}

#[test]
fn call_ids_strictly_increase() {
    let ids = CallIdSource::new();
    let a = ids.next();
    let b = ids.next();
    let c = ids.next();
    assert!(a < b && b < c);
}

#[test]
fn call_kind_flags() {
    let kind = CallKind::INSTANCE.with(CallKind::SYNC);
    assert!(kind.contains(CallKind::INSTANCE));
    assert!(kind.is_sync());
    assert!(!kind.contains(CallKind::CTOR));
    assert!(!CallKind::STATIC.is_sync());
}

#[test]
fn token_compose_decompose() {
    let t = token::compose(HandlerId::Counterpart, 41);
    let (handler, local) = token::decompose(t).unwrap();
    assert_eq!(handler, HandlerId::Counterpart);
    assert_eq!(local, 41);
}

#[test]
fn token_negative_local_survives_roundtrip() {
    let t = token::compose(HandlerId::ThisContext, -5);
    let (handler, local) = token::decompose(t).unwrap();
    assert_eq!(handler, HandlerId::ThisContext);
    assert_eq!(local, -5);
}

#[test]
fn token_null_handler_is_fatal() {
    assert_eq!(token::decompose(7), Err(Error::NullHandler));
}

#[test]
fn token_out_of_range_handler_is_fatal() {
    let t = (9i64 << 32) | 7;
    assert_eq!(token::decompose(t), Err(Error::HandlerOutOfRange(9)));
}

#[test]
fn sync_fold_and_extract() {
    let folded = token::fold_sync(3, 0x00ab_cdef).unwrap();
    assert_eq!(folded, (3 << 24) | 0x00ab_cdef);
    assert_eq!(token::sync_source_of(folded), 3);
}

#[test]
fn sync_fold_bounds_are_hard_errors() {
    assert_eq!(token::fold_sync(0, 1), Err(Error::SyncSourceOutOfRange(0)));
    assert_eq!(token::fold_sync(128, 1), Err(Error::SyncSourceOutOfRange(128)));
    assert_eq!(token::fold_sync(1, 1 << 24), Err(Error::SyncLocalOutOfRange(1 << 24)));
    assert_eq!(token::fold_sync(1, -1), Err(Error::SyncLocalOutOfRange(-1)));
}

#[test]
fn method_name_utf16_roundtrip() {
    let name = "[demo]math.Calc:Add([core]i32,[core]i32)";
    let bytes = frame::encode_method_name(name);
    assert_eq!(bytes.len(), name.len() * 2);
    assert_eq!(frame::decode_method_name(&bytes).unwrap(), name);
}

#[test]
fn method_name_rejects_odd_length() {
    assert_eq!(frame::decode_method_name(&[0x41]), Err(Error::BadMethodNameEncoding));
}

#[test]
fn scall_outbound_collects_to_inbound_decode() {
    let (mut scratch, mut data) = buffers();
    let ids = CallIdSource::new();
    let header = CallHeader::new(CallKind::STATIC, &ids);

    frame::encode_scall(&mut scratch, &mut data, &header, "[demo]Calc:Add([core]i32)", b"[2]").unwrap();
    let (block, args) = frame::collect_scall(&scratch, &data).unwrap();

    // Receiver stages and decodes with its own buffers.
    let (mut peer_scratch, mut peer_data) = buffers();
    frame::stage_scall(&mut peer_scratch, &mut peer_data, &block, &args).unwrap();
    let decoded = frame::decode_scall(&peer_scratch, &peer_data).unwrap();

    assert_eq!(decoded.header, header);
    assert_eq!(decoded.method, "[demo]Calc:Add([core]i32)");
    assert_eq!(decoded.args, b"[2]");
}

#[test]
fn scall_decode_requires_min_payload() {
    let (mut scratch, data) = buffers();
    scratch.commit_frame(16).unwrap();
    assert!(matches!(frame::decode_scall(&scratch, &data), Err(Error::Pack(_))));
}

#[test]
fn res_void_roundtrip() {
    let (mut scratch, mut data) = buffers();
    frame::encode_res_void(&mut scratch, 99).unwrap();
    let block = frame::collect_res(&scratch, &data).unwrap();
    assert_eq!(block.len(), 12);

    frame::stage_res(&mut scratch, &mut data, &block).unwrap();
    let decoded = frame::decode_res(&scratch, &data).unwrap();
    assert_eq!(decoded.call_id, 99);
    assert_eq!(decoded.result_type, ResultType::SuccessVoid);
    assert!(decoded.value.is_none());
}

#[test]
fn res_value_roundtrip() {
    let (mut scratch, mut data) = buffers();
    frame::encode_res_value(&mut scratch, &mut data, 7, ResultType::SuccessJson, b"5").unwrap();
    let block = frame::collect_res(&scratch, &data).unwrap();

    let (mut peer_scratch, mut peer_data) = buffers();
    frame::stage_res(&mut peer_scratch, &mut peer_data, &block).unwrap();
    let decoded = frame::decode_res(&peer_scratch, &peer_data).unwrap();
    assert_eq!(decoded.call_id, 7);
    assert_eq!(decoded.result_type, ResultType::SuccessJson);
    assert_eq!(decoded.value, Some(&b"5"[..]));
}

#[test]
fn res_decode_rejects_reserved_result_types() {
    for reserved in [ResultType::Allocated, ResultType::FailedVoid] {
        let (mut scratch, mut data) = buffers();
        let mut block = Vec::new();
        block.extend_from_slice(&12i32.to_le_bytes());
        block.extend_from_slice(&1i32.to_le_bytes());
        block.extend_from_slice(&reserved.raw().to_le_bytes());

        frame::stage_res(&mut scratch, &mut data, &block).unwrap();
        assert_eq!(
            frame::decode_res(&scratch, &data).map(|_| ()),
            Err(Error::UnsupportedResultType(reserved.raw()))
        );
    }
}

#[test]
fn res_decode_rejects_unknown_result_type() {
    let (mut scratch, mut data) = buffers();
    let mut block = Vec::new();
    block.extend_from_slice(&12i32.to_le_bytes());
    block.extend_from_slice(&1i32.to_le_bytes());
    block.extend_from_slice(&17i32.to_le_bytes());

    frame::stage_res(&mut scratch, &mut data, &block).unwrap();
    assert_eq!(
        frame::decode_res(&scratch, &data).map(|_| ()),
        Err(Error::UnsupportedResultType(17))
    );
}

#[test]
fn res_block_direct_decode() {
    let (mut scratch, mut data) = buffers();
    let fault = RemoteFault::new("boom", "demo::Boom");
    let json = fault.to_json().unwrap();
    frame::encode_res_value(&mut scratch, &mut data, 3, ResultType::Exception, &json).unwrap();
    let block = frame::collect_res(&scratch, &data).unwrap();

    let (call_id, result_type, value) = frame::decode_res_block(&block).unwrap();
    assert_eq!(call_id, 3);
    assert_eq!(result_type, ResultType::Exception);
    assert_eq!(RemoteFault::from_json(&value.unwrap()).unwrap(), fault);
}

#[test]
fn fault_wire_field_names() {
    let fault = RemoteFault::new("no such method", "dispatch::ResolutionError")
        .with_source("worker")
        .with_stack_trace("at Calc::add");
    let json = String::from_utf8(fault.to_json().unwrap()).unwrap();
    assert!(json.contains("\"message\""));
    assert!(json.contains("\"stackTrace\""));
    assert!(json.contains("\"source\""));
    assert!(json.contains("\"originalTypeName\""));
}
