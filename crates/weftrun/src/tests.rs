//! Tests for dispatch, completion cells, and the synchronous bridge.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use weftrpc::RemoteFault;

use crate::bridge;
use crate::bridge::SyncBridge;
use crate::bridge::SyncPort;
use crate::bridge::TablePort;
use crate::invoker::DispatchError;
use crate::invoker::Dispatcher;
use crate::registry::Invoked;
use crate::registry::Json;
use crate::registry::Outcome;
use crate::registry::ScopeRegistry;
use crate::registry::defer;
use crate::task::CallCell;
use crate::task::CallError;

/// Error raised by the demo `Throws` method.
#[derive(Debug)]
struct DemoError;

impl From<DemoError> for RemoteFault {
    fn from(_: DemoError) -> Self {
        RemoteFault::new("demo failure", "DemoError").with_stack_trace("at Calc::throws")
    }
}

fn demo_dispatcher() -> Dispatcher {
    let mut builder = ScopeRegistry::builder();
    {
        let scope = builder.scope("demo").unwrap();
        let calc = scope.ty("math.Calc").unwrap();
        calc.method("Add", |a: i32, b: i32| Json(a + b)).unwrap();
        calc.method("Add", |a: f64, b: f64| Json(a + b + 0.5)).unwrap();
        calc.method("Empty", || ()).unwrap();
        calc.method("Throws", || Err::<(), DemoError>(DemoError)).unwrap();
        calc.method("Double", |x: i32| defer(async move { Json(x * 2) })).unwrap();
    }
    Dispatcher::new(builder.finish())
}

fn expect_json(invoked: Invoked) -> serde_json::Value {
    match invoked {
        Invoked::Ready(Outcome::Json(value)) => value,
        Invoked::Ready(Outcome::Void) => panic!("expected json outcome, got void"),
        Invoked::Ready(Outcome::Fault(fault)) => panic!("expected json outcome, got fault: {}", fault),
        Invoked::Deferred(_) => panic!("expected json outcome, got deferred"),
    }
}

fn expect_fault(invoked: Invoked) -> RemoteFault {
    match invoked {
        Invoked::Ready(Outcome::Fault(fault)) => fault,
        _ => panic!("expected fault outcome"),
    }
}

#[test]
fn dispatch_add_integers() {
    let dispatcher = demo_dispatcher();
    let invoker = dispatcher.resolve("[demo]math.Calc:Add([core]i32,[core]i32)").unwrap();
    let value = expect_json(invoker.invoke(b"[2,3]"));
    assert_eq!(value, serde_json::json!(5));
}

#[test]
fn dispatch_selects_overload_by_param_types() {
    let dispatcher = demo_dispatcher();
    let invoker = dispatcher.resolve("[demo]math.Calc:Add([core]f64,[core]f64)").unwrap();
    let value = expect_json(invoker.invoke(b"[1.0,2.0]"));
    assert_eq!(value, serde_json::json!(3.5));
}

#[test]
fn dispatch_void_result() {
    let dispatcher = demo_dispatcher();
    let invoker = dispatcher.resolve("[demo]math.Calc:Empty()").unwrap();
    match invoker.invoke(b"[]") {
        Invoked::Ready(Outcome::Void) => {}
        _ => panic!("expected void outcome"),
    }
}

#[test]
fn dispatch_target_error_becomes_fault() {
    let dispatcher = demo_dispatcher();
    let invoker = dispatcher.resolve("[demo]math.Calc:Throws()").unwrap();
    let fault = expect_fault(invoker.invoke(b"[]"));
    assert_eq!(fault.original_type_name, "DemoError");
    assert_eq!(fault.message, "demo failure");
}

#[test]
fn dispatch_arity_mismatch_is_a_fault_not_a_crash() {
    let dispatcher = demo_dispatcher();
    let invoker = dispatcher.resolve("[demo]math.Calc:Add([core]i32,[core]i32)").unwrap();

    let fault = expect_fault(invoker.invoke(b"[2]"));
    assert_eq!(fault.original_type_name, "ArgumentCountError");

    let fault = expect_fault(invoker.invoke(b"[1,2,3]"));
    assert_eq!(fault.original_type_name, "ArgumentCountError");
}

#[test]
fn dispatch_bad_argument_becomes_fault() {
    let dispatcher = demo_dispatcher();
    let invoker = dispatcher.resolve("[demo]math.Calc:Add([core]i32,[core]i32)").unwrap();
    let fault = expect_fault(invoker.invoke(b"[\"two\",3]"));
    assert_eq!(fault.original_type_name, "ArgumentDeserializationError");
}

#[test]
fn dispatch_malformed_args_array_becomes_fault() {
    let dispatcher = demo_dispatcher();
    let invoker = dispatcher.resolve("[demo]math.Calc:Empty()").unwrap();
    let fault = expect_fault(invoker.invoke(b"not json"));
    assert_eq!(fault.original_type_name, "ArgumentDeserializationError");
}

#[test]
fn dispatch_cache_builds_once() {
    let dispatcher = demo_dispatcher();
    let identifier = "[demo]math.Calc:Add([core]i32,[core]i32)";
    for _ in 0..10 {
        dispatcher.resolve(identifier).unwrap();
    }
    assert_eq!(dispatcher.build_count(), 1);

    dispatcher.resolve("[demo]math.Calc:Empty()").unwrap();
    assert_eq!(dispatcher.build_count(), 2);
}

#[test]
fn dispatch_resolution_errors_are_permanent_kinds() {
    let dispatcher = demo_dispatcher();

    let err = dispatcher.resolve("[nope]math.Calc:Add()").unwrap_err();
    assert!(matches!(err, DispatchError::ScopeNotFound(_)));
    assert_eq!(err.to_fault().original_type_name, "ResolutionError");

    let err = dispatcher.resolve("[demo]math.Missing:Add()").unwrap_err();
    assert!(matches!(err, DispatchError::TypeNotFound(_)));

    let err = dispatcher.resolve("[demo]math.Calc:Add([core]String)").unwrap_err();
    assert!(matches!(err, DispatchError::MethodNotFound(_)));

    let err = dispatcher.resolve("[demo]math.Calc:Add(").unwrap_err();
    assert!(matches!(err, DispatchError::Format(_)));
    assert_eq!(err.to_fault().original_type_name, "FormatError");
}

#[tokio::test]
async fn dispatch_deferred_settles_later() {
    let dispatcher = demo_dispatcher();
    let invoker = dispatcher.resolve("[demo]math.Calc:Double([core]i32)").unwrap();
    let Invoked::Deferred(fut) = invoker.invoke(b"[21]") else {
        panic!("expected deferred outcome");
    };
    let value = expect_json(fut.await);
    assert_eq!(value, serde_json::json!(42));
}

#[test]
fn cell_completes_at_most_once() {
    let cell = CallCell::new();
    cell.set_success(Some(b"1".to_vec())).unwrap();

    assert!(matches!(cell.set_success(Some(b"2".to_vec())), Err(CallError::Protocol(_))));
    assert!(matches!(
        cell.set_fault(RemoteFault::new("late", "DemoError")),
        Err(CallError::Protocol(_))
    ));
    assert_eq!(cell.take_result().unwrap(), Some(b"1".to_vec()));
}

#[test]
fn cell_rejects_result_before_completion() {
    let cell = CallCell::new();
    assert!(matches!(cell.take_result(), Err(CallError::NotCompleted)));
}

#[test]
fn cell_rejects_double_consume() {
    let cell = CallCell::new();
    cell.set_success(None).unwrap();
    cell.take_result().unwrap();
    assert!(matches!(cell.take_result(), Err(CallError::Protocol(_))));
}

#[test]
fn cell_fires_single_continuation() {
    let cell = CallCell::new();
    let fired = Arc::new(AtomicBool::new(false));

    let flag = fired.clone();
    cell.on_completed(move || flag.store(true, Ordering::SeqCst)).unwrap();

    assert!(matches!(cell.on_completed(|| ()), Err(CallError::Protocol(_))));

    cell.set_success(None).unwrap();
    assert!(fired.load(Ordering::SeqCst));
    assert!(matches!(cell.on_completed(|| ()), Err(CallError::Protocol(_))));
}

#[test]
fn cell_fault_surfaces_as_remote_error() {
    let cell = CallCell::new();
    cell.set_fault(RemoteFault::new("kaboom", "DemoError")).unwrap();
    match cell.take_result() {
        Err(CallError::Remote(fault)) => assert_eq!(fault.message, "kaboom"),
        other => panic!("expected remote fault, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn bridge_returns_posted_response() {
    let port = TablePort::new();
    let bridge = SyncBridge::with_timing(port.clone(), Duration::from_millis(10), Some(50));

    port.post_response(42, b"block".to_vec());
    assert_eq!(bridge.wait(42).unwrap(), b"block".to_vec());
    // Responses are taken, not peeked.
    assert!(port.try_take_response(42).is_none());
}

#[test]
fn bridge_times_out_after_budget() {
    let port = TablePort::new();
    let bridge = SyncBridge::with_timing(port, Duration::from_millis(50), Some(5));

    let started = Instant::now();
    let err = bridge.wait(7).unwrap_err();
    let elapsed = started.elapsed();

    assert_eq!(err, bridge::Error::Timeout { polls: 5, interval: Duration::from_millis(50) });
    assert!(elapsed >= Duration::from_millis(250), "timed out too early: {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(1000), "timed out too late: {:?}", elapsed);
}

#[test]
fn bridge_source_ids_are_small_and_increasing() {
    let port = TablePort::new();
    let a = port.assign_source_id().unwrap();
    let b = port.assign_source_id().unwrap();
    assert_eq!(a, 1);
    assert_eq!(b, 2);
}
