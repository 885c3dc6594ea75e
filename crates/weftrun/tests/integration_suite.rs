//! End-to-end suite: two contexts wired through in-process conduits.

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use rand::Rng;

use weftrpc::HandlerId;
use weftrpc::Packet;
use weftrpc::RemoteFault;
use weftrpc::ResultType;

use weftrun::CallError;
use weftrun::Dispatcher;
use weftrun::EndpointBuilder;
use weftrun::Handler;
use weftrun::Json;
use weftrun::ModuleConduit;
use weftrun::Router;
use weftrun::ScopeRegistry;
use weftrun::SyncBridge;
use weftrun::TablePort;
use weftrun::WorkerLink;
use weftrun::defer;
use weftrun::handler::HandlerError;

const WORKER_ID: i32 = 1;

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

#[derive(Debug)]
struct Boom;

impl From<Boom> for RemoteFault {
    fn from(_: Boom) -> Self {
        RemoteFault::new("the worker exploded", "Boom").with_source("worker")
    }
}

/// The callable surface the worker context exposes.
fn worker_registry() -> ScopeRegistry {
    let mut builder = ScopeRegistry::builder();
    {
        let scope = builder.scope("demo").unwrap();
        let calc = scope.ty("math.Calc").unwrap();
        calc.method("Add", |a: i32, b: i32| Json(a + b)).unwrap();
        calc.method("Concat", |a: String, b: String| Json(format!("{}{}", a, b))).unwrap();
        calc.method("Empty", || ()).unwrap();
        calc.method("Throws", || Err::<(), Boom>(Boom)).unwrap();
        calc.method("AddAfter", |a: i32, b: i32, delay_ms: u64| {
            defer(async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Json(a + b)
            })
        })
        .unwrap();
        calc.method("Never", || defer(std::future::pending::<Json<i32>>())).unwrap();
    }
    builder.finish()
}

/// The callable surface the coordinating context exposes to the worker.
fn coordinator_registry() -> ScopeRegistry {
    let mut builder = ScopeRegistry::builder();
    {
        let scope = builder.scope("host").unwrap();
        let console = scope.ty("Console").unwrap();
        console.method("Upper", |s: String| Json(s.to_uppercase())).unwrap();
    }
    builder.finish()
}

struct Fabric {
    link: WorkerLink,
    coordinator: Arc<Handler>,
    worker: Arc<Handler>,
    // Routers own the handlers; handlers only hold weak references back.
    _coordinator_router: Arc<Router>,
    _worker_router: Arc<Router>,
}

/// Wire a coordinator and a worker context together, complete the init
/// handshake, and hand back both handler ends.
async fn weave(bridge_interval: Duration, bridge_budget: Option<u32>) -> Fabric {
    init_tracing();

    let module = Arc::new(ModuleConduit::new());
    let worker_conduit = Arc::new(module.open_worker(WORKER_ID));

    let port = TablePort::new();
    let coordinator_bridge =
        Arc::new(SyncBridge::with_timing(port.clone(), bridge_interval, bridge_budget));
    let worker_bridge = Arc::new(SyncBridge::with_timing(port, bridge_interval, bridge_budget));

    let coordinator_router = Router::new();
    let coordinator = EndpointBuilder::new(
        HandlerId::Counterpart,
        Arc::new(Dispatcher::new(coordinator_registry())),
        module,
    )
    .bridge(coordinator_bridge)
    .install(&coordinator_router)
    .unwrap();

    let worker_router = Router::new();
    let worker = EndpointBuilder::new(
        HandlerId::ThisContext,
        Arc::new(Dispatcher::new(worker_registry())),
        worker_conduit,
    )
    .bridge(worker_bridge)
    .install(&worker_router)
    .unwrap();

    let (link, ready) = WorkerLink::start(coordinator.clone(), WORKER_ID).unwrap();
    worker.announce_ready(WORKER_ID).await.unwrap();
    ready.await.unwrap();

    Fabric {
        link,
        coordinator,
        worker,
        _coordinator_router: coordinator_router,
        _worker_router: worker_router,
    }
}

#[tokio::test]
async fn add_returns_serialized_sum() {
    let fabric = weave(Duration::from_millis(50), Some(20)).await;
    let sum: i32 = fabric
        .link
        .call("[demo]math.Calc:Add([core]i32,[core]i32)", &(2, 3))
        .unwrap()
        .invoke()
        .await
        .unwrap();
    assert_eq!(sum, 5);
}

#[tokio::test]
async fn empty_returns_void() {
    let fabric = weave(Duration::from_millis(50), Some(20)).await;
    fabric
        .link
        .call0::<()>("[demo]math.Calc:Empty()")
        .invoke()
        .await
        .unwrap();
}

#[tokio::test]
async fn throws_surfaces_the_original_type_name() {
    let fabric = weave(Duration::from_millis(50), Some(20)).await;
    let err = fabric
        .link
        .call0::<i32>("[demo]math.Calc:Throws()")
        .invoke()
        .await
        .unwrap_err();
    match err {
        CallError::Remote(fault) => {
            assert_eq!(fault.original_type_name, "Boom");
            assert_eq!(fault.message, "the worker exploded");
            assert_eq!(fault.source.as_deref(), Some("worker"));
        }
        other => panic!("expected remote fault, got {:?}", other),
    }
}

#[tokio::test]
async fn string_arguments_cross_the_channel() {
    let fabric = weave(Duration::from_millis(50), Some(20)).await;
    let joined: String = fabric
        .link
        .call("[demo]math.Calc:Concat([core]String,[core]String)", &("wa", "rp"))
        .unwrap()
        .invoke()
        .await
        .unwrap();
    assert_eq!(joined, "warp");
}

#[tokio::test]
async fn unknown_method_fails_the_call_not_the_channel() {
    let fabric = weave(Duration::from_millis(50), Some(20)).await;
    let err = fabric
        .link
        .call0::<i32>("[demo]math.Calc:Missing()")
        .invoke()
        .await
        .unwrap_err();
    match err {
        CallError::Remote(fault) => assert_eq!(fault.original_type_name, "ResolutionError"),
        other => panic!("expected resolution fault, got {:?}", other),
    }

    // The channel still works afterwards.
    let sum: i32 = fabric
        .link
        .call("[demo]math.Calc:Add([core]i32,[core]i32)", &(1, 1))
        .unwrap()
        .invoke()
        .await
        .unwrap();
    assert_eq!(sum, 2);
}

#[tokio::test]
async fn arity_mismatch_is_an_exception_result() {
    let fabric = weave(Duration::from_millis(50), Some(20)).await;
    let err = fabric
        .link
        .call::<i32, _>("[demo]math.Calc:Add([core]i32,[core]i32)", &(1, 2, 3))
        .unwrap()
        .invoke()
        .await
        .unwrap_err();
    match err {
        CallError::Remote(fault) => assert_eq!(fault.original_type_name, "ArgumentCountError"),
        other => panic!("expected arity fault, got {:?}", other),
    }
}

#[tokio::test]
async fn results_delivered_out_of_order_complete_their_own_futures() {
    let fabric = weave(Duration::from_millis(50), Some(20)).await;

    // The first call answers slower than the second, so its Res frame
    // arrives after the Res frame of the call issued later.
    let slow = fabric
        .link
        .call::<i32, _>("[demo]math.Calc:AddAfter([core]i32,[core]i32,[core]u64)", &(1, 2, 120u64))
        .unwrap()
        .begin()
        .await
        .unwrap();
    let fast = fabric
        .link
        .call::<i32, _>("[demo]math.Calc:AddAfter([core]i32,[core]i32,[core]u64)", &(30, 40, 10u64))
        .unwrap()
        .begin()
        .await
        .unwrap();

    let (slow_result, fast_result) = tokio::join!(slow, fast);
    assert_eq!(slow_result.unwrap(), 3);
    assert_eq!(fast_result.unwrap(), 70);
    assert_eq!(fabric.coordinator.pending_len(), 0);
}

#[tokio::test]
async fn many_concurrent_calls_correlate_correctly() {
    let fabric = weave(Duration::from_millis(50), Some(20)).await;
    let mut rng = rand::thread_rng();

    let mut handles = Vec::new();
    for i in 0..16i32 {
        let delay: u64 = rng.gen_range(1..60);
        let task = fabric
            .link
            .call::<i32, _>(
                "[demo]math.Calc:AddAfter([core]i32,[core]i32,[core]u64)",
                &(i, 1000, delay),
            )
            .unwrap();
        handles.push(tokio::spawn(task.invoke()));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let value = handle.await.unwrap().unwrap();
        assert_eq!(value, i as i32 + 1000);
    }
}

#[tokio::test]
async fn worker_calls_back_into_the_coordinator() {
    let fabric = weave(Duration::from_millis(50), Some(20)).await;
    let upper: String = fabric
        .worker
        .call("[host]Console:Upper([core]String)", &("quiet",), WORKER_ID)
        .unwrap()
        .invoke()
        .await
        .unwrap();
    assert_eq!(upper, "QUIET");
}

#[tokio::test]
async fn blocking_call_completes_through_the_bridge() {
    let fabric = weave(Duration::from_millis(20), Some(100)).await;
    let task = fabric
        .link
        .call::<i32, _>("[demo]math.Calc:Add([core]i32,[core]i32)", &(20, 22))
        .unwrap();

    let sum = tokio::task::spawn_blocking(move || task.wait()).await.unwrap().unwrap();
    assert_eq!(sum, 42);
}

#[tokio::test]
async fn blocking_call_surfaces_remote_faults() {
    let fabric = weave(Duration::from_millis(20), Some(100)).await;
    let task = fabric.link.call0::<i32>("[demo]math.Calc:Throws()");

    let err = tokio::task::spawn_blocking(move || task.wait()).await.unwrap().unwrap_err();
    match err {
        CallError::Remote(fault) => assert_eq!(fault.original_type_name, "Boom"),
        other => panic!("expected remote fault, got {:?}", other),
    }
}

#[tokio::test]
async fn blocking_call_times_out_when_no_response_arrives() {
    let fabric = weave(Duration::from_millis(50), Some(5)).await;
    let task = fabric.link.call0::<i32>("[demo]math.Calc:Never()");

    let started = Instant::now();
    let err = tokio::task::spawn_blocking(move || task.wait()).await.unwrap().unwrap_err();
    let elapsed = started.elapsed();

    match err {
        CallError::Timeout { polls, interval_ms } => {
            assert_eq!(polls, 5);
            assert_eq!(interval_ms, 50);
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(elapsed >= Duration::from_millis(250), "returned too early: {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(2000), "hung too long: {:?}", elapsed);
}

#[tokio::test]
async fn duplicate_result_is_rejected_not_applied() {
    let fabric = weave(Duration::from_millis(50), Some(20)).await;

    // First call on a fresh endpoint gets call id 0.
    let sum: i32 = fabric
        .link
        .call("[demo]math.Calc:Add([core]i32,[core]i32)", &(4, 4))
        .unwrap()
        .invoke()
        .await
        .unwrap();
    assert_eq!(sum, 8);

    // Replay a result for the already-completed call id.
    let mut block = Vec::new();
    block.extend_from_slice(&13i32.to_le_bytes());
    block.extend_from_slice(&0i32.to_le_bytes());
    block.extend_from_slice(&ResultType::SuccessJson.raw().to_le_bytes());
    block.push(b'9');

    let err = fabric.coordinator.deliver(Packet::res(block)).await.unwrap_err();
    assert!(matches!(err, HandlerError::UnknownCallId(0)));
}

#[tokio::test]
async fn result_for_unknown_call_id_is_fatal() {
    let fabric = weave(Duration::from_millis(50), Some(20)).await;

    let mut block = Vec::new();
    block.extend_from_slice(&12i32.to_le_bytes());
    block.extend_from_slice(&999i32.to_le_bytes());
    block.extend_from_slice(&ResultType::SuccessVoid.raw().to_le_bytes());

    let err = fabric.coordinator.deliver(Packet::res(block)).await.unwrap_err();
    assert!(matches!(err, HandlerError::UnknownCallId(999)));
}

#[tokio::test]
async fn init_for_unregistered_worker_is_fatal() {
    let fabric = weave(Duration::from_millis(50), Some(20)).await;
    let err = fabric.coordinator.deliver(Packet::init(77)).await.unwrap_err();
    assert!(matches!(err, HandlerError::UnknownInitAwaiter(77)));
}

#[tokio::test]
async fn init_awaiter_cannot_be_registered_twice() {
    let fabric = weave(Duration::from_millis(50), Some(20)).await;
    fabric.coordinator.register_init_awaiter(5).unwrap();
    let err = fabric.coordinator.register_init_awaiter(5).unwrap_err();
    assert!(matches!(err, HandlerError::DuplicateInitAwaiter(5)));
}

#[tokio::test]
async fn handlers_install_once_per_kind() {
    let fabric = weave(Duration::from_millis(50), Some(20)).await;

    let duplicate = Handler::new(
        HandlerId::Counterpart,
        Arc::new(ModuleConduit::new()),
        Arc::new(Dispatcher::new(coordinator_registry())),
        Arc::new(weftrpc::CallIdSource::new()),
        None,
    );
    assert!(fabric._coordinator_router.install(duplicate).is_err());
}

#[tokio::test]
async fn router_rejects_null_and_out_of_range_ids() {
    let fabric = weave(Duration::from_millis(50), Some(20)).await;
    assert!(fabric._coordinator_router.from_raw(0).is_err());
    assert!(fabric._coordinator_router.from_raw(9).is_err());
    assert!(fabric._coordinator_router.from_raw(2).is_ok());
}

#[tokio::test]
async fn unbound_handler_rejects_operations() {
    let handler = Handler::new(
        HandlerId::ThisContext,
        Arc::new(ModuleConduit::new()),
        Arc::new(Dispatcher::new(coordinator_registry())),
        Arc::new(weftrpc::CallIdSource::new()),
        None,
    );

    let err = handler.call_serialized("[x]Y:Z()", b"[]", WORKER_ID).await.unwrap_err();
    assert!(matches!(err, CallError::Protocol(_)));
}

#[tokio::test]
async fn malformed_method_identifier_fails_the_call() {
    let fabric = weave(Duration::from_millis(50), Some(20)).await;
    let err = fabric
        .link
        .call0::<i32>("[demo]math.Calc:Add(")
        .invoke()
        .await
        .unwrap_err();
    match err {
        CallError::Remote(fault) => assert_eq!(fault.original_type_name, "FormatError"),
        other => panic!("expected format fault, got {:?}", other),
    }
}

#[tokio::test]
async fn buffer_too_short_is_fatal_on_delivery() {
    let fabric = weave(Duration::from_millis(50), Some(20)).await;
    // A Res block shorter than its 12-byte minimum.
    let err = fabric.coordinator.deliver(Packet::res(vec![1, 2, 3])).await.unwrap_err();
    assert!(matches!(err, HandlerError::Wire(_)));

    // The identifier round-trip still works on the other direction.
    let sum: i32 = fabric
        .link
        .call("[demo]math.Calc:Add([core]i32,[core]i32)", &(2, 2))
        .unwrap()
        .invoke()
        .await
        .unwrap();
    assert_eq!(sum, 4);
}

#[tokio::test]
async fn identifier_roundtrip_reaches_the_registered_function() {
    use weftrun::MethodSpec;
    use weftrun::TypeIdent;

    let fabric = weave(Duration::from_millis(50), Some(20)).await;
    let spec = MethodSpec::new(TypeIdent::new("demo", "math.Calc").unwrap(), "Add")
        .unwrap()
        .param(TypeIdent::core("i32"))
        .param(TypeIdent::core("i32"));

    let sum: i32 = fabric
        .link
        .call(spec.identifier(), &(8, 9))
        .unwrap()
        .invoke()
        .await
        .unwrap();
    assert_eq!(sum, 17);
}
