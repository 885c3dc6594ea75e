//! # Message Handler
//!
//! One handler per logical endpoint. It owns the scratch/data buffer pair,
//! decodes inbound frames, drives the dispatcher for incoming calls, and
//! completes pending call cells for incoming results. The two handler
//! flavors differ only in the conduit used to notify the peer.
//!
//! ## States
//!
//! *Unbound* (buffers not attached) → *Ready* (`bind_buffers` called).
//! There is no close state. Buffer access is confined to the single
//! message turn holding the buffer lock; no two frames are ever decoded
//! concurrently against the same buffers.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::sync::Weak;
use std::sync::atomic::AtomicI32;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use tracing::warn;

use weftpack::DataBuffer;
use weftpack::ScratchBuffer;
use weftrpc::CallHeader;
use weftrpc::CallIdSource;
use weftrpc::CallKind;
use weftrpc::HandlerId;
use weftrpc::Packet;
use weftrpc::PacketKind;
use weftrpc::RemoteFault;
use weftrpc::ResultType;
use weftrpc::frame;
use weftrpc::token;

use crate::bridge::SyncBridge;
use crate::conduit;
use crate::conduit::Conduit;
use crate::invoker::Dispatcher;
use crate::registry::Invoked;
use crate::registry::Outcome;
use crate::router::Router;
use crate::task::CallCell;
use crate::task::CallError;
use crate::task::CallTask;

/// Handler-local protocol failures. Fatal for this endpoint.
#[derive(Debug)]
pub enum HandlerError {
    /// An operation ran before `bind_buffers`.
    Unbound,
    /// Frame encode/decode failed.
    Wire(weftrpc::Error),
    /// The notify primitive failed.
    Conduit(conduit::Error),
    /// A packet arrived without its required id field.
    MissingPacketId,
    /// A packet carried the wrong number of buffers for its kind.
    MalformedPacket,
    /// An init awaiter was registered twice for one worker.
    DuplicateInitAwaiter(i32),
    /// An `Init` arrived for a worker with no registered awaiter.
    UnknownInitAwaiter(i32),
    /// A `Res` arrived for a call id with no pending cell.
    UnknownCallId(i32),
    /// A result was reported for a slot that was never recorded.
    UnknownResultSlot(i32),
    /// A completion fired twice for the same call.
    DoubleCompletion(i32),
    /// A synchronous operation ran on a handler without a bridge.
    NoBridge,
    /// A return value failed to serialize.
    Serialize(String),
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unbound => write!(f, "handler buffers are not bound"),
            Self::Wire(e) => write!(f, "wire error: {}", e),
            Self::Conduit(e) => write!(f, "conduit error: {}", e),
            Self::MissingPacketId => write!(f, "packet is missing its id field"),
            Self::MalformedPacket => write!(f, "packet carries wrong buffer count for its kind"),
            Self::DuplicateInitAwaiter(w) => write!(f, "init awaiter already registered for worker {}", w),
            Self::UnknownInitAwaiter(w) => write!(f, "no init awaiter registered for worker {}", w),
            Self::UnknownCallId(id) => write!(f, "no pending call for call id {}", id),
            Self::UnknownResultSlot(slot) => write!(f, "no received call recorded for slot {}", slot),
            Self::DoubleCompletion(id) => write!(f, "call {} completed twice", id),
            Self::NoBridge => write!(f, "no synchronous bridge configured"),
            Self::Serialize(msg) => write!(f, "result serialization failed: {}", msg),
        }
    }
}

impl std::error::Error for HandlerError {}

impl From<weftrpc::Error> for HandlerError {
    fn from(e: weftrpc::Error) -> Self {
        Self::Wire(e)
    }
}

impl From<conduit::Error> for HandlerError {
    fn from(e: conduit::Error) -> Self {
        Self::Conduit(e)
    }
}

impl From<HandlerError> for CallError {
    fn from(e: HandlerError) -> Self {
        CallError::Protocol(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HandlerError>;

struct Buffers {
    scratch: ScratchBuffer,
    data: DataBuffer,
}

enum BindState {
    Unbound,
    Ready(Buffers),
}

impl BindState {
    fn ready_mut(&mut self) -> Result<&mut Buffers> {
        match self {
            Self::Ready(buffers) => Ok(buffers),
            Self::Unbound => Err(HandlerError::Unbound),
        }
    }
}

/// The per-endpoint message handler.
pub struct Handler {
    id: HandlerId,
    conduit: Arc<dyn Conduit>,
    dispatcher: Arc<Dispatcher>,
    ids: Arc<CallIdSource>,
    bridge: Option<Arc<SyncBridge>>,
    router: OnceLock<Weak<Router>>,
    buffers: Mutex<BindState>,
    /// Local call id → completion cell for calls this handler issued.
    pending: DashMap<i32, Arc<CallCell>>,
    /// Worker id → completion cell for worker initialization.
    init_awaiters: DashMap<i32, Arc<CallCell>>,
    /// Result-slot id → (source context, header) for calls received and
    /// awaiting a return value.
    received: DashMap<i32, (i32, CallHeader)>,
    receive_slots: AtomicI32,
}

impl Handler {
    pub fn new(
        id: HandlerId,
        conduit: Arc<dyn Conduit>,
        dispatcher: Arc<Dispatcher>,
        ids: Arc<CallIdSource>,
        bridge: Option<Arc<SyncBridge>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            conduit,
            dispatcher,
            ids,
            bridge,
            router: OnceLock::new(),
            buffers: Mutex::new(BindState::Unbound),
            pending: DashMap::new(),
            init_awaiters: DashMap::new(),
            received: DashMap::new(),
            receive_slots: AtomicI32::new(0),
        })
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Calls with results still in flight (issued side).
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn attach_router(&self, router: Weak<Router>) {
        // Re-attachment is harmless; the first registration wins.
        let _ = self.router.set(router);
    }

    /// Attach the scratch/data buffers, transitioning Unbound → Ready.
    pub fn bind_buffers(&self, scratch_capacity: usize, data_capacity: usize) -> Result<()> {
        let scratch = ScratchBuffer::new(scratch_capacity)
            .map_err(|e| HandlerError::Wire(e.into()))?;
        let data = DataBuffer::with_capacity(data_capacity);
        *self.buffers.lock().unwrap() = BindState::Ready(Buffers { scratch, data });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Apply one inbound packet. Errors are local protocol violations; the
    /// pump treats them as fatal for the endpoint.
    pub async fn deliver(&self, packet: Packet) -> Result<()> {
        debug!(handler = self.id.raw(), kind = packet.kind.as_str(), id = ?packet.id, "receive");
        match packet.kind {
            PacketKind::Init => {
                let worker = packet.id.ok_or(HandlerError::MissingPacketId)?;
                self.on_init(worker)
            }
            PacketKind::SCall => {
                let source = packet.id.ok_or(HandlerError::MissingPacketId)?;
                let [block, args] = packet.data.as_slice() else {
                    return Err(HandlerError::MalformedPacket);
                };
                self.on_scall(source, block, args).await
            }
            PacketKind::Res => {
                let [block] = packet.data.as_slice() else {
                    return Err(HandlerError::MalformedPacket);
                };
                self.on_res(block)
            }
        }
    }

    /// Worker initialization completed: resolve the registered awaiter.
    fn on_init(&self, worker: i32) -> Result<()> {
        let (_, cell) = self
            .init_awaiters
            .remove(&worker)
            .ok_or(HandlerError::UnknownInitAwaiter(worker))?;
        cell.set_success(None).map_err(|_| HandlerError::DoubleCompletion(worker))
    }

    /// Incoming method call: decode, record the result slot, dispatch.
    async fn on_scall(&self, source: i32, block: &[u8], args: &[u8]) -> Result<()> {
        let (header, method, args_owned) = {
            let mut guard = self.buffers.lock().unwrap();
            let buffers = guard.ready_mut()?;
            frame::stage_scall(&mut buffers.scratch, &mut buffers.data, block, args)?;
            let decoded = frame::decode_scall(&buffers.scratch, &buffers.data)?;
            (decoded.header, decoded.method, decoded.args.to_vec())
        };

        let slot = self.receive_slots.fetch_add(1, Ordering::Relaxed);
        self.received.insert(slot, (source, header));
        let call_token = token::compose(self.id, slot);

        debug!(method = %method, call_id = header.call_id, "dispatching");
        let invoked = match self.dispatcher.resolve(&method) {
            Ok(invoker) => invoker.invoke(&args_owned),
            Err(e) => Invoked::Ready(Outcome::Fault(e.to_fault())),
        };
        self.settle(call_token, invoked).await
    }

    /// Route a settled or deferred invocation outcome back to the caller.
    async fn settle(&self, call_token: i64, invoked: Invoked) -> Result<()> {
        match invoked {
            Invoked::Ready(outcome) => {
                let (_, slot) = token::decompose(call_token)?;
                self.report_slot(slot, outcome).await
            }
            Invoked::Deferred(fut) => {
                let router = self.router.get().cloned();
                tokio::spawn(async move {
                    let mut invoked = fut.await;
                    let outcome = loop {
                        match invoked {
                            Invoked::Ready(outcome) => break outcome,
                            Invoked::Deferred(next) => invoked = next.await,
                        }
                    };
                    let Some(router) = router.and_then(|weak| weak.upgrade()) else {
                        warn!(call_token, "deferred result dropped: router is gone");
                        return;
                    };
                    if let Err(e) = router.report(call_token, outcome).await {
                        warn!(call_token, error = %e, "deferred result dropped");
                    }
                });
                Ok(())
            }
        }
    }

    /// Incoming result: complete the pending cell it correlates to.
    fn on_res(&self, block: &[u8]) -> Result<()> {
        let (call_id, result_type, value) = {
            let mut guard = self.buffers.lock().unwrap();
            let buffers = guard.ready_mut()?;
            frame::stage_res(&mut buffers.scratch, &mut buffers.data, block)?;
            let decoded = frame::decode_res(&buffers.scratch, &buffers.data)?;
            (decoded.call_id, decoded.result_type, decoded.value.map(<[u8]>::to_vec))
        };

        let (_, cell) = self
            .pending
            .remove(&call_id)
            .ok_or(HandlerError::UnknownCallId(call_id))?;

        let completion = match result_type {
            ResultType::SuccessVoid => cell.set_success(None),
            ResultType::SuccessJson => cell.set_success(value),
            ResultType::Exception => {
                let bytes = value.unwrap_or_default();
                let fault = RemoteFault::from_json(&bytes).unwrap_or_else(|| {
                    RemoteFault::new("undecodable remote fault", "UnknownFault")
                });
                cell.set_fault(fault)
            }
            ResultType::Allocated | ResultType::FailedVoid => {
                return Err(HandlerError::Wire(weftrpc::Error::UnsupportedResultType(
                    result_type.raw(),
                )));
            }
        };
        completion.map_err(|_| HandlerError::DoubleCompletion(call_id))
    }

    // ------------------------------------------------------------------
    // Outbound calls
    // ------------------------------------------------------------------

    fn write_scall(
        &self,
        header: &CallHeader,
        method: &str,
        json_args: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut guard = self.buffers.lock().unwrap();
        let buffers = guard.ready_mut()?;
        frame::encode_scall(&mut buffers.scratch, &mut buffers.data, header, method, json_args)?;
        Ok(frame::collect_scall(&buffers.scratch, &buffers.data)?)
    }

    /// Issue a call from a serialized JSON argument array. Returns the
    /// completion cell registered in the pending-call table.
    pub async fn call_serialized(
        &self,
        method: &str,
        json_args: &[u8],
        worker: i32,
    ) -> std::result::Result<Arc<CallCell>, CallError> {
        let header = CallHeader::new(CallKind::STATIC, &self.ids);
        let cell = CallCell::new();
        self.pending.insert(header.call_id, cell.clone());

        let parts = self.write_scall(&header, method, json_args);
        let (block, args) = match parts {
            Ok(parts) => parts,
            Err(e) => {
                self.pending.remove(&header.call_id);
                return Err(e.into());
            }
        };

        if let Err(e) = self.conduit.post(worker, Packet::scall(worker, block, args)).await {
            self.pending.remove(&header.call_id);
            return Err(HandlerError::Conduit(e).into());
        }
        Ok(cell)
    }

    /// Issue a blocking call through the synchronous bridge. The call id
    /// folds the assigned source id into its high byte and sets the `Sync`
    /// flag; the result arrives through the bridge port, not the conduit.
    pub fn call_serialized_sync(
        &self,
        method: &str,
        json_args: &[u8],
        worker: i32,
    ) -> std::result::Result<Option<Vec<u8>>, CallError> {
        let bridge = self.bridge.as_deref().ok_or(HandlerError::NoBridge)?;
        let source = bridge.assign_source_id()?;
        let folded = token::fold_sync(source, self.ids.next())?;
        let header = CallHeader::with_call_id(CallKind::STATIC.with(CallKind::SYNC), folded);

        let (block, args) = self.write_scall(&header, method, json_args)?;
        self.conduit
            .post_blocking(worker, Packet::scall(worker, block, args))
            .map_err(HandlerError::Conduit)?;

        let response = bridge.wait(folded)?;
        let (call_id, result_type, value) = frame::decode_res_block(&response)?;
        if call_id != folded {
            return Err(CallError::Protocol(format!(
                "sync response correlation mismatch: sent {}, received {}",
                folded, call_id
            )));
        }
        match result_type {
            ResultType::SuccessVoid => Ok(None),
            ResultType::SuccessJson => Ok(value),
            ResultType::Exception => {
                let bytes = value.unwrap_or_default();
                match RemoteFault::from_json(&bytes) {
                    Some(fault) => Err(CallError::Remote(fault)),
                    None => Err(CallError::Protocol("undecodable remote fault".into())),
                }
            }
            other => Err(CallError::Protocol(format!("unsupported result type {}", other.raw()))),
        }
    }

    /// Build a typed call task for `method` with positional arguments.
    /// Arguments serialize as a JSON array; pass them as a tuple.
    pub fn call<T, A>(
        self: &Arc<Self>,
        method: impl Into<String>,
        args: &A,
        worker: i32,
    ) -> std::result::Result<CallTask<T>, CallError>
    where
        T: DeserializeOwned,
        A: Serialize,
    {
        CallTask::with_args(self.clone(), worker, method, args)
    }

    /// Build a typed call task for a zero-argument `method`.
    pub fn call0<T>(
        self: &Arc<Self>,
        method: impl Into<String>,
        worker: i32,
    ) -> CallTask<T>
    where
        T: DeserializeOwned,
    {
        CallTask::new(self.clone(), worker, method.into(), b"[]".to_vec())
    }

    // ------------------------------------------------------------------
    // Outbound results
    // ------------------------------------------------------------------

    fn take_received(&self, slot: i32) -> Result<(i32, CallHeader)> {
        self.received
            .remove(&slot)
            .map(|(_, entry)| entry)
            .ok_or(HandlerError::UnknownResultSlot(slot))
    }

    /// Report an invocation outcome for a recorded result slot.
    pub(crate) async fn report_slot(&self, slot: i32, outcome: Outcome) -> Result<()> {
        match outcome {
            Outcome::Void => self.return_result_void(slot).await,
            Outcome::Json(value) => {
                let json = serde_json::to_vec(&value)
                    .map_err(|e| HandlerError::Serialize(e.to_string()))?;
                self.return_serialized_bytes(slot, &json).await
            }
            Outcome::Fault(fault) => self.return_exception(slot, fault).await,
        }
    }

    /// Return a void success for the call recorded under `slot`.
    pub async fn return_result_void(&self, slot: i32) -> Result<()> {
        let (source, header) = self.take_received(slot)?;
        let block = {
            let mut guard = self.buffers.lock().unwrap();
            let buffers = guard.ready_mut()?;
            frame::encode_res_void(&mut buffers.scratch, header.call_id)?;
            frame::collect_res(&buffers.scratch, &buffers.data)?
        };
        self.send_result(source, &header, block).await
    }

    /// Serialize a value and return it for the call recorded under `slot`.
    pub async fn return_result_serialized<T: Serialize>(&self, value: &T, slot: i32) -> Result<()> {
        let json = serde_json::to_vec(value).map_err(|e| HandlerError::Serialize(e.to_string()))?;
        self.return_serialized_bytes(slot, &json).await
    }

    async fn return_serialized_bytes(&self, slot: i32, json: &[u8]) -> Result<()> {
        let (source, header) = self.take_received(slot)?;
        let block = {
            let mut guard = self.buffers.lock().unwrap();
            let buffers = guard.ready_mut()?;
            frame::encode_res_value(
                &mut buffers.scratch,
                &mut buffers.data,
                header.call_id,
                ResultType::SuccessJson,
                json,
            )?;
            frame::collect_res(&buffers.scratch, &buffers.data)?
        };
        self.send_result(source, &header, block).await
    }

    /// Return a wrapped exception for the call recorded under `slot`.
    pub async fn return_exception(&self, slot: i32, fault: RemoteFault) -> Result<()> {
        warn!(slot, fault = %fault, "call raised");
        let json = fault.to_json().map_err(|e| HandlerError::Serialize(e.to_string()))?;
        let (source, header) = self.take_received(slot)?;
        let block = {
            let mut guard = self.buffers.lock().unwrap();
            let buffers = guard.ready_mut()?;
            frame::encode_res_value(
                &mut buffers.scratch,
                &mut buffers.data,
                header.call_id,
                ResultType::Exception,
                &json,
            )?;
            frame::collect_res(&buffers.scratch, &buffers.data)?
        };
        self.send_result(source, &header, block).await
    }

    /// Sync-flagged calls answer through the bridge port; everything else
    /// goes back over the conduit.
    async fn send_result(&self, source: i32, header: &CallHeader, block: Vec<u8>) -> Result<()> {
        if header.call_kind.is_sync() {
            let bridge = self.bridge.as_deref().ok_or(HandlerError::NoBridge)?;
            bridge.port().post_response(header.call_id, block);
            return Ok(());
        }
        self.conduit.post(source, Packet::res(block)).await.map_err(HandlerError::Conduit)
    }

    // ------------------------------------------------------------------
    // Worker initialization
    // ------------------------------------------------------------------

    /// Register the awaiter resolved when `worker` reports ready.
    pub fn register_init_awaiter(&self, worker: i32) -> Result<Arc<CallCell>> {
        let cell = CallCell::new();
        if self.init_awaiters.insert(worker, cell.clone()).is_some() {
            return Err(HandlerError::DuplicateInitAwaiter(worker));
        }
        Ok(cell)
    }

    /// Announce this context's readiness to the counterpart (worker side).
    pub async fn announce_ready(&self, worker: i32) -> Result<()> {
        self.conduit.post(worker, Packet::init(worker)).await.map_err(HandlerError::Conduit)
    }
}
