//! # Endpoint Builder
//!
//! Fluent composition of one endpoint: handler id, dispatcher, conduit,
//! optional synchronous bridge, and buffer sizing. `install` binds the
//! buffers, registers the handler with the router, and spawns its receive
//! pump.

use std::sync::Arc;

use weftpack::data::DATA_BUFFER_INITIAL;
use weftpack::scratch::DEFAULT_SCRATCH_CAPACITY;
use weftrpc::CallIdSource;
use weftrpc::HandlerId;

use crate::bridge::SyncBridge;
use crate::conduit;
use crate::conduit::Conduit;
use crate::handler::Handler;
use crate::handler::HandlerError;
use crate::invoker::Dispatcher;
use crate::router::Router;
use crate::router::RouterError;
use crate::task::CallFuture;
use crate::task::CallTask;

#[derive(Debug)]
pub enum BuilderError {
    Handler(HandlerError),
    Router(RouterError),
}

impl std::fmt::Display for BuilderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Handler(e) => write!(f, "handler error: {}", e),
            Self::Router(e) => write!(f, "router error: {}", e),
        }
    }
}

impl std::error::Error for BuilderError {}

impl From<HandlerError> for BuilderError {
    fn from(e: HandlerError) -> Self {
        Self::Handler(e)
    }
}

impl From<RouterError> for BuilderError {
    fn from(e: RouterError) -> Self {
        Self::Router(e)
    }
}

pub type Result<T> = std::result::Result<T, BuilderError>;

/// Fluent builder for one endpoint handler.
pub struct EndpointBuilder {
    id: HandlerId,
    dispatcher: Arc<Dispatcher>,
    conduit: Arc<dyn Conduit>,
    ids: Arc<CallIdSource>,
    bridge: Option<Arc<SyncBridge>>,
    scratch_capacity: usize,
    data_capacity: usize,
}

impl EndpointBuilder {
    pub fn new(id: HandlerId, dispatcher: Arc<Dispatcher>, conduit: Arc<dyn Conduit>) -> Self {
        Self {
            id,
            dispatcher,
            conduit,
            ids: Arc::new(CallIdSource::new()),
            bridge: None,
            scratch_capacity: DEFAULT_SCRATCH_CAPACITY,
            data_capacity: DATA_BUFFER_INITIAL,
        }
    }

    /// Share a call-id source between endpoints of one context.
    pub fn call_ids(mut self, ids: Arc<CallIdSource>) -> Self {
        self.ids = ids;
        self
    }

    /// Enable the synchronous bridge for this endpoint.
    pub fn bridge(mut self, bridge: Arc<SyncBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn scratch_capacity(mut self, bytes: usize) -> Self {
        self.scratch_capacity = bytes;
        self
    }

    pub fn data_capacity(mut self, bytes: usize) -> Self {
        self.data_capacity = bytes;
        self
    }

    /// Build the handler, bind its buffers, register it with the router,
    /// and spawn its receive pump.
    pub fn install(self, router: &Arc<Router>) -> Result<Arc<Handler>> {
        let handler = Handler::new(
            self.id,
            self.conduit.clone(),
            self.dispatcher,
            self.ids,
            self.bridge,
        );
        handler.bind_buffers(self.scratch_capacity, self.data_capacity)?;
        router.install(handler.clone())?;
        conduit::spawn_pump(handler.clone(), self.conduit);
        Ok(handler)
    }
}

/// A started worker as seen from the coordinating context: the counterpart
/// handler plus the worker's id and initialization future.
pub struct WorkerLink {
    handler: Arc<Handler>,
    worker: i32,
}

impl WorkerLink {
    /// Begin tracking a worker: registers the init awaiter and returns the
    /// link together with the future resolved by the worker's `Init`.
    pub fn start(handler: Arc<Handler>, worker: i32) -> Result<(Self, CallFuture<()>)> {
        let cell = handler.register_init_awaiter(worker)?;
        Ok((Self { handler, worker }, CallFuture::from_cell(cell)))
    }

    pub fn worker_id(&self) -> i32 {
        self.worker
    }

    pub fn handler(&self) -> &Arc<Handler> {
        &self.handler
    }

    /// Build a typed call task against this worker. Arguments serialize as
    /// a JSON array; pass them as a tuple.
    pub fn call<T, A>(&self, method: impl Into<String>, args: &A) -> crate::task::Result<CallTask<T>>
    where
        T: serde::de::DeserializeOwned,
        A: serde::Serialize,
    {
        self.handler.call(method, args, self.worker)
    }

    /// Build a typed call task for a zero-argument method.
    pub fn call0<T>(&self, method: impl Into<String>) -> CallTask<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.handler.call0(method, self.worker)
    }
}
