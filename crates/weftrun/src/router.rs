//! # Handler Router
//!
//! The registry mapping handler ids to live handlers: one slot for this
//! context's handler and one for the counterpart's. Constructed explicitly
//! and passed down, never static state, so each test (and each context)
//! gets its own registry. Creating either kind of handler more than once
//! is an error.

use std::sync::Arc;
use std::sync::OnceLock;

use weftrpc::HandlerId;
use weftrpc::token;

use crate::handler::Handler;
use crate::handler::HandlerError;
use crate::registry::Outcome;

#[derive(Debug)]
pub enum RouterError {
    /// A handler for this id already exists.
    AlreadyInstalled(HandlerId),
    /// No handler is installed under this id.
    NotInstalled(HandlerId),
    /// A call token carried a null or out-of-range handler id.
    Wire(weftrpc::Error),
    /// Routed reporting failed inside the handler.
    Handler(HandlerError),
}

impl std::fmt::Display for RouterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyInstalled(id) => write!(f, "handler {:?} already exists", id),
            Self::NotInstalled(id) => write!(f, "handler {:?} is not set", id),
            Self::Wire(e) => write!(f, "wire error: {}", e),
            Self::Handler(e) => write!(f, "handler error: {}", e),
        }
    }
}

impl std::error::Error for RouterError {}

impl From<weftrpc::Error> for RouterError {
    fn from(e: weftrpc::Error) -> Self {
        Self::Wire(e)
    }
}

pub type Result<T> = std::result::Result<T, RouterError>;

/// Per-context handler registry.
pub struct Router {
    this_context: OnceLock<Arc<Handler>>,
    counterpart: OnceLock<Arc<Handler>>,
}

impl Router {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { this_context: OnceLock::new(), counterpart: OnceLock::new() })
    }

    fn slot(&self, id: HandlerId) -> &OnceLock<Arc<Handler>> {
        match id {
            HandlerId::ThisContext => &self.this_context,
            HandlerId::Counterpart => &self.counterpart,
        }
    }

    /// Install a handler under its id. Installing either kind twice is an
    /// error.
    pub fn install(self: &Arc<Self>, handler: Arc<Handler>) -> Result<()> {
        let id = handler.id();
        handler.attach_router(Arc::downgrade(self));
        self.slot(id)
            .set(handler)
            .map_err(|_| RouterError::AlreadyInstalled(id))
    }

    /// Look up a live handler.
    pub fn get(&self, id: HandlerId) -> Result<Arc<Handler>> {
        self.slot(id).get().cloned().ok_or(RouterError::NotInstalled(id))
    }

    /// Look up by raw id; null and out-of-range ids are fatal.
    pub fn from_raw(&self, raw: i32) -> Result<Arc<Handler>> {
        self.get(HandlerId::from_raw(raw)?)
    }

    /// Route an invocation outcome by its call token: decompose, find the
    /// handler, report through it.
    pub async fn report(&self, call_token: i64, outcome: Outcome) -> Result<()> {
        let (handler_id, slot) = token::decompose(call_token)?;
        let handler = self.get(handler_id)?;
        handler.report_slot(slot, outcome).await.map_err(RouterError::Handler)
    }
}
