//! # Call Futures
//!
//! Single-assignment, single-consumer completion for one in-flight call.
//!
//! [`CallCell`] is the completion slot registered in the pending-call
//! table: `set_success`/`set_fault` may each fire at most once across its
//! lifetime, and only one of the two; a second completion is a protocol
//! violation, rejected rather than applied. Exactly one consumer observes
//! the result, either through a registered continuation or through an
//! await on [`CallFuture`].
//!
//! [`CallTask`] represents a call that has not been issued yet. It fixes
//! one of two invocation strategies at first use, `begin` (asynchronous)
//! or `wait` (blocking, through the synchronous bridge), and consumes
//! itself doing so, so selecting a strategy twice cannot be expressed.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex;
use std::task::Context;
use std::task::Poll;
use std::task::Waker;

use serde::Serialize;
use serde::de::DeserializeOwned;

use weftrpc::RemoteFault;

use crate::handler::Handler;

/// Caller-visible failure of one call.
///
/// `Remote` means the remote function failed; everything else means the
/// local machinery failed. The two are distinct outcome kinds so a caller
/// can always tell them apart.
#[derive(Debug, Clone)]
pub enum CallError {
    /// The invoked function raised; this is its wrapped exception.
    Remote(RemoteFault),
    /// The result payload did not deserialize into the requested type.
    Decode(String),
    /// A broken protocol invariant on the local side.
    Protocol(String),
    /// The synchronous bridge exhausted its retry budget.
    Timeout { polls: u32, interval_ms: u64 },
    /// The result was read before completion.
    NotCompleted,
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote(fault) => write!(f, "remote call failed: {}", fault),
            Self::Decode(msg) => write!(f, "result decode failed: {}", msg),
            Self::Protocol(msg) => write!(f, "protocol violation: {}", msg),
            Self::Timeout { polls, interval_ms } => {
                write!(f, "synchronous call timed out after {} polls of {}ms", polls, interval_ms)
            }
            Self::NotCompleted => write!(f, "call is not completed"),
        }
    }
}

impl std::error::Error for CallError {}

impl From<RemoteFault> for CallError {
    fn from(fault: RemoteFault) -> Self {
        Self::Remote(fault)
    }
}

impl From<weftrpc::Error> for CallError {
    fn from(e: weftrpc::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CallError>;

/// The raw completion value: JSON bytes for a valued success, `None` for a
/// void success.
#[derive(Clone, Debug)]
pub enum CallOutcome {
    Success(Option<Vec<u8>>),
    Fault(RemoteFault),
}

enum Waiter {
    Idle,
    Callback(Box<dyn FnOnce() + Send>),
    Waker(Waker),
}

struct CellState {
    completed: bool,
    taken: bool,
    callback_registered: bool,
    outcome: Option<CallOutcome>,
    waiter: Waiter,
}

/// Single-assignment completion slot for one pending call.
pub struct CallCell {
    state: Mutex<CellState>,
}

impl std::fmt::Debug for CallCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("CallCell")
            .field("completed", &state.completed)
            .field("taken", &state.taken)
            .field("callback_registered", &state.callback_registered)
            .finish()
    }
}

impl CallCell {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CellState {
                completed: false,
                taken: false,
                callback_registered: false,
                outcome: None,
                waiter: Waiter::Idle,
            }),
        })
    }

    pub fn is_completed(&self) -> bool {
        self.state.lock().unwrap().completed
    }

    /// Register the one permitted continuation. Registering after
    /// completion, or a second time, is a protocol violation.
    pub fn on_completed(&self, f: impl FnOnce() + Send + 'static) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.completed {
            return Err(CallError::Protocol("continuation registered after completion".into()));
        }
        if state.callback_registered {
            return Err(CallError::Protocol("second continuation registered".into()));
        }
        state.callback_registered = true;
        state.waiter = Waiter::Callback(Box::new(f));
        Ok(())
    }

    /// Complete with success. At most once, and exclusive with `set_fault`.
    pub fn set_success(&self, json: Option<Vec<u8>>) -> Result<()> {
        self.complete(CallOutcome::Success(json))
    }

    /// Complete with the remote fault. At most once, and exclusive with
    /// `set_success`.
    pub fn set_fault(&self, fault: RemoteFault) -> Result<()> {
        self.complete(CallOutcome::Fault(fault))
    }

    fn complete(&self, outcome: CallOutcome) -> Result<()> {
        let waiter = {
            let mut state = self.state.lock().unwrap();
            if state.completed {
                return Err(CallError::Protocol("call completed twice".into()));
            }
            state.completed = true;
            state.outcome = Some(outcome);
            std::mem::replace(&mut state.waiter, Waiter::Idle)
        };
        // Fire outside the lock; continuations may touch this cell again.
        match waiter {
            Waiter::Idle => {}
            Waiter::Callback(f) => f(),
            Waiter::Waker(w) => w.wake(),
        }
        Ok(())
    }

    /// Consume the result: the success payload, or the stored fault as an
    /// error. Reading before completion or twice is rejected.
    pub fn take_result(&self) -> Result<Option<Vec<u8>>> {
        let mut state = self.state.lock().unwrap();
        if !state.completed {
            return Err(CallError::NotCompleted);
        }
        if state.taken {
            return Err(CallError::Protocol("result consumed twice".into()));
        }
        state.taken = true;
        match state.outcome.take() {
            Some(CallOutcome::Success(json)) => Ok(json),
            Some(CallOutcome::Fault(fault)) => Err(CallError::Remote(fault)),
            None => Err(CallError::Protocol("completed cell holds no outcome".into())),
        }
    }

    fn poll_result(&self, cx: &mut Context<'_>) -> Poll<Result<Option<Vec<u8>>>> {
        {
            let mut state = self.state.lock().unwrap();
            if !state.completed {
                // Re-arming the waker on every poll is the Future contract;
                // it does not count against the single continuation.
                if !state.callback_registered {
                    state.waiter = Waiter::Waker(cx.waker().clone());
                }
                return Poll::Pending;
            }
        }
        Poll::Ready(self.take_result())
    }
}

fn decode_value<T: DeserializeOwned>(json: Option<Vec<u8>>) -> Result<T> {
    match json {
        Some(bytes) => {
            serde_json::from_slice(&bytes).map_err(|e| CallError::Decode(e.to_string()))
        }
        // A void result reads as JSON null; only null-accepting types
        // (e.g. `()` or `Option<_>`) decode from it.
        None => serde_json::from_value(serde_json::Value::Null)
            .map_err(|e| CallError::Decode(e.to_string())),
    }
}

/// Awaitable view of one pending call, deserializing the result on
/// completion.
pub struct CallFuture<T> {
    cell: Arc<CallCell>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> CallFuture<T> {
    pub(crate) fn from_cell(cell: Arc<CallCell>) -> Self {
        Self { cell, _marker: PhantomData }
    }

    pub fn is_completed(&self) -> bool {
        self.cell.is_completed()
    }
}

impl<T: DeserializeOwned> Future for CallFuture<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.cell.poll_result(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(json)) => Poll::Ready(decode_value(json)),
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
        }
    }
}

/// A call that has not been issued yet. Consuming methods fix the
/// invocation strategy exactly once.
pub struct CallTask<T> {
    handler: Arc<Handler>,
    worker: i32,
    method: String,
    args: Vec<u8>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> CallTask<T> {
    pub(crate) fn new(handler: Arc<Handler>, worker: i32, method: String, args: Vec<u8>) -> Self {
        Self { handler, worker, method, args, _marker: PhantomData }
    }

    /// Serialize positional arguments and build a task for `method`.
    pub fn with_args<A: Serialize>(
        handler: Arc<Handler>,
        worker: i32,
        method: impl Into<String>,
        args: &A,
    ) -> Result<Self> {
        let bytes = serde_json::to_vec(args).map_err(|e| CallError::Decode(e.to_string()))?;
        Ok(Self::new(handler, worker, method.into(), bytes))
    }

    /// Begin asynchronously: issue the call and return the future to await.
    pub async fn begin(self) -> Result<CallFuture<T>> {
        let cell = self
            .handler
            .call_serialized(&self.method, &self.args, self.worker)
            .await?;
        Ok(CallFuture::from_cell(cell))
    }

    /// Begin asynchronously and await the result in one step.
    pub async fn invoke(self) -> Result<T> {
        self.begin().await?.await
    }

    /// Invoke blocking through the synchronous bridge. Must not be used on
    /// the default call path; it exists for re-entrant synchronous stacks.
    pub fn wait(self) -> Result<T> {
        let json = self
            .handler
            .call_serialized_sync(&self.method, &self.args, self.worker)?;
        decode_value(json)
    }
}
