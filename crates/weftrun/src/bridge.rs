//! # Synchronous Bridge
//!
//! The channel is asynchronous; a caller that must block (a re-entrant
//! call made from inside an already-synchronous stack) cannot wait on a
//! future. The bridge is the out-of-band side channel that makes a
//! blocking call possible anyway: the caller obtains a small source id,
//! folds it into its call id, and busy-polls the side channel for the
//! response block at a fixed interval with a bounded retry budget.
//!
//! The interception mechanism is swappable: anything with request/response
//! semantics outside the main channel satisfies [`SyncPort`]. The provided
//! [`TablePort`] is an in-process response table.
//!
//! This path exists purely for re-entrant synchronous semantics. The
//! default call path never touches it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicI32;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::trace;

use weftrpc::token::SYNC_SOURCE_MAX;

/// Bridge failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The retry budget ran out before a response was posted.
    Timeout { polls: u32, interval: Duration },
    /// Every representable source id has been handed out.
    SourceExhausted,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout { polls, interval } => {
                write!(f, "no response after {} polls of {:?}", polls, interval)
            }
            Self::SourceExhausted => write!(f, "synchronous source ids exhausted"),
        }
    }
}

impl std::error::Error for Error {}

impl From<Error> for crate::task::CallError {
    fn from(e: Error) -> Self {
        match e {
            Error::Timeout { polls, interval } => crate::task::CallError::Timeout {
                polls,
                interval_ms: interval.as_millis() as u64,
            },
            Error::SourceExhausted => {
                crate::task::CallError::Protocol("synchronous source ids exhausted".into())
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A side channel capable of request/response outside the main channel.
pub trait SyncPort: Send + Sync + 'static {
    /// Hand out a fresh source id for one blocking exchange.
    fn assign_source_id(&self) -> Result<i32>;

    /// Post a response block keyed by its (folded) call id. Called by the
    /// answering side.
    fn post_response(&self, call_id: i32, block: Vec<u8>);

    /// Take the response for `call_id` if one has been posted.
    fn try_take_response(&self, call_id: i32) -> Option<Vec<u8>>;
}

/// In-process [`SyncPort`]: a mutexed response table shared by both
/// endpoints.
pub struct TablePort {
    next_source: AtomicI32,
    responses: Mutex<HashMap<i32, Vec<u8>>>,
}

impl TablePort {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { next_source: AtomicI32::new(1), responses: Mutex::new(HashMap::new()) })
    }
}

impl SyncPort for TablePort {
    fn assign_source_id(&self) -> Result<i32> {
        let id = self.next_source.fetch_add(1, Ordering::Relaxed);
        if id > SYNC_SOURCE_MAX {
            return Err(Error::SourceExhausted);
        }
        Ok(id)
    }

    fn post_response(&self, call_id: i32, block: Vec<u8>) {
        self.responses.lock().unwrap().insert(call_id, block);
    }

    fn try_take_response(&self, call_id: i32) -> Option<Vec<u8>> {
        self.responses.lock().unwrap().remove(&call_id)
    }
}

/// Default wait unit between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Poll-based blocking wait over a [`SyncPort`].
pub struct SyncBridge {
    port: Arc<dyn SyncPort>,
    poll_interval: Duration,
    /// Maximum number of sleeps before timing out. `None` waits forever,
    /// appropriate only where the caller cannot otherwise make progress.
    budget: Option<u32>,
}

impl SyncBridge {
    pub fn new(port: Arc<dyn SyncPort>) -> Self {
        Self { port, poll_interval: DEFAULT_POLL_INTERVAL, budget: None }
    }

    pub fn with_timing(port: Arc<dyn SyncPort>, poll_interval: Duration, budget: Option<u32>) -> Self {
        Self { port, poll_interval, budget }
    }

    pub fn port(&self) -> Arc<dyn SyncPort> {
        self.port.clone()
    }

    pub fn assign_source_id(&self) -> Result<i32> {
        self.port.assign_source_id()
    }

    /// Block until the response for `call_id` is posted, or the retry
    /// budget is exhausted.
    pub fn wait(&self, call_id: i32) -> Result<Vec<u8>> {
        if let Some(block) = self.port.try_take_response(call_id) {
            return Ok(block);
        }
        let mut polls = 0u32;
        loop {
            if let Some(limit) = self.budget {
                if polls >= limit {
                    return Err(Error::Timeout { polls, interval: self.poll_interval });
                }
            }
            std::thread::sleep(self.poll_interval);
            polls += 1;
            trace!(call_id, polls, "bridge poll");
            if let Some(block) = self.port.try_take_response(call_id) {
                return Ok(block);
            }
        }
    }
}
