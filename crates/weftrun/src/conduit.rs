//! # Conduits
//!
//! The channel primitive between the two contexts: post a tagged packet to
//! the peer, receive the peer's packets. A conduit moves opaque buffers;
//! it never interprets frame contents.
//!
//! Two flavors exist, differing only in how they reach the peer:
//! [`ChannelConduit`] speaks through a single worker channel, and
//! [`ModuleConduit`] is the host-side module reference routing packets to
//! one of several workers by id.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

use weftrpc::Packet;

/// Transport-layer failures.
#[derive(Debug, Clone)]
pub enum Error {
    /// The peer is gone or the channel was dropped.
    Closed(String),
    /// No route exists for the requested worker id.
    NoRoute(i32),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed(msg) => write!(f, "channel closed: {}", msg),
            Self::NoRoute(worker) => write!(f, "no route to worker {}", worker),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// A bidirectional packet pipe to the counterpart context.
///
/// Object-safe; handlers hold `Arc<dyn Conduit>`.
#[async_trait::async_trait]
pub trait Conduit: Send + Sync + 'static {
    /// Deliver a packet to the peer. `target` selects the worker on
    /// multi-worker conduits and is ignored elsewhere.
    async fn post(&self, target: i32, packet: Packet) -> Result<()>;

    /// Deliver without yielding; used only by the synchronous bridge path,
    /// which runs on a blocking stack.
    fn post_blocking(&self, target: i32, packet: Packet) -> Result<()>;

    /// Receive the next inbound packet. `None` means the peer closed.
    async fn recv(&self) -> Result<Option<Packet>>;
}

/// Worker-side conduit: one duplex channel to the coordinating context.
pub struct ChannelConduit {
    tx: mpsc::UnboundedSender<Packet>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Packet>>>,
}

impl ChannelConduit {
    pub fn new(tx: mpsc::UnboundedSender<Packet>, rx: mpsc::UnboundedReceiver<Packet>) -> Self {
        Self { tx, rx: Arc::new(Mutex::new(rx)) }
    }

    /// A connected pair: packets posted on one end arrive on the other.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        (Self::new(tx_a, rx_b), Self::new(tx_b, rx_a))
    }
}

#[async_trait::async_trait]
impl Conduit for ChannelConduit {
    async fn post(&self, _target: i32, packet: Packet) -> Result<()> {
        self.tx.send(packet).map_err(|_| Error::Closed("peer receiver dropped".into()))
    }

    fn post_blocking(&self, _target: i32, packet: Packet) -> Result<()> {
        self.tx.send(packet).map_err(|_| Error::Closed("peer receiver dropped".into()))
    }

    async fn recv(&self) -> Result<Option<Packet>> {
        Ok(self.rx.lock().await.recv().await)
    }
}

/// Host-side conduit: routes packets to registered workers and merges all
/// worker-originated packets into one inbound stream.
pub struct ModuleConduit {
    routes: DashMap<i32, mpsc::UnboundedSender<Packet>>,
    inbound_tx: mpsc::UnboundedSender<Packet>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<Packet>>>,
}

impl ModuleConduit {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            routes: DashMap::new(),
            inbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
        }
    }

    /// Register a worker and return the conduit for its side of the link.
    pub fn open_worker(&self, worker: i32) -> ChannelConduit {
        let (to_worker_tx, to_worker_rx) = mpsc::unbounded_channel();
        self.routes.insert(worker, to_worker_tx);
        ChannelConduit::new(self.inbound_tx.clone(), to_worker_rx)
    }

    fn route(&self, target: i32, packet: Packet) -> Result<()> {
        let tx = self.routes.get(&target).ok_or(Error::NoRoute(target))?;
        tx.send(packet).map_err(|_| Error::Closed(format!("worker {} receiver dropped", target)))
    }
}

impl Default for ModuleConduit {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Conduit for ModuleConduit {
    async fn post(&self, target: i32, packet: Packet) -> Result<()> {
        self.route(target, packet)
    }

    fn post_blocking(&self, target: i32, packet: Packet) -> Result<()> {
        self.route(target, packet)
    }

    async fn recv(&self) -> Result<Option<Packet>> {
        Ok(self.inbound_rx.lock().await.recv().await)
    }
}

/// Spawn the receive pump: one task applying inbound packets to the
/// handler, one message turn at a time. A delivery error is a local
/// protocol violation; the pump logs it and stops.
pub fn spawn_pump(
    handler: Arc<crate::handler::Handler>,
    conduit: Arc<dyn Conduit>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match conduit.recv().await {
                Ok(Some(packet)) => {
                    if let Err(e) = handler.deliver(packet).await {
                        warn!(error = %e, "pump stopping on delivery error");
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "pump stopping on transport error");
                    break;
                }
            }
        }
    })
}
