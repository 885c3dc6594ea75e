//! # WeftRun
//!
//! The runtime half of the call fabric: dispatch, handlers, futures, and
//! the synchronous bridge.
//!
//! ## Architecture
//!
//! A context registers its callable surface in a [`registry::ScopeRegistry`]
//! and wraps it in a [`invoker::Dispatcher`], which resolves textual method
//! identifiers into cached invokers. An [`builder::EndpointBuilder`] wires
//! a [`handler::Handler`] to a [`conduit::Conduit`] and a
//! [`router::Router`]; a pump task applies inbound packets one turn at a
//! time. Callers issue [`task::CallTask`]s that complete through
//! single-assignment [`task::CallCell`]s, or block through the
//! [`bridge::SyncBridge`].

pub mod bridge;
pub mod builder;
pub mod cache;
pub mod conduit;
pub mod handler;
pub mod ident;
pub mod invoker;
pub mod registry;
pub mod router;
pub mod task;

pub use bridge::SyncBridge;
pub use bridge::SyncPort;
pub use bridge::TablePort;
pub use builder::EndpointBuilder;
pub use builder::WorkerLink;
pub use cache::SliceMap;
pub use conduit::ChannelConduit;
pub use conduit::Conduit;
pub use conduit::ModuleConduit;
pub use handler::Handler;
pub use ident::MethodSpec;
pub use ident::TypeIdent;
pub use invoker::Dispatcher;
pub use registry::Json;
pub use registry::ScopeRegistry;
pub use registry::defer;
pub use router::Router;
pub use task::CallError;
pub use task::CallFuture;
pub use task::CallTask;

#[cfg(test)]
mod tests;
