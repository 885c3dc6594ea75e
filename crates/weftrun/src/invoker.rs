//! # Invoker Builder
//!
//! Resolves textual method identifiers against the function registry and
//! caches a compiled invoker per identifier: resolve once, call many times.
//!
//! Three slice-keyed caches front the registry: scopes, types (keyed by
//! their `[scope]Type` prefix text), and the invokers themselves (keyed by
//! the full identifier). The method reference itself is never cached; the
//! invoker is.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use serde_json::Value;
use tracing::debug;

use weftrpc::RemoteFault;

use crate::cache::SliceMap;
use crate::ident;
use crate::ident::IdentError;
use crate::registry::Invoked;
use crate::registry::MethodDef;
use crate::registry::Outcome;
use crate::registry::Scope;
use crate::registry::ScopeRegistry;
use crate::registry::TypeEntry;

/// Resolution failures. Format errors are malformed text; the rest are
/// lookups that found nothing. All permanent for that identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    Format(IdentError),
    ScopeNotFound(String),
    TypeNotFound(String),
    MethodNotFound(String),
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Format(e) => write!(f, "format error: {}", e),
            Self::ScopeNotFound(name) => write!(f, "failed to resolve scope '{}'", name),
            Self::TypeNotFound(name) => write!(f, "failed to resolve type '{}'", name),
            Self::MethodNotFound(id) => write!(f, "no method overload matches '{}'", id),
        }
    }
}

impl std::error::Error for DispatchError {}

impl From<IdentError> for DispatchError {
    fn from(e: IdentError) -> Self {
        Self::Format(e)
    }
}

impl DispatchError {
    /// The fault shape this failure takes when reported back to the caller.
    pub fn to_fault(&self) -> RemoteFault {
        let type_name = match self {
            Self::Format(_) => "FormatError",
            _ => "ResolutionError",
        };
        RemoteFault::new(self.to_string(), type_name)
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;

/// A compiled invoker: deserialize, invoke, and fold every outcome into a
/// reportable result.
pub struct Invoker {
    def: Arc<MethodDef>,
}

impl Invoker {
    /// Drive one invocation from a serialized JSON argument array. Never
    /// unwinds; every failure becomes a fault outcome.
    pub fn invoke(&self, json_args: &[u8]) -> Invoked {
        let args: Vec<Value> = match serde_json::from_slice(json_args) {
            Ok(values) => values,
            Err(e) => {
                return Invoked::Ready(Outcome::Fault(RemoteFault::new(
                    format!("failed to deserialize json arguments: {}", e),
                    "ArgumentDeserializationError",
                )));
            }
        };
        (self.def.call)(&args)
    }

    pub fn def(&self) -> &MethodDef {
        &self.def
    }
}

impl std::fmt::Debug for Invoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invoker")
            .field("name", &self.def.name)
            .field("params", &self.def.params)
            .finish()
    }
}

/// Identifier-to-invoker dispatch with slice-keyed caching.
///
/// Owned per context and passed down explicitly; two dispatchers never
/// share cache state.
pub struct Dispatcher {
    registry: ScopeRegistry,
    scope_cache: Mutex<SliceMap<Arc<Scope>>>,
    type_cache: Mutex<SliceMap<Arc<TypeEntry>>>,
    invokers: Mutex<SliceMap<Arc<Invoker>>>,
    builds: AtomicU64,
}

impl Dispatcher {
    pub fn new(registry: ScopeRegistry) -> Self {
        Self {
            registry,
            scope_cache: Mutex::new(SliceMap::new()),
            type_cache: Mutex::new(SliceMap::new()),
            invokers: Mutex::new(SliceMap::new()),
            builds: AtomicU64::new(0),
        }
    }

    /// How many invokers have been built (not served from cache). Test
    /// observability for cache idempotence.
    pub fn build_count(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }

    /// Resolve an identifier to its cached invoker, building it on first
    /// use.
    pub fn resolve(&self, identifier: &str) -> Result<Arc<Invoker>> {
        if let Some(invoker) = self.invokers.lock().unwrap().get(identifier) {
            return Ok(invoker.clone());
        }

        let parsed = ident::parse_identifier(identifier)?;

        let scope = self.resolve_scope(parsed.owner.scope)?;
        let ty = self.resolve_type(&scope, parsed.owner_text, parsed.owner.name)?;

        let def = ty
            .overload(parsed.method, &parsed.params)
            .ok_or_else(|| DispatchError::MethodNotFound(identifier.to_owned()))?;

        let invoker = Arc::new(Invoker { def });
        self.invokers.lock().unwrap().insert(identifier, invoker.clone());
        self.builds.fetch_add(1, Ordering::Relaxed);
        debug!(identifier, "invoker built");
        Ok(invoker)
    }

    fn resolve_scope(&self, name: &str) -> Result<Arc<Scope>> {
        let mut cache = self.scope_cache.lock().unwrap();
        if let Some(scope) = cache.get(name) {
            return Ok(scope.clone());
        }
        let scope = self
            .registry
            .find_scope(name)
            .ok_or_else(|| DispatchError::ScopeNotFound(name.to_owned()))?;
        cache.insert(name, scope.clone());
        Ok(scope)
    }

    fn resolve_type(
        &self,
        scope: &Arc<Scope>,
        owner_text: &str,
        type_name: &str,
    ) -> Result<Arc<TypeEntry>> {
        let mut cache = self.type_cache.lock().unwrap();
        if let Some(ty) = cache.get(owner_text) {
            return Ok(ty.clone());
        }
        let ty = scope
            .find_type(type_name)
            .ok_or_else(|| DispatchError::TypeNotFound(owner_text.to_owned()))?;
        cache.insert(owner_text, ty.clone());
        Ok(ty)
    }
}
