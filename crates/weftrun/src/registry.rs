//! # Function Registry
//!
//! The callable surface a context exposes to its counterpart: scopes hold
//! types, types hold methods, methods hold a type-erased callable plus the
//! declared parameter-type identifiers used for overload selection.
//!
//! Registration is typed: a plain closure is captured through [`WireFn`],
//! which derives the parameter identifiers from the argument types and
//! compiles the JSON-array-to-arguments plan once. Return values convert
//! through [`IntoInvoked`]: `()` reports a void success, [`Json`] a JSON
//! value, `Result::Err` an exception, and [`defer`] a deferred value that
//! settles later.
//!
//! ## Invariants
//! - Invocation never unwinds into the dispatch loop: argument-count
//!   mismatches, deserialization failures, and target errors all become
//!   fault outcomes.
//! - Generic names cannot be registered; the identifier grammar has no
//!   spelling for them.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use weftrpc::RemoteFault;

use crate::ident::IdentError;
use crate::ident::ParsedTypeRef;
use crate::ident::TypeIdent;

/// The settled outcome of one invocation.
pub enum Outcome {
    /// Success with no return value.
    Void,
    /// Success with a JSON return value.
    Json(Value),
    /// The target failed; reported as the call's exception result.
    Fault(RemoteFault),
}

/// The immediate result of driving a callable: settled now, or settling
/// later through a one-shot continuation.
pub enum Invoked {
    Ready(Outcome),
    Deferred(Pin<Box<dyn Future<Output = Invoked> + Send>>),
}

/// Conversion of a callable's return value into an invocation result.
pub trait IntoInvoked {
    fn into_invoked(self) -> Invoked;
}

impl IntoInvoked for () {
    fn into_invoked(self) -> Invoked {
        Invoked::Ready(Outcome::Void)
    }
}

/// Marks a return value for JSON serialization.
pub struct Json<T>(pub T);

impl<T: Serialize> IntoInvoked for Json<T> {
    fn into_invoked(self) -> Invoked {
        match serde_json::to_value(self.0) {
            Ok(value) => Invoked::Ready(Outcome::Json(value)),
            Err(e) => Invoked::Ready(Outcome::Fault(RemoteFault::new(
                format!("failed to serialize return value: {}", e),
                "ResultSerializationError",
            ))),
        }
    }
}

impl IntoInvoked for RemoteFault {
    fn into_invoked(self) -> Invoked {
        Invoked::Ready(Outcome::Fault(self))
    }
}

impl IntoInvoked for Outcome {
    fn into_invoked(self) -> Invoked {
        Invoked::Ready(self)
    }
}

impl<T: IntoInvoked, E: Into<RemoteFault>> IntoInvoked for Result<T, E> {
    fn into_invoked(self) -> Invoked {
        match self {
            Ok(value) => value.into_invoked(),
            Err(e) => Invoked::Ready(Outcome::Fault(e.into())),
        }
    }
}

/// A deferred return value: the call completes when the future settles.
pub struct Deferred(Pin<Box<dyn Future<Output = Invoked> + Send>>);

impl IntoInvoked for Deferred {
    fn into_invoked(self) -> Invoked {
        Invoked::Deferred(self.0)
    }
}

/// Defer completion of a call until `fut` settles.
pub fn defer<F, O>(fut: F) -> Deferred
where
    F: Future<Output = O> + Send + 'static,
    O: IntoInvoked,
{
    Deferred(Box::pin(async move { fut.await.into_invoked() }))
}

/// An argument type that can cross the channel: it has a stable `[scope]Type`
/// identifier and deserializes from its JSON element.
pub trait WireParam: DeserializeOwned + Send + 'static {
    fn type_ident() -> TypeIdent;
}

macro_rules! core_wire_param {
    ($($ty:ty => $name:expr),* $(,)?) => {
        $(
            impl WireParam for $ty {
                fn type_ident() -> TypeIdent {
                    TypeIdent::core($name)
                }
            }
        )*
    };
}

core_wire_param! {
    bool => "bool",
    i16 => "i16",
    i32 => "i32",
    i64 => "i64",
    u16 => "u16",
    u32 => "u32",
    u64 => "u64",
    f32 => "f32",
    f64 => "f64",
    String => "String",
}

fn arity_fault(expected: usize, got: usize) -> RemoteFault {
    RemoteFault::new(
        format!("invalid argument length: expected {}, got {}", expected, got),
        "ArgumentCountError",
    )
}

fn decode_fault(index: usize, error: &serde_json::Error) -> RemoteFault {
    RemoteFault::new(
        format!("failed to deserialize argument {}: {}", index, error),
        "ArgumentDeserializationError",
    )
}

/// A typed callable registrable under a method name. Implemented for plain
/// closures of arity 0 through 6 whose arguments are [`WireParam`]s.
pub trait WireFn<Args>: Send + Sync + 'static {
    fn param_idents() -> Vec<TypeIdent>;
    fn invoke(&self, args: &[Value]) -> Invoked;
}

macro_rules! tuple_wire_fn {
    ($count:expr $(, ($p:ident, $var:ident, $idx:tt))*) => {
        impl<Func, Out $(, $p)*> WireFn<($($p,)*)> for Func
        where
            Func: Fn($($p),*) -> Out + Send + Sync + 'static,
            Out: IntoInvoked,
            $($p: WireParam,)*
        {
            fn param_idents() -> Vec<TypeIdent> {
                vec![$($p::type_ident()),*]
            }

            fn invoke(&self, args: &[Value]) -> Invoked {
                if args.len() != $count {
                    return Invoked::Ready(Outcome::Fault(arity_fault($count, args.len())));
                }
                $(
                    let $var: $p = match serde_json::from_value(args[$idx].clone()) {
                        Ok(value) => value,
                        Err(e) => {
                            return Invoked::Ready(Outcome::Fault(decode_fault($idx, &e)));
                        }
                    };
                )*
                (self)($($var),*).into_invoked()
            }
        }
    };
}

tuple_wire_fn!(0);
tuple_wire_fn!(1, (A, a0, 0));
tuple_wire_fn!(2, (A, a0, 0), (B, a1, 1));
tuple_wire_fn!(3, (A, a0, 0), (B, a1, 1), (C, a2, 2));
tuple_wire_fn!(4, (A, a0, 0), (B, a1, 1), (C, a2, 2), (D, a3, 3));
tuple_wire_fn!(5, (A, a0, 0), (B, a1, 1), (C, a2, 2), (D, a3, 3), (E, a4, 4));
tuple_wire_fn!(6, (A, a0, 0), (B, a1, 1), (C, a2, 2), (D, a3, 3), (E, a4, 4), (F, a5, 5));

/// Type-erased callable stored in the registry.
pub type ErasedFn = Arc<dyn Fn(&[Value]) -> Invoked + Send + Sync>;

/// One registered method overload.
pub struct MethodDef {
    pub name: String,
    pub params: Vec<TypeIdent>,
    pub call: ErasedFn,
}

/// Registration failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    Ident(IdentError),
    /// The exact overload (name plus parameter list) already exists.
    DuplicateOverload(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ident(e) => write!(f, "invalid name: {}", e),
            Self::DuplicateOverload(id) => write!(f, "overload already registered: {}", id),
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<IdentError> for RegistryError {
    fn from(e: IdentError) -> Self {
        Self::Ident(e)
    }
}

/// A registered type: a named group of method overloads.
pub struct TypeEntry {
    pub ident: TypeIdent,
    methods: HashMap<String, Vec<Arc<MethodDef>>>,
}

impl TypeEntry {
    /// Select the overload matching the exact parameter-type list.
    pub fn overload(&self, method: &str, params: &[ParsedTypeRef<'_>]) -> Option<Arc<MethodDef>> {
        let candidates = self.methods.get(method)?;
        candidates
            .iter()
            .find(|def| {
                def.params.len() == params.len()
                    && def.params.iter().zip(params).all(|(ident, parsed)| parsed.matches(ident))
            })
            .cloned()
    }

    /// Method names registered on this type (diagnostics only).
    pub fn method_count(&self) -> usize {
        self.methods.values().map(Vec::len).sum()
    }
}

/// A registered scope: a named group of types.
pub struct Scope {
    pub name: String,
    types: HashMap<String, Arc<TypeEntry>>,
}

impl Scope {
    pub fn find_type(&self, name: &str) -> Option<Arc<TypeEntry>> {
        self.types.get(name).cloned()
    }
}

/// The frozen registry the dispatcher resolves against.
pub struct ScopeRegistry {
    scopes: HashMap<String, Arc<Scope>>,
}

impl ScopeRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder { scopes: HashMap::new() }
    }

    pub fn find_scope(&self, name: &str) -> Option<Arc<Scope>> {
        self.scopes.get(name).cloned()
    }
}

/// Mutable registration phase; [`RegistryBuilder::finish`] freezes the
/// registry for dispatch.
pub struct RegistryBuilder {
    scopes: HashMap<String, ScopeBuilder>,
}

pub struct ScopeBuilder {
    name: String,
    types: HashMap<String, TypeBuilder>,
}

pub struct TypeBuilder {
    ident: TypeIdent,
    methods: HashMap<String, Vec<Arc<MethodDef>>>,
}

impl RegistryBuilder {
    /// Open (or reopen) a scope for registration.
    pub fn scope(&mut self, name: &str) -> std::result::Result<&mut ScopeBuilder, RegistryError> {
        // Validate through the same grammar the resolver parses.
        TypeIdent::new(name, "probe")?;
        Ok(self
            .scopes
            .entry(name.to_owned())
            .or_insert_with(|| ScopeBuilder { name: name.to_owned(), types: HashMap::new() }))
    }

    pub fn finish(self) -> ScopeRegistry {
        let scopes = self
            .scopes
            .into_iter()
            .map(|(name, scope)| {
                let types = scope
                    .types
                    .into_iter()
                    .map(|(type_name, ty)| {
                        (type_name, Arc::new(TypeEntry { ident: ty.ident, methods: ty.methods }))
                    })
                    .collect();
                (name.clone(), Arc::new(Scope { name: scope.name, types }))
            })
            .collect();
        ScopeRegistry { scopes }
    }
}

impl ScopeBuilder {
    /// Open (or reopen) a type within this scope.
    pub fn ty(&mut self, name: &str) -> std::result::Result<&mut TypeBuilder, RegistryError> {
        let ident = TypeIdent::new(self.name.clone(), name)?;
        Ok(self
            .types
            .entry(name.to_owned())
            .or_insert_with(|| TypeBuilder { ident, methods: HashMap::new() }))
    }
}

impl TypeBuilder {
    /// Register a typed callable under `name`. The parameter identifiers
    /// are derived from the closure's argument types.
    pub fn method<Args, F: WireFn<Args>>(
        &mut self,
        name: &str,
        callable: F,
    ) -> std::result::Result<&mut Self, RegistryError> {
        // Method names obey the same grammar as type names.
        TypeIdent::new("probe", name)?;

        let params = F::param_idents();
        let overloads = self.methods.entry(name.to_owned()).or_default();
        if overloads.iter().any(|def| def.params == params) {
            return Err(RegistryError::DuplicateOverload(format!(
                "{}:{}({})",
                self.ident,
                name,
                params.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
            )));
        }

        let call: ErasedFn = {
            let callable = Arc::new(callable);
            Arc::new(move |args: &[Value]| callable.invoke(args))
        };
        overloads.push(Arc::new(MethodDef { name: name.to_owned(), params, call }));
        Ok(self)
    }

    /// The identifier of the type being registered, for call sites that
    /// build method specs from the registration side.
    pub fn ident(&self) -> &TypeIdent {
        &self.ident
    }
}
