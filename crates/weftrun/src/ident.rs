//! # Method Identifiers
//!
//! Building and parsing the textual reference format
//! `[scope]Namespace.Type:Method(ArgType1,ArgType2,...)`, where each
//! argument type is itself a `[scope]Type` reference. Generic names are
//! unsupported and rejected at build time; malformed text fails with a
//! format error, which is permanent for that identifier.

/// Identifier construction and parsing failures. All permanent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentError {
    /// A required delimiter was absent.
    Missing(&'static str),
    /// A name segment was empty.
    EmptyName,
    /// Generic / parameterized names are unsupported.
    Generic(String),
    /// A name contained a reserved delimiter character.
    ReservedChar(char),
}

impl std::fmt::Display for IdentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing(what) => write!(f, "malformed identifier: missing {}", what),
            Self::EmptyName => write!(f, "malformed identifier: empty name segment"),
            Self::Generic(name) => write!(f, "generic names are unsupported: {}", name),
            Self::ReservedChar(c) => write!(f, "name contains reserved character '{}'", c),
        }
    }
}

impl std::error::Error for IdentError {}

pub type Result<T> = std::result::Result<T, IdentError>;

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(IdentError::EmptyName);
    }
    if name.contains('<') || name.contains('>') {
        return Err(IdentError::Generic(name.to_owned()));
    }
    for reserved in ['[', ']', '(', ')', ':', ','] {
        if name.contains(reserved) {
            return Err(IdentError::ReservedChar(reserved));
        }
    }
    Ok(())
}

/// A `[scope]Name` type reference. The name may be dotted
/// (`Namespace.Type`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeIdent {
    pub scope: String,
    pub name: String,
}

impl TypeIdent {
    pub fn new(scope: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let scope = scope.into();
        let name = name.into();
        check_name(&scope)?;
        check_name(&name)?;
        Ok(Self { scope, name })
    }

    /// A built-in type under the `core` scope. Built-in names are known
    /// valid, so this cannot fail.
    pub fn core(name: &str) -> Self {
        Self { scope: "core".to_owned(), name: name.to_owned() }
    }

    fn write(&self, out: &mut String) {
        out.push('[');
        out.push_str(&self.scope);
        out.push(']');
        out.push_str(&self.name);
    }
}

impl std::fmt::Display for TypeIdent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]{}", self.scope, self.name)
    }
}

/// A fully described method reference: owning type, method name, and
/// positional parameter types. Built once per call site.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodSpec {
    pub owner: TypeIdent,
    pub method: String,
    pub params: Vec<TypeIdent>,
}

impl MethodSpec {
    pub fn new(owner: TypeIdent, method: impl Into<String>) -> Result<Self> {
        let method = method.into();
        check_name(&method)?;
        Ok(Self { owner, method, params: Vec::new() })
    }

    pub fn param(mut self, param: TypeIdent) -> Self {
        self.params.push(param);
        self
    }

    /// Emit the textual identifier `[scope]Type:Method(Args)`.
    pub fn identifier(&self) -> String {
        let mut out = String::new();
        self.owner.write(&mut out);
        out.push(':');
        out.push_str(&self.method);
        out.push('(');
        for (i, param) in self.params.iter().enumerate() {
            if i != 0 {
                out.push(',');
            }
            param.write(&mut out);
        }
        out.push(')');
        out
    }
}

/// A borrowed `[scope]Name` reference parsed out of an identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ParsedTypeRef<'a> {
    pub scope: &'a str,
    pub name: &'a str,
}

impl<'a> ParsedTypeRef<'a> {
    pub fn matches(&self, ident: &TypeIdent) -> bool {
        self.scope == ident.scope && self.name == ident.name
    }
}

/// A borrowed view of a parsed method identifier.
#[derive(Debug)]
pub struct ParsedIdent<'a> {
    pub owner: ParsedTypeRef<'a>,
    /// The `[scope]Type` prefix text, usable as a cache key slice.
    pub owner_text: &'a str,
    pub method: &'a str,
    pub params: Vec<ParsedTypeRef<'a>>,
}

/// Parse a `[scope]Type` reference.
pub fn parse_type_ref(text: &str) -> Result<ParsedTypeRef<'_>> {
    let text = text.trim();
    let rest = text.strip_prefix('[').ok_or(IdentError::Missing("'['"))?;
    let close = rest.find(']').ok_or(IdentError::Missing("']'"))?;
    let scope = rest[..close].trim();
    let name = rest[close + 1..].trim();
    if scope.is_empty() || name.is_empty() {
        return Err(IdentError::EmptyName);
    }
    if name.contains('<') || name.contains('>') {
        return Err(IdentError::Generic(name.to_owned()));
    }
    Ok(ParsedTypeRef { scope, name })
}

/// Single-pass scan of a full method identifier.
pub fn parse_identifier(text: &str) -> Result<ParsedIdent<'_>> {
    let colon = text.find(':').ok_or(IdentError::Missing("':'"))?;
    let owner_text = text[..colon].trim();
    let owner = parse_type_ref(owner_text)?;

    let after_owner = &text[colon + 1..];
    let open = after_owner.find('(').ok_or(IdentError::Missing("'('"))?;
    let method = after_owner[..open].trim();
    if method.is_empty() {
        return Err(IdentError::EmptyName);
    }
    if method.contains('<') || method.contains('>') {
        return Err(IdentError::Generic(method.to_owned()));
    }

    let after_open = &after_owner[open + 1..];
    let close = after_open.rfind(')').ok_or(IdentError::Missing("')'"))?;
    if !after_open[close + 1..].trim().is_empty() {
        return Err(IdentError::Missing("identifier end after ')'"));
    }

    let inner = after_open[..close].trim();
    let params = if inner.is_empty() {
        Vec::new()
    } else {
        inner.split(',').map(parse_type_ref).collect::<Result<Vec<_>>>()?
    };

    Ok(ParsedIdent { owner, owner_text, method, params })
}
