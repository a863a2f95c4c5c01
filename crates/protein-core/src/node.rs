//! The data-tree representation (§3): `Node` is the pure-data sum type,
//! `Value` extends it with the frame-stack-only variants that must never
//! reach the final emitted tree.
//!
//! Grounded in `ouros::value::Value`'s shape (a closed sum type covering
//! every runtime value) but without that crate's heap-indirection: a
//! Protein frame owns its `Value`s directly, since closures capture by
//! *shallow snapshot copy*, not by shared mutable cell (§3, §4.2).

use std::fmt;

use crate::error::{ErrorTag, ProteinError, Span};

/// A pure data node: the only thing allowed to survive into the emitted
/// tree (§3 invariants).
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// RFC 3339 timestamp, kept as text; YAML 1.1 timestamp scalars are
    /// parsed into this variant but never re-interpreted arithmetically —
    /// the core has no date arithmetic to offer.
    Timestamp(String),
    /// `(text, literal_flag)`. `literal_flag` is true when the source
    /// string carried the `#!literal ` sentinel; the sentinel itself is
    /// never part of `text`.
    String(String, bool),
    Sequence(Vec<Node>),
    /// Ordered, unique-keyed mapping. Construction goes through
    /// [`Mapping::new`]/[`Mapping::push`], which enforce uniqueness —
    /// unlike an `IndexMap`, which would silently overwrite a repeated
    /// key instead of raising `ERR_DUP_KEY`.
    Mapping(Mapping),
}

/// Order-preserving, unique-keyed mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mapping(Vec<(String, Node)>);

impl Mapping {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Inserts `key -> value`, failing with `ERR_DUP_KEY` if already present.
    pub fn push(&mut self, key: String, value: Node, span: &Span) -> Result<(), ProteinError> {
        if self.0.iter().any(|(k, _)| k == &key) {
            return Err(ProteinError::dup_key(&key, span.clone()));
        }
        self.0.push((key, value));
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, Node)> {
        self.0.iter()
    }

    pub fn into_iter(self) -> impl Iterator<Item = (String, Node)> {
        self.0.into_iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Builds a mapping from entries already known to be unique (e.g. a
    /// closure's parameter bindings), panicking on a programmer error
    /// rather than surfacing `ERR_DUP_KEY` for something the caller
    /// should have prevented.
    pub fn from_unique(entries: Vec<(String, Node)>) -> Self {
        debug_assert!(
            {
                let mut seen = std::collections::HashSet::new();
                entries.iter().all(|(k, _)| seen.insert(k.clone()))
            },
            "from_unique called with duplicate keys"
        );
        Self(entries)
    }

    /// Merges `other` into `self`, in insertion order, failing on overlap.
    pub fn merge(mut self, other: Mapping, span: &Span) -> Result<Mapping, ProteinError> {
        for (k, v) in other.0 {
            self.push(k, v, span)?;
        }
        Ok(self)
    }
}

impl FromIterator<(String, Node)> for Mapping {
    fn from_iter<T: IntoIterator<Item = (String, Node)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Node {
    pub fn string(text: impl Into<String>) -> Self {
        Self::String(text.into(), false)
    }

    pub fn literal_string(text: impl Into<String>) -> Self {
        Self::String(text.into(), true)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The §4.4 `.if`/truthiness coercion: non-empty collection, non-zero
    /// number, non-empty non-`"false"` string are truthy; `Null`, `false`,
    /// `0`/`0.0`, `""`, `[]`, `{}` are not.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(n) => *n != 0,
            Self::Float(f) => *f != 0.0,
            Self::Timestamp(_) => true,
            Self::String(s, _) => !s.is_empty() && s != "false",
            Self::Sequence(items) => !items.is_empty(),
            Self::Mapping(m) => !m.is_empty(),
        }
    }

    /// Renders this node as the string an expression-embedding would see
    /// for `{{ name }}`-style interpolation of a plain (non-string) value.
    pub fn coerce_to_string(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Int(n) => n.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Timestamp(t) | Self::String(t, _) => t.clone(),
            other => format!("{other:?}"),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s, _) | Self::Timestamp(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Node]> {
        match self {
            Self::Sequence(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&Mapping> {
        match self {
            Self::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Timestamp(_) => "timestamp",
            Self::String(..) => "string",
            Self::Sequence(_) => "sequence",
            Self::Mapping(_) => "mapping",
        }
    }

    /// Strips `literal_flag` recursively, the normalization §4.4's
    /// `.export` handler performs before serialization (§3 invariant:
    /// "literal_flag is stripped during final emission").
    pub fn strip_literal_flags(self) -> Node {
        match self {
            Self::String(s, _) => Self::String(s, false),
            Self::Sequence(items) => Self::Sequence(items.into_iter().map(Node::strip_literal_flags).collect()),
            Self::Mapping(m) => Self::Mapping(
                m.into_iter()
                    .map(|(k, v)| (k, v.strip_literal_flags()))
                    .collect(),
            ),
            other => other,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.coerce_to_string())
    }
}

/// A closure captured by `.function` (§3, §4.4): parameter names, the
/// unwalked `.do` body, and a shallow snapshot of the defining scope.
#[derive(Debug, Clone)]
pub struct Closure {
    pub name: String,
    pub params: Vec<String>,
    pub body: Node,
    pub captured_env: Vec<(String, Value)>,
}

/// A function provided by a loaded module (§6 Module protocol).
///
/// Held behind `Rc` so cloning a frame (closure capture, §4.2) never
/// deep-copies the callable itself — "closures do not capture host
/// callables by deep copy; callables are by reference" (§9).
pub type HostFn = std::rc::Rc<dyn Fn(&[Node], &Span) -> Result<Node, ProteinError>>;

#[derive(Clone)]
pub struct HostCallable {
    pub name: String,
    pub func: HostFn,
}

impl fmt::Debug for HostCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCallable").field("name", &self.name).finish()
    }
}

#[derive(Clone)]
pub struct HostFilter {
    pub name: String,
    pub func: HostFn,
}

impl fmt::Debug for HostFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFilter").field("name", &self.name).finish()
    }
}

/// A handle to a registered SQL engine (§3, §4.4, §6) — opaque to the
/// core; it carries only what `.exec_sql`/`.load_sql` need to find the
/// right driver instance through [`crate::sql::SqlEngineRegistry`].
#[derive(Debug, Clone)]
pub struct SqlEngineHandle {
    pub name: String,
}

/// `Node` extended with the frame-only variants (§3).
#[derive(Debug, Clone)]
pub enum Value {
    Node(Node),
    HostCallable(HostCallable),
    HostFilter(HostFilter),
    Closure(std::rc::Rc<Closure>),
    SqlEngine(SqlEngineHandle),
}

impl Value {
    pub fn node(n: Node) -> Self {
        Self::Node(n)
    }

    /// Converts to a pure `Node`, failing for the host-only variants
    /// (§3 invariant: the emitted tree must contain none of them).
    pub fn into_node(self, span: &Span) -> Result<Node, ProteinError> {
        match self {
            Self::Node(n) => Ok(n),
            Self::HostCallable(c) => Err(ProteinError::new(
                ErrorTag::Type,
                format!("callable `{}` cannot appear in output", c.name),
                span.clone(),
            )),
            Self::HostFilter(f) => Err(ProteinError::new(
                ErrorTag::Type,
                format!("filter `{}` cannot appear in output", f.name),
                span.clone(),
            )),
            Self::Closure(c) => Err(ProteinError::new(
                ErrorTag::Type,
                format!("function `{}` cannot appear in output", c.name),
                span.clone(),
            )),
            Self::SqlEngine(h) => Err(ProteinError::new(
                ErrorTag::Type,
                format!("sql engine `{}` cannot appear in output", h.name),
                span.clone(),
            )),
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Self::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Node(n) => n.type_name(),
            Self::HostCallable(_) => "callable",
            Self::HostFilter(_) => "filter",
            Self::Closure(_) => "function",
            Self::SqlEngine(_) => "sql_engine",
        }
    }
}

impl From<Node> for Value {
    fn from(n: Node) -> Self {
        Self::Node(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_rejects_duplicate_keys() {
        let mut m = Mapping::new();
        m.push("a".into(), Node::Int(1), &Span::unknown()).unwrap();
        let err = m.push("a".into(), Node::Int(2), &Span::unknown()).unwrap_err();
        assert_eq!(err.tag, ErrorTag::DupKey);
    }

    #[test]
    fn truthiness_matches_spec_rule() {
        assert!(!Node::Null.is_truthy());
        assert!(!Node::Bool(false).is_truthy());
        assert!(!Node::Int(0).is_truthy());
        assert!(!Node::string("").is_truthy());
        assert!(!Node::string("false").is_truthy());
        assert!(Node::string("0").is_truthy());
        assert!(Node::string("False").is_truthy());
        assert!(Node::Int(1).is_truthy());
        assert!(Node::Sequence(vec![Node::Null]).is_truthy());
        assert!(!Node::Sequence(vec![]).is_truthy());
    }

    #[test]
    fn strip_literal_flags_is_recursive() {
        let n = Node::Sequence(vec![Node::literal_string("x")]);
        let stripped = n.strip_literal_flags();
        match stripped {
            Node::Sequence(items) => match &items[0] {
                Node::String(s, lit) => {
                    assert_eq!(s, "x");
                    assert!(!lit);
                }
                _ => panic!("expected string"),
            },
            _ => panic!("expected sequence"),
        }
    }
}
