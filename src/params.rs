//! Ordered, name-indexed bind parameters.

use std::collections::HashMap;

use indexmap::IndexMap;

/// Parameter passing direction, per spec.md's Parameter Set entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    InOut,
    ReturnValue,
}

/// A driver-agnostic bind value.
///
/// The engine never interprets these; it hands them to the driver
/// collaborator's `BindParameter` (spec.md §6). The variants cover the
/// common scalar shapes a relational driver needs distinguished; anything
/// driver-specific rides in `Bytes` or `Other`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Text(String),
    Bytes(Vec<u8>),
}

/// A type hint passed through to the driver when the bind `Value`'s shape
/// alone is ambiguous (e.g. a `Text` that should bind as a `uuid` column).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TypeHint {
    #[default]
    Inferred,
    Named(String),
}

/// One bound parameter: its current value, direction, and optional type
/// hint.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub value: Value,
    pub direction: Direction,
    pub type_hint: TypeHint,
}

impl Parameter {
    pub fn input(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            direction: Direction::In,
            type_hint: TypeHint::Inferred,
        }
    }

    pub fn output(type_hint: impl Into<TypeHint>) -> Self {
        Self {
            value: Value::Null,
            direction: Direction::Out,
            type_hint: type_hint.into(),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for TypeHint {
    fn from(v: &str) -> Self {
        TypeHint::Named(v.to_owned())
    }
}

/// An ordered, name-indexed collection of bind parameters supplied by the
/// caller.
///
/// Caller-owned and read-only to the engine: the engine clones a
/// `ParameterSet` before applying per-shard overrides rather than
/// mutating the caller's copy (spec.md §5).
#[derive(Debug, Clone, Default)]
pub struct ParameterSet {
    entries: IndexMap<String, Parameter>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a named parameter; returns `self` for chaining.
    pub fn with(mut self, name: impl Into<String>, param: Parameter) -> Self {
        self.entries.insert(name.into(), param);
        self
    }

    /// Convenience for a plain input value.
    pub fn with_in(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(name, Parameter::input(value))
    }

    /// Convenience for declaring an output parameter.
    pub fn with_out(self, name: impl Into<String>, type_hint: impl Into<TypeHint>) -> Self {
        self.with(name, Parameter::output(type_hint))
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Overwrite (or insert) a named entry. Used by the dispatcher to
    /// apply per-shard overrides to a *clone* of the base set; never
    /// called on the caller's original.
    pub fn set(&mut self, name: impl Into<String>, param: Parameter) {
        self.entries.insert(name.into(), param);
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Parameter)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-shard parameter overrides: for shard `s`, `(name -> value)` pairs
/// that replace the corresponding entries in the base `ParameterSet`
/// before dispatch to `s`.
///
/// Keyed by the shard's string identifier rendering (see
/// [`crate::database::ShardId`]) so it stays independent of the concrete
/// `ShardId` type used by a given `ShardSet`.
#[derive(Debug, Clone, Default)]
pub struct ShardParameterValues {
    overrides: HashMap<String, HashMap<String, Value>>,
}

impl ShardParameterValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_shard(mut self, shard: impl Into<String>, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.overrides
            .entry(shard.into())
            .or_default()
            .insert(name.into(), value.into());
        self
    }

    /// The set of shard identifiers referenced by these overrides.
    pub fn shards(&self) -> impl Iterator<Item = &str> {
        self.overrides.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    /// Overrides for one shard, if any were specified.
    pub fn get(&self, shard: &str) -> Option<&HashMap<String, Value>> {
        self.overrides.get(shard)
    }
}
