//! Immutable statement descriptors.

use std::collections::HashSet;

/// Whether a [`Query`] names a stored procedure or a direct statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Procedure,
    Statement,
}

/// An immutable, reusable descriptor for a parameterized statement or
/// stored procedure.
///
/// `name` doubles as the mock-result lookup key (see
/// [`crate::mock::MockResultTable`]) and as the identity used in
/// telemetry. Two `Query` values with the same name are expected to be
/// the same statement; the engine never checks this, it's a caller
/// discipline.
#[derive(Debug, Clone)]
pub struct Query {
    name: String,
    text: String,
    kind: CommandKind,
    declared_params: Vec<String>,
}

impl Query {
    /// Build a new query. Panics if `name` is empty or `declared_params`
    /// contains duplicates, per spec.md's Query invariants.
    pub fn new(
        name: impl Into<String>,
        text: impl Into<String>,
        kind: CommandKind,
        declared_params: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let name = name.into();
        assert!(!name.is_empty(), "Query name must not be empty");

        let declared_params: Vec<String> = declared_params.into_iter().map(Into::into).collect();
        let mut seen = HashSet::with_capacity(declared_params.len());
        for p in &declared_params {
            assert!(seen.insert(p.clone()), "duplicate declared parameter name: {p}");
        }

        Self {
            name,
            text: text.into(),
            kind,
            declared_params,
        }
    }

    /// A statement with no declared parameter names: the engine binds
    /// every parameter the caller supplies, per spec.md §4.3.
    pub fn statement(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(name, text, CommandKind::Statement, Vec::<String>::new())
    }

    /// A stored procedure call with no declared parameter names.
    pub fn procedure(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(name, text, CommandKind::Procedure, Vec::<String>::new())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Declared parameter names, in declaration order. Empty means "bind
    /// whatever the caller supplies" (spec.md §4.3).
    pub fn declared_params(&self) -> &[String] {
        &self.declared_params
    }
}
