//! The external driver collaborator (spec.md §6).
//!
//! This crate never talks to a database. Every vendor-specific wire
//! protocol, TLS handshake, and row encoding lives behind one
//! implementation of [`Driver`] per supported engine; the engine only
//! calls through this trait. `shardkit` ships no implementation of it —
//! that's deliberately out of scope (spec.md §1).

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;

use crate::error::Verdict;
use crate::params::{Parameter, Value};
use crate::query::CommandKind;

/// One row of a result set, as handed back by [`RowStream::next_row`].
///
/// Column order is preserved; lookup by name is also supported since most
/// result handlers bind by declared attribute name rather than position.
#[derive(Debug, Clone, Default)]
pub struct Row {
    columns: IndexMap<String, Value>,
}

impl Row {
    pub fn new(columns: IndexMap<String, Value>) -> Self {
        Self { columns }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns.get(name)
    }

    pub fn get_index(&self, index: usize) -> Option<(&str, &Value)> {
        self.columns
            .get_index(index)
            .map(|(k, v)| (k.as_str(), v))
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Output parameters populated by the driver after a command executes.
#[derive(Debug, Clone, Default)]
pub struct OutputParameters {
    values: IndexMap<String, Value>,
}

impl OutputParameters {
    pub fn new(values: IndexMap<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A streamed wire-level result: zero or more result sets, each zero or
/// more rows.
///
/// Multiple result sets exist for drivers that return auxiliary row sets
/// alongside the primary one (e.g. a stored procedure returning a parent
/// row plus child rows); how many a given call produces is a property of
/// the query, not of the engine (spec.md §3's "Arity" design note).
#[async_trait]
pub trait RowStream: Send {
    /// Read the next row of the current result set, if any.
    async fn next_row(&mut self) -> Result<Option<Row>, crate::error::Error>;

    /// Advance to the next result set. Returns `false` once exhausted.
    async fn next_result_set(&mut self) -> Result<bool, crate::error::Error>;
}

/// Opaque capability: bind one row to a typed value.
///
/// The engine never inspects `Model`'s shape; it only calls this trait.
/// How an implementation discovers which row columns map to which fields
/// (derive macro, reflection, hand-written) is outside this crate's
/// concern, per spec.md §1's explicit non-goal.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> Result<Self, crate::error::Error>;
}

/// Opaque capability: bind a typed value from output parameters.
pub trait FromOutputParams: Sized {
    fn from_output_params(params: &OutputParameters) -> Result<Self, crate::error::Error>;
}

/// One vendor's wire protocol, bound as a single generic parameter on
/// [`crate::connection::ConnectionManager`].
///
/// Every method that performs I/O takes the caller's [`CancellationToken`]
/// so an implementation can forward it into its own native cancellation
/// (e.g. a driver that supports query cancellation over the wire should
/// race its I/O against `cancel.cancelled()` and issue that cancellation
/// on the connection). The engine does not rely on implementations doing
/// so correctly: it additionally races every call against the same token
/// itself (spec.md §5), so a call returns promptly on cancellation even
/// if a given `Driver` ignores the token it was handed.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    type Connection: Send;
    type Command: Send;
    type RowStream: RowStream;
    type NativeError: std::error::Error + Send + Sync + 'static;

    /// Open a new connection. Errors from this call go through
    /// `classify_error` like any other — a transient DNS failure should be
    /// `Retryable`.
    async fn open_connection(
        &self,
        connection_string: &str,
        cancel: &CancellationToken,
    ) -> Result<Self::Connection, Self::NativeError>;

    /// Build a command object for `text`/`kind` against an open
    /// connection.
    fn build_command(
        &self,
        connection: &mut Self::Connection,
        text: &str,
        kind: CommandKind,
    ) -> Self::Command;

    /// Bind one named parameter onto a command.
    fn bind_parameter(&self, command: &mut Self::Command, name: &str, param: &Parameter);

    /// Execute for an integer status, no row materialization.
    async fn execute_non_query(
        &self,
        command: &mut Self::Command,
        cancel: &CancellationToken,
    ) -> Result<i64, Self::NativeError>;

    /// Execute and return a row stream plus whatever output parameters the
    /// driver populated.
    async fn execute_reader(
        &self,
        command: &mut Self::Command,
        cancel: &CancellationToken,
    ) -> Result<(Self::RowStream, OutputParameters), Self::NativeError>;

    async fn begin_transaction(
        &self,
        connection: &mut Self::Connection,
        cancel: &CancellationToken,
    ) -> Result<(), Self::NativeError>;
    async fn commit(
        &self,
        connection: &mut Self::Connection,
        cancel: &CancellationToken,
    ) -> Result<(), Self::NativeError>;
    async fn rollback(
        &self,
        connection: &mut Self::Connection,
        cancel: &CancellationToken,
    ) -> Result<(), Self::NativeError>;

    /// Reduce a native error to one of the four verdicts the engine acts
    /// on (spec.md §4.1).
    fn classify_error(&self, err: &Self::NativeError) -> Verdict;
}
