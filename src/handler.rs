//! The result-shape abstraction (spec.md §4.3) plus the built-in handlers
//! that ship with the engine.

use std::marker::PhantomData;

use async_trait::async_trait;

use crate::driver::{FromOutputParams, FromRow, OutputParameters, RowStream};
use crate::error::Error;

/// Converts one wire-level result into a caller-chosen `Model`, or `None`
/// if the shard produced no result worth keeping.
///
/// Implementations must be stateless and safe to invoke concurrently on
/// distinct `(shard, rows, outputs, arg)` inputs — the dispatchers in
/// [`crate::shard_set`] call one instance across many shards at once.
/// "Arity" (how many result sets a handler reads off `rows`) is a property
/// of the handler, not of this trait or of the engine that calls it.
#[async_trait]
pub trait ResultHandler<S, Arg, Model>: Send + Sync
where
    S: RowStream,
{
    async fn handle(
        &self,
        shard: &str,
        rows: &mut S,
        outputs: &OutputParameters,
        arg: &Arg,
    ) -> Result<Option<Model>, Error>;
}

/// Binds row 0 of the primary result set to `Model`; `None` if the result
/// set was empty. Ignores output parameters and any auxiliary result
/// sets.
pub struct RowsHandler<Model> {
    _model: PhantomData<fn() -> Model>,
}

impl<Model> Default for RowsHandler<Model> {
    fn default() -> Self {
        Self {
            _model: PhantomData,
        }
    }
}

impl<Model> RowsHandler<Model> {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl<S, Arg, Model> ResultHandler<S, Arg, Model> for RowsHandler<Model>
where
    S: RowStream,
    Arg: Send + Sync,
    Model: FromRow + Send,
{
    async fn handle(
        &self,
        _shard: &str,
        rows: &mut S,
        _outputs: &OutputParameters,
        _arg: &Arg,
    ) -> Result<Option<Model>, Error> {
        match rows.next_row().await? {
            Some(row) => Ok(Some(Model::from_row(&row)?)),
            None => Ok(None),
        }
    }
}

/// Binds `Model` entirely from output parameters, ignoring any row
/// stream. Returns `None` if the output parameters are empty (the
/// procedure produced no return value).
pub struct OutputHandler<Model> {
    _model: PhantomData<fn() -> Model>,
}

impl<Model> Default for OutputHandler<Model> {
    fn default() -> Self {
        Self {
            _model: PhantomData,
        }
    }
}

impl<Model> OutputHandler<Model> {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl<S, Arg, Model> ResultHandler<S, Arg, Model> for OutputHandler<Model>
where
    S: RowStream,
    Arg: Send + Sync,
    Model: FromOutputParams + Send,
{
    async fn handle(
        &self,
        _shard: &str,
        _rows: &mut S,
        outputs: &OutputParameters,
        _arg: &Arg,
    ) -> Result<Option<Model>, Error> {
        if outputs.is_empty() {
            return Ok(None);
        }
        Ok(Some(Model::from_output_params(outputs)?))
    }
}

/// A `Model` that can absorb a row-set of `Row` into one of its
/// list-typed members.
///
/// This is the opaque capability the combined handler relies on instead
/// of reflecting over `Model`'s fields (spec.md §1's mapping non-goal).
pub trait WithRows<Row>: Sized {
    fn with_rows(self, rows: Vec<Row>) -> Self;
}

/// Binds `Model` from output parameters, then drains every row of the
/// primary (and only) auxiliary result set into `Model`'s list member via
/// [`WithRows`].
pub struct CombinedHandler<Model, Row> {
    _model: PhantomData<fn() -> Model>,
    _row: PhantomData<fn() -> Row>,
}

impl<Model, Row> Default for CombinedHandler<Model, Row> {
    fn default() -> Self {
        Self {
            _model: PhantomData,
            _row: PhantomData,
        }
    }
}

impl<Model, Row> CombinedHandler<Model, Row> {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl<S, Arg, Model, Row> ResultHandler<S, Arg, Model> for CombinedHandler<Model, Row>
where
    S: RowStream,
    Arg: Send + Sync,
    Model: FromOutputParams + WithRows<Row> + Send,
    Row: FromRow + Send,
{
    async fn handle(
        &self,
        _shard: &str,
        rows: &mut S,
        outputs: &OutputParameters,
        _arg: &Arg,
    ) -> Result<Option<Model>, Error> {
        if outputs.is_empty() {
            return Ok(None);
        }
        let model = Model::from_output_params(outputs)?;

        let mut collected = Vec::new();
        while let Some(row) = rows.next_row().await? {
            collected.push(Row::from_row(&row)?);
        }

        Ok(Some(model.with_rows(collected)))
    }
}
