//! Transactional batches (spec.md §4.5).
//!
//! A `Batch` is an ordered list of steps run on one connection inside one
//! transaction. The first step to fail rolls the whole transaction back;
//! at most one step is marked as the "result step," whose projected value
//! becomes the batch's return value.

use std::sync::Arc;

use crate::driver::Driver;
use crate::handler::ResultHandler;
use crate::params::ParameterSet;
use crate::query::Query;

/// One step of a [`Batch`]: a query, its parameters, and — for at most one
/// step per batch — a projection from its result into `R`.
pub struct BatchStep<D: Driver, R> {
    query: Query,
    params: ParameterSet,
    projector: Option<Arc<dyn ResultHandler<D::RowStream, (), R> + Send + Sync>>,
}

impl<D: Driver, R> BatchStep<D, R> {
    /// A step whose result is discarded once it succeeds.
    pub fn new(query: Query, params: ParameterSet) -> Self {
        Self {
            query,
            params,
            projector: None,
        }
    }

    /// The batch's designated result step: `handler` projects this step's
    /// rows/outputs into the value `Batch::run` returns.
    pub fn with_result<H>(query: Query, params: ParameterSet, handler: H) -> Self
    where
        H: ResultHandler<D::RowStream, (), R> + Send + Sync + 'static,
    {
        Self {
            query,
            params,
            projector: Some(Arc::new(handler)),
        }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn params(&self) -> &ParameterSet {
        &self.params
    }

    pub fn is_result_step(&self) -> bool {
        self.projector.is_some()
    }

    pub fn projector(&self) -> Option<&Arc<dyn ResultHandler<D::RowStream, (), R> + Send + Sync>> {
        self.projector.as_ref()
    }
}

/// An ordered sequence of steps executed in one transaction by
/// [`crate::connection::ConnectionManager::run_batch`].
pub struct Batch<D: Driver, R> {
    steps: Vec<BatchStep<D, R>>,
}

impl<D: Driver, R> Default for Batch<D, R> {
    fn default() -> Self {
        Self { steps: Vec::new() }
    }
}

impl<D: Driver, R> Batch<D, R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step; returns `self` for chaining.
    pub fn step(mut self, step: BatchStep<D, R>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(&self) -> &[BatchStep<D, R>] {
        &self.steps
    }
}
