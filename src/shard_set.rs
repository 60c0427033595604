//! The shard-set fan-out and result-combination engine (spec.md §4.4).

use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::database::{Database, ShardId};
use crate::driver::Driver;
use crate::error::Error;
use crate::handler::ResultHandler;
use crate::mock::MockResultTable;
use crate::params::{Parameter, ParameterSet, ShardParameterValues};
use crate::query::Query;

/// An ordered map from shard identifier to [`Database`], with the three
/// dispatchers defined in spec.md §4.4 on top.
pub struct ShardSet<D: Driver> {
    name: String,
    entries: IndexMap<ShardId, Database<D>>,
    default_shard: Option<ShardId>,
}

impl<D: Driver> ShardSet<D> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: IndexMap::new(),
            default_shard: None,
        }
    }

    /// Append a shard. Order of calls is the shard-iteration order used by
    /// every dispatcher and ordering guarantee.
    pub fn with_shard(mut self, id: impl Into<ShardId>, database: Database<D>) -> Self {
        self.entries.insert(id.into(), database);
        self
    }

    pub fn with_default_shard(mut self, id: impl Into<ShardId>) -> Self {
        self.default_shard = Some(id.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_shard(&self) -> Option<&ShardId> {
        self.default_shard.as_ref()
    }

    pub fn get(&self, id: &ShardId) -> Option<&Database<D>> {
        self.entries.get(id)
    }

    /// Resolve the configured default shard, for callers that want one
    /// shard directly rather than fanning out through a dispatcher.
    pub fn default_target(&self) -> Result<&Database<D>, Error> {
        let id = self
            .default_shard
            .as_ref()
            .ok_or_else(|| Error::NoShard(self.name.clone()))?;
        self.entries
            .get(id)
            .ok_or_else(|| Error::UnknownShard(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn shard_ids(&self) -> impl Iterator<Item = &ShardId> {
        self.entries.keys()
    }

    /// Resolve the ordered, validated target shard list (spec.md §4.4).
    fn targets(&self, overrides: Option<&ShardParameterValues>) -> Result<Vec<ShardId>, Error> {
        match overrides {
            Some(values) if !values.is_empty() => {
                let requested: Vec<ShardId> = values.shards().map(|s| ShardId::from(s)).collect();
                for shard in &requested {
                    if !self.entries.contains_key(shard) {
                        return Err(Error::UnknownShard(shard.to_string()));
                    }
                }
                Ok(self
                    .entries
                    .keys()
                    .filter(|k| requested.contains(k))
                    .cloned()
                    .collect())
            }
            _ => Ok(self.entries.keys().cloned().collect()),
        }
    }

    /// Clone the base parameter set and apply this shard's overrides plus
    /// the shard-identifier parameter, if named. The caller's `base` is
    /// never mutated (spec.md §5, Testable Property 5).
    fn params_for_shard(
        base: &ParameterSet,
        shard: &ShardId,
        overrides: Option<&ShardParameterValues>,
        shard_parameter_name: Option<&str>,
    ) -> ParameterSet {
        let mut params = base.clone();
        if let Some(values) = overrides {
            if let Some(shard_overrides) = values.get(shard.as_str()) {
                for (name, value) in shard_overrides {
                    params.set(name.clone(), Parameter::input(value.clone()));
                }
            }
        }
        if let Some(name) = shard_parameter_name {
            params.set(name, Parameter::input(shard.to_string()));
        }
        params
    }

    /// Submit to every target shard's Read manager, collecting results in
    /// shard-iteration order. The first non-retried error cancels the
    /// remaining shards and is surfaced (spec.md §4.4 "ReadAll").
    pub async fn read_all<Arg, Model, H>(
        &self,
        query: &Query,
        params: &ParameterSet,
        handler: &H,
        arg: &Arg,
        overrides: Option<&ShardParameterValues>,
        shard_parameter_name: Option<&str>,
        mocks: &MockResultTable,
        cancel: &CancellationToken,
    ) -> Result<Vec<Model>, Error>
    where
        H: ResultHandler<D::RowStream, Arg, Model> + Sync,
        Arg: Send + Sync,
        Model: Clone + Send + 'static,
    {
        self.fan_out_all(
            query,
            params,
            handler,
            arg,
            overrides,
            shard_parameter_name,
            mocks,
            cancel,
            |db| db.read(),
        )
        .await
    }

    /// Same as `read_all`, routed to Write managers (spec.md §4.4
    /// "WriteAll").
    pub async fn write_all<Arg, Model, H>(
        &self,
        query: &Query,
        params: &ParameterSet,
        handler: &H,
        arg: &Arg,
        overrides: Option<&ShardParameterValues>,
        shard_parameter_name: Option<&str>,
        mocks: &MockResultTable,
        cancel: &CancellationToken,
    ) -> Result<Vec<Model>, Error>
    where
        H: ResultHandler<D::RowStream, Arg, Model> + Sync,
        Arg: Send + Sync,
        Model: Clone + Send + 'static,
    {
        self.fan_out_all(
            query,
            params,
            handler,
            arg,
            overrides,
            shard_parameter_name,
            mocks,
            cancel,
            |db| db.write(),
        )
        .await
    }

    async fn fan_out_all<Arg, Model, H>(
        &self,
        query: &Query,
        params: &ParameterSet,
        handler: &H,
        arg: &Arg,
        overrides: Option<&ShardParameterValues>,
        shard_parameter_name: Option<&str>,
        mocks: &MockResultTable,
        cancel: &CancellationToken,
        pick: impl Fn(&Database<D>) -> &crate::connection::ConnectionManager<D>,
    ) -> Result<Vec<Model>, Error>
    where
        H: ResultHandler<D::RowStream, Arg, Model> + Sync,
        Arg: Send + Sync,
        Model: Clone + Send + 'static,
    {
        let targets = self.targets(overrides)?;
        let child_cancel = cancel.child_token();

        let mut futures = FuturesUnordered::new();
        for (index, shard) in targets.iter().enumerate() {
            let database = self.entries.get(shard).expect("target shard exists in this set");
            let manager = pick(database);
            let shard_params = Self::params_for_shard(params, shard, overrides, shard_parameter_name);
            let shard_cancel = child_cancel.clone();
            futures.push(async move {
                let result = manager
                    .query(query, &shard_params, handler, arg, mocks, &shard_cancel)
                    .await;
                (index, result)
            });
        }

        let mut results: Vec<Option<Model>> = (0..targets.len()).map(|_| None).collect();

        while let Some((index, result)) = futures.next().await {
            match result {
                Ok(Some(model)) => results[index] = Some(model),
                Ok(None) => {}
                Err(err) => {
                    // Cancel the token every sibling's query polls against,
                    // then drop `futures` (ending the loop) without
                    // awaiting the rest: they stop making progress the
                    // next time they're polled, instead of being drained
                    // to completion (spec.md §4.4: "cancel all siblings").
                    child_cancel.cancel();
                    return Err(err);
                }
            }
        }

        Ok(results.into_iter().flatten().collect())
    }

    /// Submit concurrently to every target shard's Read manager; return as
    /// soon as any handler produces a non-`None` value. Ties are broken
    /// by shard-iteration order; failures observed after a winner is
    /// chosen are suppressed and logged (spec.md §4.4 "ReadFirst").
    pub async fn read_first<Arg, Model, H>(
        &self,
        query: &Query,
        params: &ParameterSet,
        handler: &H,
        arg: &Arg,
        overrides: Option<&ShardParameterValues>,
        shard_parameter_name: Option<&str>,
        mocks: &MockResultTable,
        cancel: &CancellationToken,
    ) -> Result<Option<Model>, Error>
    where
        H: ResultHandler<D::RowStream, Arg, Model> + Sync,
        Arg: Send + Sync,
        Model: Clone + Send + 'static,
    {
        let targets = self.targets(overrides)?;
        let child_cancel = cancel.child_token();

        let mut futures = FuturesUnordered::new();
        for (index, shard) in targets.iter().enumerate() {
            let database = self.entries.get(shard).expect("target shard exists in this set");
            let manager = database.read();
            let shard_params = Self::params_for_shard(params, shard, overrides, shard_parameter_name);
            let shard_cancel = child_cancel.clone();
            futures.push(async move {
                let result = manager
                    .query(query, &shard_params, handler, arg, mocks, &shard_cancel)
                    .await;
                (index, result)
            });
        }

        let mut errors: Vec<(usize, Error)> = Vec::new();
        let mut winner: Option<Model> = None;

        while let Some((index, result)) = futures.next().await {
            match result {
                Ok(Some(model)) => {
                    // Drain any other shards that completed in the same
                    // wake cycle, so a genuine tie resolves by shard
                    // index rather than by poll order.
                    let mut candidates = vec![(index, model)];
                    while let Some(Some((i, r))) = futures.next().now_or_never() {
                        match r {
                            Ok(Some(m)) => candidates.push((i, m)),
                            Ok(None) => {}
                            Err(e) => errors.push((i, e)),
                        }
                    }
                    candidates.sort_by_key(|(i, _)| *i);
                    winner = Some(candidates.into_iter().next().unwrap().1);
                    child_cancel.cancel();
                    break;
                }
                Ok(None) => {}
                Err(err) => errors.push((index, err)),
            }
        }

        if let Some(model) = winner {
            for (index, err) in &errors {
                warn!(shard_index = index, error = %err, "shard failed after ReadFirst winner was chosen");
            }
            return Ok(Some(model));
        }

        match errors.into_iter().next() {
            Some((_, err)) => Err(err),
            None => Ok(None),
        }
    }
}
