//! A non-sharded collection of [`Database`]s keyed by name (spec.md §4.6).

use indexmap::IndexMap;

use crate::database::Database;
use crate::driver::Driver;

/// An ordered map from database name to [`Database`], for callers that
/// don't need sharding. Exposes the same lookup surface as one
/// [`crate::shard_set::ShardSet`] entry, minus fan-out: callers operate
/// directly on the `Database` a name resolves to.
pub struct Databases<D: Driver> {
    entries: IndexMap<String, Database<D>>,
}

impl<D: Driver> Default for Databases<D> {
    fn default() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }
}

impl<D: Driver> Databases<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a database under `name`. Insertion order is the
    /// collection's iteration order.
    pub fn with(mut self, name: impl Into<String>, database: Database<D>) -> Self {
        self.entries.insert(name.into(), database);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Database<D>> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Database<D>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
