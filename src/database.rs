//! Shard identifiers and the per-shard (Read, Write) connection pair
//! (spec.md §3's `ShardId` and `Database` entities).

use std::fmt;
use std::sync::Arc;

use crate::connection::ConnectionManager;
use crate::driver::Driver;

/// Opaque, comparable identifier of one shard.
///
/// A thin string wrapper rather than a bare `String` alias, so a shard set
/// can't be indexed by an arbitrary string that was never configured as a
/// shard.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShardId(String);

impl ShardId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShardId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for ShardId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A database's paired read/write connection managers.
///
/// If only one side is configured, both sides alias the same manager
/// (spec.md §3: "if either side is absent, the other substitutes for
/// both").
pub struct Database<D: Driver> {
    read: Arc<ConnectionManager<D>>,
    write: Arc<ConnectionManager<D>>,
}

impl<D: Driver> Database<D> {
    /// Distinct read and write managers.
    pub fn new(read: ConnectionManager<D>, write: ConnectionManager<D>) -> Self {
        Self {
            read: Arc::new(read),
            write: Arc::new(write),
        }
    }

    /// One manager serving both read and write traffic.
    pub fn single(manager: ConnectionManager<D>) -> Self {
        let manager = Arc::new(manager);
        Self {
            read: manager.clone(),
            write: manager,
        }
    }

    pub fn read(&self) -> &ConnectionManager<D> {
        &self.read
    }

    pub fn write(&self) -> &ConnectionManager<D> {
        &self.write
    }
}
