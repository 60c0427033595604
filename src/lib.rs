//! ShardKit: a sharded data-access framework.
//!
//! A [`ShardSet`] groups one [`Database`] per [`ShardId`], and a
//! [`Database`] pairs a read and a write [`ConnectionManager`]. Each
//! manager wraps one [`Driver`] with retry back-off and a circuit breaker
//! ([`ResiliencePolicy`]), so callers issue [`Query`]/[`ParameterSet`]
//! pairs and get rows back through a [`ResultHandler`] without touching
//! connection lifecycle themselves.
//!
//! Non-sharded callers use [`Databases`] instead of a `ShardSet`: a plain
//! name-to-`Database` lookup with no fan-out.

pub mod batch;
pub mod config;
pub mod connection;
pub mod database;
pub mod databases;
pub mod driver;
pub mod error;
pub mod handler;
pub mod mock;
pub mod params;
pub mod query;
pub mod resilience;
pub mod shard_set;

pub use batch::{Batch, BatchStep};
pub use config::{Credentials, Endpoint, ResilienceRegistry};
pub use connection::ConnectionManager;
pub use database::{Database, ShardId};
pub use databases::Databases;
pub use driver::{Driver, FromOutputParams, FromRow, OutputParameters, Row, RowStream};
pub use error::{Error, Verdict};
pub use handler::{CombinedHandler, OutputHandler, ResultHandler, RowsHandler, WithRows};
pub use mock::MockResultTable;
pub use params::{Direction, Parameter, ParameterSet, ShardParameterValues, TypeHint, Value};
pub use query::{CommandKind, Query};
pub use resilience::{Admission, BreakerPhase, BreakerState, Lengthening, ResiliencePolicy};
pub use shard_set::ShardSet;
