//! Database access layer.
//!
//! - `driver`: one [`BackendDriver`] per backend, plus statement classification
//! - `connection_pool`: the generic bounded pool and its leases
//! - `pool`: static dispatch over the three pool types, keyed by alias
//! - `executor`: read-only gate, timeouts and failure classification
//! - `normalize`/`types`: backend rows into the canonical result shape
//! - `schema`: per-backend introspection queries

pub mod connection_pool;
pub mod driver;
pub mod executor;
#[macro_use]
pub mod macros;
pub mod normalize;
pub mod params;
pub mod pool;
pub mod schema;
pub mod types;

pub use connection_pool::{Lease, Pool, PoolStats};
pub use driver::{BackendDriver, ExecOptions, StatementKind, classify_sql};
pub use executor::{QueryError, QueryExecutor};
pub use normalize::{RawColumn, RawResult, normalize};
pub use pool::{ConnectionManager, DbPool};
