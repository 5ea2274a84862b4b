//! Unified database access library.
//!
//! One dispatcher in front of PostgreSQL, MySQL/MariaDB and SQLite: named
//! aliases from configuration, per-alias connection pools, parameterized
//! execution under timeouts and row limits, read-only enforcement, and a
//! single canonical result shape. The MCP server in [`mcp`] exposes it to
//! agents over stdio.

pub mod config;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod mcp;
pub mod models;
pub mod registry;
pub mod transport;

pub use config::Config;
pub use dispatcher::Dispatcher;
pub use error::DbError;
pub use mcp::DbService;
pub use registry::Registry;
