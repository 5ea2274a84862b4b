//! MCP server integration.
//!
//! Bridges the dispatcher to the MCP protocol with the rmcp framework.

pub mod service;

pub use service::DbService;
