//! Transport layer for the MCP server.
//!
//! Only stdio is provided: the server is launched by an agent host as a
//! child process and speaks JSON-RPC over its standard streams.

pub mod stdio;

pub use stdio::StdioTransport;

use std::future::Future;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to start {transport} transport: {message}")]
    Start {
        transport: &'static str,
        message: String,
    },

    #[error("{transport} transport failed: {message}")]
    Serve {
        transport: &'static str,
        message: String,
    },
}

/// Trait for MCP transport implementations.
pub trait Transport: Send + Sync {
    /// Serve requests until the client disconnects or a shutdown signal
    /// arrives, then close every pool.
    fn run(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn name(&self) -> &'static str;
}
