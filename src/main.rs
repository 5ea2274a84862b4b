//! Unified database access server - main entry point.
//!
//! Loads the database configuration, checks every alias once, then serves
//! the MCP tools over stdio until the client disconnects or a signal
//! arrives. SIGHUP reloads the configuration file.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use unified_db::config::Config;
use unified_db::dispatcher::{Dispatcher, ReconnectTask};
use unified_db::registry::Registry;
use unified_db::transport::{StdioTransport, Transport};

/// Initialize the tracing subscriber. Logs go to stderr; stdout carries
/// the protocol.
fn init_tracing(config: &Config) {
    let filter = if config.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.effective_log_level()))
    };

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .init();
    }
}

/// Reload the configuration file on SIGHUP. A rejected document leaves
/// the running configuration in place.
#[cfg(unix)]
fn spawn_reload_task(dispatcher: Dispatcher, config: Config, reconnect: Arc<ReconnectTask>) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGHUP, configuration reload disabled");
            return;
        }
    };
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            info!("Received SIGHUP, reloading configuration");
            let result = match config.load_document() {
                Ok(doc) => dispatcher.reload(&doc).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => {
                    let aliases = dispatcher.registry().len();
                    info!(aliases, "Configuration reloaded");
                    let failed = dispatcher.check_connections(None).await;
                    reconnect.schedule(dispatcher.clone(), failed, config.retry_interval());
                }
                Err(e) => error!(error = %e, "Reload rejected, keeping previous configuration"),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_task(_dispatcher: Dispatcher, _config: Config, _reconnect: Arc<ReconnectTask>) {}

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();
    init_tracing(&config);

    let registry = match config.load_document().and_then(|doc| Registry::load(&doc)) {
        Ok(registry) => registry,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            eprintln!("Error: {e}");
            eprintln!();
            eprintln!("Usage: unified-db --config databases.yaml");
            eprintln!("       unified-db --database <alias>=<url>[?access=read-write]");
            eprintln!();
            eprintln!("Examples:");
            eprintln!("  unified-db --database local=sqlite:///var/data/app.db");
            eprintln!("  unified-db --database sales=postgres://reader@db:5432/sales");
            eprintln!("  unified-db --database shop=mysql://svc@db/shop?access=read-write");
            return ExitCode::FAILURE;
        }
    };

    info!(
        databases = registry.len(),
        "Starting unified-db v{}",
        env!("CARGO_PKG_VERSION")
    );

    let dispatcher = Dispatcher::new(registry);

    // Unreachable databases are not fatal; they are retried in the background
    let reconnect = Arc::new(ReconnectTask::new());
    let failed = dispatcher.check_connections(None).await;
    reconnect.schedule(dispatcher.clone(), failed, config.retry_interval());
    if config.config.is_some() {
        spawn_reload_task(dispatcher.clone(), config.clone(), Arc::clone(&reconnect));
    }

    let transport = StdioTransport::new(dispatcher);
    if let Err(e) = transport.run().await {
        error!(error = %e, "Server error");
        return ExitCode::FAILURE;
    }

    info!("Server shutdown complete");
    ExitCode::SUCCESS
}
