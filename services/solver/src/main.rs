//! Call center solver service
//!
//! Keeps an optimal assignment of incoming calls to agents while calls are
//! added, removed and prolonged. Several instances can share one database;
//! the ownership flag in the store decides which one solves a problem.
//!
//! ## Architecture
//!
//! - **Bus binding**: commands as JSON lines on stdin, notifications as JSON
//!   lines on stdout, logs as JSON on stderr
//! - **Gateway**: dispatches commands to the orchestrator in arrival order
//! - **Orchestrator**: claims problems, drives the engine, checkpoints
//! - **Recovery**: at boot, resumes a problem left active by a crashed process

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use callcenter_solver::messaging::stdio;
use callcenter_solver::{
    ChannelPublisher, Config, GreedyEngine, MessageGateway, SolverOrchestrator, SqliteStore,
};
use tokio::io::BufReader;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Inbound commands buffered between the stdin reader and the gateway.
const COMMAND_BUFFER: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing; stdout is reserved for notifications
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    info!("Starting call center solver");
    info!(
        process_id = %config.process_id,
        database_path = %config.database_path,
        checkpoint_interval_ms = config.checkpoint_interval_ms,
        engine_tick_ms = config.engine_tick_ms,
        "Configuration loaded"
    );

    let store = Arc::new(
        SqliteStore::open(&config.database_path)
            .with_context(|| format!("failed to open database {}", config.database_path))?,
    );
    let engine = Arc::new(GreedyEngine::new(config.engine()));
    let (publisher, notifications) = ChannelPublisher::new();
    let orchestrator =
        SolverOrchestrator::new(store, engine, Arc::new(publisher), config.orchestrator());

    // Resume whatever a previous process left active
    match orchestrator.recover().await {
        Ok(Some(problem_id)) => info!(%problem_id, "Recovered active problem"),
        Ok(None) => {}
        Err(e) => error!(error = %e, "Recovery failed"),
    }

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);

    let reader_handle = tokio::spawn(async move {
        stdio::read_commands(BufReader::new(tokio::io::stdin()), command_tx).await
    });
    let writer_handle = tokio::spawn(stdio::write_notifications(tokio::io::stdout(), notifications));

    let gateway = MessageGateway::new(orchestrator.clone());
    let mut gateway_handle = tokio::spawn(async move {
        gateway.run(command_rx, shutdown_rx).await;
    });

    // Wait for shutdown signal or end of input
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut gateway_handle => {
            if let Err(e) = result {
                error!(error = %e, "Gateway task panicked");
            }
        }
    }

    let _ = shutdown_tx.send(true);
    if !gateway_handle.is_finished() {
        if let Err(e) = gateway_handle.await {
            error!(error = %e, "Gateway task panicked");
        }
    }
    reader_handle.abort();

    // Keep ownership so the next instance resumes where this one stopped
    if let Some(problem_id) = orchestrator.shutdown().await {
        info!(%problem_id, "Active problem left for recovery");
    }
    drop(orchestrator);

    // The writer ends once every publisher handle is gone
    match tokio::time::timeout(Duration::from_secs(2), writer_handle).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!(error = %e, "Notification writer failed"),
        Ok(Err(e)) => error!(error = %e, "Notification writer panicked"),
        Err(_) => warn!("Timed out flushing notifications"),
    }

    info!("Solver shutdown complete");
    Ok(())
}
