//! Configuration for the solver service.

use std::time::Duration;

use anyhow::{Context, Result};

use crate::engine::GreedyEngineConfig;
use crate::orchestrator::OrchestratorConfig;

/// Solver service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Identifies this process in logs.
    pub process_id: String,

    /// Path of the shared SQLite database.
    pub database_path: String,

    /// Minimum spacing between checkpoints in milliseconds.
    pub checkpoint_interval_ms: u64,

    /// Engine step interval in milliseconds.
    pub engine_tick_ms: u64,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let process_id = std::env::var("CALLCENTER_PROCESS_ID")
            .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());

        let database_path = std::env::var("CALLCENTER_DATABASE_PATH")
            .unwrap_or_else(|_| "callcenter.db".to_string());

        let checkpoint_interval_ms = env_millis("CALLCENTER_CHECKPOINT_INTERVAL_MS", 500)?;
        let engine_tick_ms = env_millis("CALLCENTER_ENGINE_TICK_MS", 50)?;

        let log_level =
            std::env::var("CALLCENTER_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            process_id,
            database_path,
            checkpoint_interval_ms,
            engine_tick_ms,
            log_level,
        })
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            process_id: self.process_id.clone(),
            checkpoint_interval: Duration::from_millis(self.checkpoint_interval_ms),
        }
    }

    pub fn engine(&self) -> GreedyEngineConfig {
        GreedyEngineConfig {
            tick: Duration::from_millis(self.engine_tick_ms.max(1)),
            ..GreedyEngineConfig::default()
        }
    }
}

fn env_millis(name: &str, default: u64) -> Result<u64> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("{name} must be a whole number of milliseconds, got {value:?}")),
        Err(_) => Ok(default),
    }
}
