//! # callcenter-solver
//!
//! Continuous re-planning of call-to-agent assignments.
//!
//! ## Architecture
//!
//! - **Store**: SQLite-backed problem checkpoints, ownership flags and the
//!   pending fact change log, shared by every solver process
//! - **Engine**: the optimization engine contract, its run adapter and the
//!   built-in greedy engine
//! - **Orchestrator**: per-process solver lifecycle, cross-process ownership,
//!   change replay, call pinning and throttled checkpoints
//! - **Messaging**: command dispatch from the bus and outbound notifications

pub mod config;
pub mod engine;
pub mod messaging;
pub mod orchestrator;
pub mod store;

pub use config::Config;
pub use engine::{GreedyEngine, GreedyEngineConfig, OptimizationEngine, SolverRun};
pub use messaging::{ChannelPublisher, MessageGateway, NotificationPublisher};
pub use orchestrator::{OrchestratorConfig, SolverOrchestrator, SolverPhase, SolverStatus, StartOutcome};
pub use store::{SolverStore, SqliteStore};
