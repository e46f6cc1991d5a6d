//! Optimization engine interface.
//!
//! An engine improves a [`CallCenter`] continuously until told to stop:
//! - problem changes arrive through the [`SolverSession`] and must be applied
//!   to the working solution before the next best solution is published
//! - every improved solution is emitted as a [`SolverEvent::BestSolution`]
//!
//! [`SolverRun`] drives an engine on a dedicated task and is the only handle
//! the orchestrator holds.

mod greedy;
mod run;

use async_trait::async_trait;
use callcenter_domain::{CallCenter, DomainError, ProblemChange};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

pub use greedy::{GreedyEngine, GreedyEngineConfig};
pub use run::{ChangeInjector, SolverEventStream, SolverRun};

/// Errors raised by an engine run.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("solver run has ended")]
    Terminated,

    #[error("engine failure: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable failure class name reported in error notifications.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Domain(DomainError::DuplicateCall(_)) => "duplicate_call",
            Self::Domain(DomainError::UnknownAgent(_)) => "unknown_agent",
            Self::Domain(DomainError::UnknownCall(_)) => "unknown_call",
            Self::Domain(DomainError::BrokenChain { .. }) => "broken_chain",
            Self::Terminated => "terminated",
            Self::Internal(_) => "internal",
        }
    }
}

/// Output of a running engine.
#[derive(Debug, Clone)]
pub enum SolverEvent {
    /// A new best solution.
    BestSolution {
        solution: CallCenter,
        /// False while injected changes are still queued behind this solution.
        all_changes_processed: bool,
    },
    /// The run aborted; no further events follow.
    Failed(EngineError),
}

/// The engine's side of a run.
pub struct SolverSession {
    changes: mpsc::UnboundedReceiver<ProblemChange>,
    events: mpsc::UnboundedSender<SolverEvent>,
    shutdown: watch::Receiver<bool>,
}

impl SolverSession {
    pub(crate) fn new(
        changes: mpsc::UnboundedReceiver<ProblemChange>,
        events: mpsc::UnboundedSender<SolverEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            changes,
            events,
            shutdown,
        }
    }

    /// Takes every change queued so far, in injection order.
    pub fn drain_changes(&mut self) -> Vec<ProblemChange> {
        let mut drained = Vec::new();
        while let Ok(change) = self.changes.try_recv() {
            drained.push(change);
        }
        drained
    }

    /// True if changes are waiting to be applied.
    pub fn has_pending_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Emits a best solution. Returns false once nobody is listening.
    pub fn publish_best(&self, solution: CallCenter) -> bool {
        let all_changes_processed = !self.has_pending_changes();
        self.events
            .send(SolverEvent::BestSolution {
                solution,
                all_changes_processed,
            })
            .is_ok()
    }

    /// Resolves once termination is requested or the run handle is dropped.
    pub async fn terminated(&mut self) {
        // An error means the sender was dropped, which also ends the run
        let _ = self.shutdown.wait_for(|stop| *stop).await;
    }
}

/// A continuous optimizer.
#[async_trait]
pub trait OptimizationEngine: Send + Sync {
    /// Solves `problem` until the session is terminated.
    ///
    /// Returning an error fails the run; the adapter reports it as a
    /// [`SolverEvent::Failed`].
    async fn solve(&self, problem: CallCenter, session: SolverSession) -> Result<(), EngineError>;
}
