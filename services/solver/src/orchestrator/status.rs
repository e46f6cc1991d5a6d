//! Process-local solving status.

use callcenter_id::ProblemId;
use serde::Serialize;

/// Lifecycle phase of this process's solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverPhase {
    /// Not solving anything.
    Idle,
    /// Trying to take ownership of a problem.
    Claiming,
    /// An engine run is active.
    Solving,
    /// Waiting for the engine run to wind down.
    Stopping,
    /// The engine run failed; ownership is left for recovery.
    Failed,
}

/// Snapshot published on every phase transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SolverStatus {
    pub problem_id: Option<ProblemId>,
    pub phase: SolverPhase,
}

impl SolverStatus {
    pub const IDLE: Self = Self {
        problem_id: None,
        phase: SolverPhase::Idle,
    };

    /// Returns true if this process is solving the given problem.
    pub fn is_solving(&self, problem_id: ProblemId) -> bool {
        self.phase == SolverPhase::Solving && self.problem_id == Some(problem_id)
    }
}

/// Result of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Ownership was claimed and an engine run started.
    Started { replayed: usize },
    /// This process is already solving the problem.
    AlreadySolving,
    /// This process is solving a different problem.
    Busy { current: ProblemId },
    /// Another process owns the problem.
    OwnedElsewhere,
}
