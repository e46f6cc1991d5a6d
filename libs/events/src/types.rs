//! Command and notification payloads.

use std::time::Duration;

use callcenter_domain::{Call, FactChange};
use callcenter_id::{CallId, ProblemId};
use serde::{Deserialize, Serialize};

// =============================================================================
// Channel and Message Type Constants
// =============================================================================

/// Bus channel names.
pub mod channels {
    /// Inbound commands for the solver.
    pub const SOLVER: &str = "solver";
    /// Outbound best solution notifications.
    pub const BEST_SOLUTION: &str = "best_solution";
    /// Outbound solver failures.
    pub const ERROR: &str = "error";
}

/// All message type names as constants.
pub mod message_types {
    // Commands
    pub const START_SOLVER: &str = "solver.start";
    pub const STOP_SOLVER: &str = "solver.stop";
    pub const ADD_CALL: &str = "call.add";
    pub const REMOVE_CALL: &str = "call.remove";
    pub const PROLONG_CALL: &str = "call.prolong";

    // Notifications
    pub const BEST_SOLUTION_CHANGED: &str = "solution.best_changed";
    pub const SOLVER_ERROR: &str = "solver.error";
}

/// Current schema version of every message type.
pub const CURRENT_MESSAGE_VERSION: i32 = 1;

/// Payloads that can travel inside an envelope.
pub trait MessagePayload {
    /// The message type name (see [`message_types`]).
    fn message_type(&self) -> &'static str;
}

// =============================================================================
// Inbound Commands
// =============================================================================

/// A command for the solver. The target problem is the envelope's partition key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SolverCommand {
    StartSolver,
    StopSolver,
    AddCall {
        call: Call,
    },
    RemoveCall {
        call_id: CallId,
    },
    ProlongCall {
        call_id: CallId,
        #[serde(with = "callcenter_domain::serde_secs")]
        prolongation: Duration,
    },
}

impl SolverCommand {
    /// Converts call commands into the fact change they request.
    pub fn into_fact_change(self) -> Option<FactChange> {
        match self {
            SolverCommand::StartSolver | SolverCommand::StopSolver => None,
            SolverCommand::AddCall { call } => Some(FactChange::AddCall { call }),
            SolverCommand::RemoveCall { call_id } => Some(FactChange::RemoveCall { call_id }),
            SolverCommand::ProlongCall {
                call_id,
                prolongation,
            } => Some(FactChange::ProlongCall {
                call_id,
                prolongation,
            }),
        }
    }
}

impl MessagePayload for SolverCommand {
    fn message_type(&self) -> &'static str {
        match self {
            SolverCommand::StartSolver => message_types::START_SOLVER,
            SolverCommand::StopSolver => message_types::STOP_SOLVER,
            SolverCommand::AddCall { .. } => message_types::ADD_CALL,
            SolverCommand::RemoveCall { .. } => message_types::REMOVE_CALL,
            SolverCommand::ProlongCall { .. } => message_types::PROLONG_CALL,
        }
    }
}

// =============================================================================
// Outbound Notifications
// =============================================================================

/// A notification raised by the solver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SolverNotification {
    /// A new checkpoint is available; consumers re-fetch it.
    BestSolutionChanged { problem_id: ProblemId },
    /// Solving failed.
    Error {
        problem_id: ProblemId,
        exception_class_name: String,
        exception_message: String,
    },
}

impl SolverNotification {
    pub fn problem_id(&self) -> ProblemId {
        match self {
            SolverNotification::BestSolutionChanged { problem_id }
            | SolverNotification::Error { problem_id, .. } => *problem_id,
        }
    }

    /// The outbound channel this notification is published on.
    pub fn channel(&self) -> &'static str {
        match self {
            SolverNotification::BestSolutionChanged { .. } => channels::BEST_SOLUTION,
            SolverNotification::Error { .. } => channels::ERROR,
        }
    }
}

impl MessagePayload for SolverNotification {
    fn message_type(&self) -> &'static str {
        match self {
            SolverNotification::BestSolutionChanged { .. } => message_types::BEST_SOLUTION_CHANGED,
            SolverNotification::Error { .. } => message_types::SOLVER_ERROR,
        }
    }
}
