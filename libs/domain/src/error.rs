//! Domain errors.

use callcenter_id::{AgentId, CallId};
use thiserror::Error;

/// Errors raised while mutating or validating a solution.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A call with the same id is already part of the solution.
    #[error("problem facts or entities have the same planning id: call {0}")]
    DuplicateCall(CallId),

    /// An agent referenced by a chain or change does not exist.
    #[error("unknown agent {0}")]
    UnknownAgent(AgentId),

    /// An operation required a call that does not exist.
    #[error("unknown call {0}")]
    UnknownCall(CallId),

    /// The chain structure is inconsistent.
    #[error("broken chain at call {call_id}: {reason}")]
    BrokenChain { call_id: CallId, reason: String },
}
