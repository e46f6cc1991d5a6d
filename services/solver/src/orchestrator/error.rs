//! Orchestrator error types.

use callcenter_id::ProblemId;
use thiserror::Error;

use crate::engine::EngineError;
use crate::store::StoreError;

/// Errors from solver lifecycle operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("problem {0} not found in the problem state store")]
    NotFound(ProblemId),

    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),

    #[error("solver run failed: {0}")]
    Engine(#[from] EngineError),
}
