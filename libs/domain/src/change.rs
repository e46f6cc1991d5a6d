//! Fact changes applied to a working solution.
//!
//! Client commands become [`FactChange`]s, which are appended to the change
//! log (receiving a [`ChangeId`]) before the engine ever sees them. The engine
//! consumes [`ProblemChange`]s: either a logged change or a synthetic pin
//! raised by the orchestrator when an agent starts handling a call.
//!
//! # Invariants
//!
//! - Applying a logged change stamps `last_change_id` with its id
//! - A logged change already reflected in the solution is skipped, so replaying
//!   the log after a restart is idempotent
//! - Pinned calls keep their agent until they are removed

use std::time::Duration;

use callcenter_id::{AgentId, CallId, ChangeId, ProblemId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Call, CallCenter, DomainError};

/// An incremental mutation requested by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FactChange {
    AddCall {
        call: Call,
    },
    RemoveCall {
        call_id: CallId,
    },
    ProlongCall {
        call_id: CallId,
        #[serde(with = "crate::serde_secs")]
        prolongation: Duration,
    },
}

impl FactChange {
    /// Short name used in logs and the change log `kind` column.
    pub fn kind(&self) -> &'static str {
        match self {
            FactChange::AddCall { .. } => "add_call",
            FactChange::RemoveCall { .. } => "remove_call",
            FactChange::ProlongCall { .. } => "prolong_call",
        }
    }

    /// The call this change targets.
    pub fn call_id(&self) -> CallId {
        match self {
            FactChange::AddCall { call } => call.id,
            FactChange::RemoveCall { call_id } | FactChange::ProlongCall { call_id, .. } => *call_id,
        }
    }
}

/// A fact change that has been durably appended to the change log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedChange {
    pub change_id: ChangeId,
    pub problem_id: ProblemId,
    pub change: FactChange,
}

/// What applying a change did to the working solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// The solution was mutated.
    Applied,
    /// The solution already reflected the change.
    Skipped,
    /// The target call does not exist; nothing changed except the watermark.
    NoOp,
}

impl PersistedChange {
    /// Applies the change to the working solution.
    ///
    /// `RemoveCall`/`ProlongCall` targeting an unknown call are no-ops that
    /// still advance the watermark.
    pub fn apply(&self, solution: &mut CallCenter) -> Result<ChangeOutcome, DomainError> {
        if self.change_id.is_reflected_in(solution.last_change_id) {
            return Ok(ChangeOutcome::Skipped);
        }

        let outcome = match &self.change {
            FactChange::AddCall { call } => {
                if solution.calls.contains_key(&call.id) {
                    return Err(DomainError::DuplicateCall(call.id));
                }
                let mut call = call.clone();
                call.previous = None;
                call.estimated_waiting = None;
                solution.calls.insert(call.id, call);
                ChangeOutcome::Applied
            }
            FactChange::RemoveCall { call_id } => {
                if solution.calls.contains_key(call_id) {
                    solution.remove_call(*call_id)?;
                    ChangeOutcome::Applied
                } else {
                    ChangeOutcome::NoOp
                }
            }
            FactChange::ProlongCall {
                call_id,
                prolongation,
            } => match solution.calls.get_mut(call_id) {
                Some(call) => {
                    call.duration = call.duration.saturating_add(*prolongation);
                    ChangeOutcome::Applied
                }
                None => ChangeOutcome::NoOp,
            },
        };

        solution.last_change_id = Some(self.change_id);
        Ok(outcome)
    }
}

/// A change consumed by the optimization engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProblemChange {
    /// A change from the change log.
    Logged(PersistedChange),
    /// Lock a call to the agent that started handling it.
    PinCall {
        call_id: CallId,
        agent_id: AgentId,
        pick_up_time: DateTime<Utc>,
    },
}

impl ProblemChange {
    pub fn apply(&self, solution: &mut CallCenter) -> Result<ChangeOutcome, DomainError> {
        match self {
            ProblemChange::Logged(change) => change.apply(solution),
            ProblemChange::PinCall {
                call_id,
                agent_id,
                pick_up_time,
            } => pin_call(solution, *call_id, *agent_id, *pick_up_time),
        }
    }

    pub fn change_id(&self) -> Option<ChangeId> {
        match self {
            ProblemChange::Logged(change) => Some(change.change_id),
            ProblemChange::PinCall { .. } => None,
        }
    }
}

impl From<PersistedChange> for ProblemChange {
    fn from(change: PersistedChange) -> Self {
        ProblemChange::Logged(change)
    }
}

fn pin_call(
    solution: &mut CallCenter,
    call_id: CallId,
    agent_id: AgentId,
    pick_up_time: DateTime<Utc>,
) -> Result<ChangeOutcome, DomainError> {
    let Some(call) = solution.calls.get(&call_id) else {
        // Removed before the pin arrived.
        return Ok(ChangeOutcome::NoOp);
    };
    if call.pinned {
        return Ok(ChangeOutcome::Skipped);
    }
    if !solution.agents.contains_key(&agent_id) {
        return Err(DomainError::UnknownAgent(agent_id));
    }

    // The working solution may have moved the call since the best solution
    // was published; put it back right behind the agent's pinned prefix.
    let target = solution.pinned_tail(agent_id);
    if call.previous != Some(target) {
        solution.detach(call_id)?;
        let target = solution.pinned_tail(agent_id);
        solution.insert_after(call_id, target)?;
    }

    if let Some(call) = solution.calls.get_mut(&call_id) {
        call.pinned = true;
        call.pick_up_time = Some(pick_up_time);
    }
    Ok(ChangeOutcome::Applied)
}

/// Marks every unpinned chain-head call as pinned and picked up at `now`.
///
/// Returns the pin changes the engine needs so its working copy agrees.
pub fn pin_chain_heads(solution: &mut CallCenter, now: DateTime<Utc>) -> Vec<ProblemChange> {
    let mut pins = Vec::new();
    for call in solution.calls.values_mut() {
        let Some(agent_id) = call.previous.and_then(|pred| pred.as_agent()) else {
            continue;
        };
        if call.pinned {
            continue;
        }
        call.pinned = true;
        call.pick_up_time = Some(now);
        pins.push(ProblemChange::PinCall {
            call_id: call.id,
            agent_id,
            pick_up_time: now,
        });
    }
    pins
}
