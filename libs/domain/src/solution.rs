//! The problem instance: an arena of agents and calls linked into chains.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use callcenter_id::{AgentId, CallId, ChangeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Agent, Call, DomainError, HardSoftScore, Predecessor};

/// A call center planning problem and, once solved, its assignment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallCenter {
    #[serde(default)]
    pub agents: BTreeMap<AgentId, Agent>,
    #[serde(default)]
    pub calls: BTreeMap<CallId, Call>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<HardSoftScore>,
    /// Highest logged change already reflected in this solution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_change_id: Option<ChangeId>,
}

impl CallCenter {
    pub fn new(agents: impl IntoIterator<Item = Agent>, calls: impl IntoIterator<Item = Call>) -> Self {
        Self {
            agents: agents.into_iter().map(|a| (a.id, a)).collect(),
            calls: calls.into_iter().map(|c| (c.id, c)).collect(),
            score: None,
            last_change_id: None,
        }
    }

    // -------------------------------------------------------------------------
    // Chain navigation
    // -------------------------------------------------------------------------

    /// Returns the call whose predecessor is `pred`, if any.
    pub fn next_call(&self, pred: Predecessor) -> Option<CallId> {
        self.calls
            .values()
            .find(|c| c.previous == Some(pred))
            .map(|c| c.id)
    }

    /// First call in the agent's chain.
    pub fn chain_head(&self, agent_id: AgentId) -> Option<CallId> {
        self.next_call(Predecessor::Agent(agent_id))
    }

    /// Maps every linked predecessor to the call behind it.
    pub fn successors(&self) -> BTreeMap<Predecessor, CallId> {
        self.calls
            .values()
            .filter_map(|c| c.previous.map(|pred| (pred, c.id)))
            .collect()
    }

    /// Calls assigned to the agent, head first.
    pub fn chain(&self, agent_id: AgentId) -> Vec<CallId> {
        self.walk_chain(&self.successors(), agent_id)
    }

    fn walk_chain(&self, successors: &BTreeMap<Predecessor, CallId>, agent_id: AgentId) -> Vec<CallId> {
        let mut chain = Vec::new();
        let mut cursor = successors.get(&Predecessor::Agent(agent_id)).copied();
        while let Some(call_id) = cursor {
            if chain.len() > self.calls.len() {
                break;
            }
            chain.push(call_id);
            cursor = successors.get(&Predecessor::Call(call_id)).copied();
        }
        chain
    }

    /// Agent anchoring the chain the call belongs to, or `None` if unassigned.
    pub fn anchor(&self, call_id: CallId) -> Option<AgentId> {
        let mut cursor = self.calls.get(&call_id)?.previous;
        for _ in 0..=self.calls.len() {
            match cursor? {
                Predecessor::Agent(agent_id) => return Some(agent_id),
                Predecessor::Call(prev) => cursor = self.calls.get(&prev)?.previous,
            }
        }
        None
    }

    /// Last element of the agent's chain (the agent itself when empty).
    pub fn chain_tail(&self, agent_id: AgentId) -> Predecessor {
        self.chain(agent_id)
            .last()
            .map(|id| Predecessor::Call(*id))
            .unwrap_or(Predecessor::Agent(agent_id))
    }

    /// Last pinned call of the agent's chain (the agent itself when none is pinned).
    pub fn pinned_tail(&self, agent_id: AgentId) -> Predecessor {
        let mut tail = Predecessor::Agent(agent_id);
        for call_id in self.chain(agent_id) {
            match self.calls.get(&call_id) {
                Some(call) if call.pinned => tail = Predecessor::Call(call_id),
                _ => break,
            }
        }
        tail
    }

    pub fn unassigned_calls(&self) -> Vec<CallId> {
        self.calls
            .values()
            .filter(|c| c.previous.is_none())
            .map(|c| c.id)
            .collect()
    }

    /// True once every call is assigned to some chain.
    pub fn is_initialized(&self) -> bool {
        self.calls.values().all(|c| c.previous.is_some())
    }

    // -------------------------------------------------------------------------
    // Chain mutation
    // -------------------------------------------------------------------------

    /// Unlinks a call from its chain, re-linking its successor to its predecessor.
    pub fn detach(&mut self, call_id: CallId) -> Result<(), DomainError> {
        let previous = self
            .calls
            .get(&call_id)
            .ok_or(DomainError::UnknownCall(call_id))?
            .previous;
        if previous.is_none() {
            return Ok(());
        }

        if let Some(next_id) = self.next_call(Predecessor::Call(call_id)) {
            if let Some(next) = self.calls.get_mut(&next_id) {
                next.previous = previous;
            }
        }
        if let Some(call) = self.calls.get_mut(&call_id) {
            call.previous = None;
        }
        Ok(())
    }

    /// Links a detached call directly behind `pred`, pushing the former successor back.
    pub fn insert_after(&mut self, call_id: CallId, pred: Predecessor) -> Result<(), DomainError> {
        match self.calls.get(&call_id) {
            None => return Err(DomainError::UnknownCall(call_id)),
            Some(call) if call.previous.is_some() => {
                return Err(DomainError::BrokenChain {
                    call_id,
                    reason: "call must be detached before insertion".to_string(),
                })
            }
            Some(_) => {}
        }
        match pred {
            Predecessor::Agent(agent_id) if !self.agents.contains_key(&agent_id) => {
                return Err(DomainError::UnknownAgent(agent_id))
            }
            Predecessor::Call(prev) if prev == call_id || !self.calls.contains_key(&prev) => {
                return Err(DomainError::BrokenChain {
                    call_id,
                    reason: format!("invalid predecessor call {prev}"),
                })
            }
            _ => {}
        }

        let old_next = self.next_call(pred);
        if let Some(call) = self.calls.get_mut(&call_id) {
            call.previous = Some(pred);
        }
        if let Some(next) = old_next.and_then(|id| self.calls.get_mut(&id)) {
            next.previous = Some(Predecessor::Call(call_id));
        }
        Ok(())
    }

    /// Appends a detached call to the end of the agent's chain.
    pub fn append_to_chain(&mut self, call_id: CallId, agent_id: AgentId) -> Result<(), DomainError> {
        let tail = self.chain_tail(agent_id);
        self.insert_after(call_id, tail)
    }

    /// Removes a call, closing the gap in its chain.
    pub fn remove_call(&mut self, call_id: CallId) -> Result<Call, DomainError> {
        self.detach(call_id)?;
        self.calls
            .remove(&call_id)
            .ok_or(DomainError::UnknownCall(call_id))
    }

    // -------------------------------------------------------------------------
    // Derived values
    // -------------------------------------------------------------------------

    /// Recomputes estimated waiting times for every call and the score.
    pub fn refresh(&mut self, now: DateTime<Utc>) {
        self.update_waiting_times(now);
        self.score = Some(self.compute_score());
    }

    /// Each call waits for the remaining work of every call ahead of it.
    pub fn update_waiting_times(&mut self, now: DateTime<Utc>) {
        let successors = self.successors();
        let mut waiting: BTreeMap<CallId, Duration> = BTreeMap::new();
        for agent_id in self.agents.keys().copied() {
            let mut ahead = Duration::ZERO;
            for call_id in self.walk_chain(&successors, agent_id) {
                waiting.insert(call_id, ahead);
                if let Some(call) = self.calls.get(&call_id) {
                    ahead = ahead.saturating_add(call.remaining_duration(now));
                }
            }
        }
        for call in self.calls.values_mut() {
            call.estimated_waiting = waiting.get(&call.id).copied();
        }
    }

    /// Hard: missing skills of assigned calls. Soft: squared waiting seconds.
    pub fn compute_score(&self) -> HardSoftScore {
        let successors = self.successors();
        let mut hard = 0i64;
        let mut soft = 0i64;
        for agent in self.agents.values() {
            for call in self
                .walk_chain(&successors, agent.id)
                .iter()
                .filter_map(|id| self.calls.get(id))
            {
                hard = hard.saturating_sub(i64::try_from(call.missing_skills(agent)).unwrap_or(i64::MAX));
                let waiting = i64::try_from(call.estimated_waiting.unwrap_or_default().as_secs()).unwrap_or(i64::MAX);
                soft = soft.saturating_sub(waiting.saturating_mul(waiting));
            }
        }
        HardSoftScore::of(hard, soft)
    }

    /// Checks that chains are well formed: known predecessors, no branching, no cycles.
    pub fn validate(&self) -> Result<(), DomainError> {
        let mut used: BTreeSet<Predecessor> = BTreeSet::new();
        for call in self.calls.values() {
            let Some(pred) = call.previous else {
                continue;
            };
            let known = match pred {
                Predecessor::Agent(id) => self.agents.contains_key(&id),
                Predecessor::Call(id) => self.calls.contains_key(&id),
            };
            if !known {
                return Err(DomainError::BrokenChain {
                    call_id: call.id,
                    reason: format!("unknown predecessor {pred:?}"),
                });
            }
            if !used.insert(pred) {
                return Err(DomainError::BrokenChain {
                    call_id: call.id,
                    reason: format!("predecessor {pred:?} has two successors"),
                });
            }
            if self.anchor(call.id).is_none() {
                return Err(DomainError::BrokenChain {
                    call_id: call.id,
                    reason: "chain does not terminate at an agent".to_string(),
                });
            }
        }
        Ok(())
    }
}
