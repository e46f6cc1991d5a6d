//! Agents, calls and the chain predecessor reference.

use std::collections::BTreeSet;
use std::time::Duration;

use callcenter_id::{AgentId, CallId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Skill;

/// An agent answering calls. Anchors at most one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub skills: BTreeSet<Skill>,
}

impl Agent {
    pub fn new(id: AgentId, name: impl Into<String>, skills: impl IntoIterator<Item = Skill>) -> Self {
        Self {
            id,
            name: name.into(),
            skills: skills.into_iter().collect(),
        }
    }
}

/// Chain predecessor of a call: either the anchoring agent or the call ahead of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Predecessor {
    Agent(AgentId),
    Call(CallId),
}

impl Predecessor {
    /// Returns the agent id if this is a chain anchor.
    pub fn as_agent(&self) -> Option<AgentId> {
        match self {
            Predecessor::Agent(id) => Some(*id),
            Predecessor::Call(_) => None,
        }
    }
}

/// An incoming phone call waiting for, or being handled by, an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub id: CallId,
    pub phone_number: String,
    #[serde(default)]
    pub required_skills: BTreeSet<Skill>,
    #[serde(with = "crate::serde_secs")]
    pub duration: Duration,
    pub start_time: DateTime<Utc>,
    /// Set once an agent starts handling the call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pick_up_time: Option<DateTime<Utc>>,
    /// Pinned calls are never moved by the optimizer.
    #[serde(default)]
    pub pinned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<Predecessor>,
    /// Derived; recomputed after every chain change.
    #[serde(default, with = "crate::serde_secs::option", skip_serializing_if = "Option::is_none")]
    pub estimated_waiting: Option<Duration>,
}

impl Call {
    /// Creates an unassigned, unpinned call that started now.
    pub fn new(
        id: CallId,
        phone_number: impl Into<String>,
        required_skills: impl IntoIterator<Item = Skill>,
        duration: Duration,
    ) -> Self {
        Self {
            id,
            phone_number: phone_number.into(),
            required_skills: required_skills.into_iter().collect(),
            duration,
            start_time: Utc::now(),
            pick_up_time: None,
            pinned: false,
            previous: None,
            estimated_waiting: None,
        }
    }

    /// Time the call still occupies its agent, as of `now`.
    pub fn remaining_duration(&self, now: DateTime<Utc>) -> Duration {
        match self.pick_up_time {
            Some(picked_up) => {
                let elapsed = (now - picked_up).to_std().unwrap_or_default();
                self.duration.saturating_sub(elapsed)
            }
            None => self.duration,
        }
    }

    /// Number of required skills the given agent lacks.
    pub fn missing_skills(&self, agent: &Agent) -> usize {
        self.required_skills.difference(&agent.skills).count()
    }
}
