//! Built-in engine: greedy construction followed by steepest-descent moves.
//!
//! Each tick the engine applies queued changes, assigns unassigned calls to
//! the agent that fits them best, then tries relocating unpinned calls to the
//! front or back of every agent's queue and keeps the best improving move.
//! Pinned calls are never moved.

use std::time::Duration;

use async_trait::async_trait;
use callcenter_domain::{CallCenter, HardSoftScore, Predecessor, ProblemChange};
use callcenter_id::{AgentId, CallId};
use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use super::{EngineError, OptimizationEngine, SolverSession};

/// Greedy engine settings.
#[derive(Debug, Clone)]
pub struct GreedyEngineConfig {
    /// Pause between optimization steps.
    pub tick: Duration,
    /// Upper bound on candidate moves evaluated per step.
    pub moves_per_tick: usize,
}

impl Default for GreedyEngineConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(50),
            moves_per_tick: 256,
        }
    }
}

/// Greedy optimization engine.
#[derive(Clone)]
pub struct GreedyEngine {
    config: GreedyEngineConfig,
}

impl GreedyEngine {
    pub fn new(config: GreedyEngineConfig) -> Self {
        Self { config }
    }

    /// Assigns every unassigned call to the agent with the fewest missing
    /// skills, breaking ties by the shortest queue.
    fn construct(&self, working: &mut CallCenter, now: DateTime<Utc>) -> Result<(), EngineError> {
        for call_id in working.unassigned_calls() {
            let Some(agent_id) = best_agent(working, call_id, now) else {
                // No agents to assign to
                return Ok(());
            };
            working.append_to_chain(call_id, agent_id)?;
        }
        Ok(())
    }

    /// Applies the best improving relocation, if any. Expects `working` to be refreshed.
    ///
    /// Candidates are evaluated in place and undone, so the arena is never copied.
    fn improve(&self, working: &mut CallCenter, now: DateTime<Utc>) -> Result<bool, EngineError> {
        let mut best_score = working.score.unwrap_or_else(|| working.compute_score());
        let mut best: Option<(CallId, Predecessor)> = None;
        let mut evaluated = 0;

        let movable: Vec<(CallId, Predecessor)> = working
            .calls
            .values()
            .filter(|c| !c.pinned)
            .filter_map(|c| c.previous.map(|pred| (c.id, pred)))
            .collect();
        let agents: Vec<AgentId> = working.agents.keys().copied().collect();

        'search: for (call_id, original) in movable {
            for &agent_id in &agents {
                for to_front in [true, false] {
                    if evaluated >= self.config.moves_per_tick {
                        break 'search;
                    }

                    working.detach(call_id)?;
                    let target = if to_front {
                        working.pinned_tail(agent_id)
                    } else {
                        working.chain_tail(agent_id)
                    };
                    if target != original {
                        working.insert_after(call_id, target)?;
                        working.refresh(now);
                        evaluated += 1;

                        if let Some(score) = working.score.filter(|s| *s > best_score) {
                            best_score = score;
                            best = Some((call_id, target));
                        }
                        working.detach(call_id)?;
                    }
                    working.insert_after(call_id, original)?;
                }
            }
        }

        trace!(evaluated, "Evaluated relocation moves");
        let improved = match best {
            Some((call_id, target)) => {
                working.detach(call_id)?;
                working.insert_after(call_id, target)?;
                true
            }
            None => false,
        };
        working.refresh(now);
        Ok(improved)
    }

    /// One optimization step: applies changes, assigns new calls and makes
    /// the best relocation. Returns the new working solution and whether a
    /// move was made.
    fn step(
        &self,
        mut working: CallCenter,
        changes: &[ProblemChange],
    ) -> Result<(CallCenter, bool), EngineError> {
        for change in changes {
            let outcome = change.apply(&mut working)?;
            trace!(change_id = ?change.change_id(), ?outcome, "Applied problem change");
        }

        let now = Utc::now();
        self.construct(&mut working, now)?;
        working.refresh(now);
        let improved = self.improve(&mut working, now)?;
        Ok((working, improved))
    }
}

impl Default for GreedyEngine {
    fn default() -> Self {
        Self::new(GreedyEngineConfig::default())
    }
}

fn best_agent(working: &CallCenter, call_id: CallId, now: DateTime<Utc>) -> Option<AgentId> {
    let call = working.calls.get(&call_id)?;
    working
        .agents
        .values()
        .min_by_key(|agent| {
            let load: Duration = working
                .chain(agent.id)
                .iter()
                .filter_map(|id| working.calls.get(id))
                .map(|c| c.remaining_duration(now))
                .fold(Duration::ZERO, Duration::saturating_add);
            (call.missing_skills(agent), load)
        })
        .map(|agent| agent.id)
}

#[async_trait]
impl OptimizationEngine for GreedyEngine {
    async fn solve(
        &self,
        mut working: CallCenter,
        mut session: SolverSession,
    ) -> Result<(), EngineError> {
        working.validate()?;

        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut best: Option<HardSoftScore> = None;

        loop {
            tokio::select! {
                biased;
                _ = session.terminated() => break,
                _ = ticker.tick() => {}
            }

            let changes = session.drain_changes();
            let applied = changes.len();

            // The search is CPU bound and runs on the blocking pool
            let step = tokio::task::spawn_blocking({
                let engine = self.clone();
                move || engine.step(working, &changes)
            });
            let (next, improved) = step
                .await
                .map_err(|e| EngineError::Internal(format!("optimization step failed: {e}")))??;
            working = next;

            if improved || applied > 0 || best.is_none() {
                best = working.score;
                debug!(score = ?best, changes = applied, "New best solution");
                if !session.publish_best(working.clone()) {
                    break;
                }
            }
        }

        Ok(())
    }
}
