//! Inbound command dispatch.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use callcenter_events::{CommandEnvelope, SolverCommand};
use callcenter_id::ProblemId;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::GatewayError;
use crate::orchestrator::SolverOrchestrator;

/// Handled message ids remembered per problem.
const REDELIVERY_WINDOW: usize = 1024;

/// Parses and validates a command envelope from raw bus bytes.
pub fn decode_command(bytes: &[u8]) -> Result<CommandEnvelope, GatewayError> {
    Ok(CommandEnvelope::from_slice(bytes)?)
}

/// Bounded memory of recently handled message ids, oldest evicted first.
#[derive(Debug, Default)]
struct RecentMessages {
    by_problem: HashMap<ProblemId, ProblemWindow>,
}

#[derive(Debug, Default)]
struct ProblemWindow {
    ids: HashSet<Uuid>,
    order: VecDeque<Uuid>,
}

impl RecentMessages {
    fn contains(&self, problem_id: ProblemId, message_id: Uuid) -> bool {
        self.by_problem
            .get(&problem_id)
            .is_some_and(|window| window.ids.contains(&message_id))
    }

    fn remember(&mut self, problem_id: ProblemId, message_id: Uuid) {
        let window = self.by_problem.entry(problem_id).or_default();
        if !window.ids.insert(message_id) {
            return;
        }
        window.order.push_back(message_id);
        if window.order.len() > REDELIVERY_WINDOW {
            if let Some(oldest) = window.order.pop_front() {
                window.ids.remove(&oldest);
            }
        }
    }
}

/// Routes bus commands to the orchestrator.
///
/// The bus delivers at least once, so a command whose message id was already
/// handled for its problem is acknowledged without effect.
#[derive(Clone)]
pub struct MessageGateway {
    orchestrator: SolverOrchestrator,
    recent: Arc<Mutex<RecentMessages>>,
}

impl MessageGateway {
    pub fn new(orchestrator: SolverOrchestrator) -> Self {
        Self {
            orchestrator,
            recent: Arc::new(Mutex::new(RecentMessages::default())),
        }
    }

    fn is_redelivery(&self, problem_id: ProblemId, message_id: Uuid) -> bool {
        self.recent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(problem_id, message_id)
    }

    fn mark_handled(&self, problem_id: ProblemId, message_id: Uuid) {
        self.recent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remember(problem_id, message_id);
    }

    /// Handles one command.
    ///
    /// A command is only remembered once it succeeded, so a redelivery after
    /// a failure is retried.
    pub async fn handle(&self, envelope: CommandEnvelope) -> Result<(), GatewayError> {
        envelope.validate()?;

        let problem_id = envelope.problem_id;
        let message_id = envelope.message_id;
        if self.is_redelivery(problem_id, message_id) {
            debug!(%message_id, %problem_id, "Skipping redelivered command");
            return Ok(());
        }

        debug!(
            message_id = %envelope.message_id,
            message_type = %envelope.message_type,
            %problem_id,
            correlation_id = ?envelope.correlation_id,
            "Handling command"
        );

        match envelope.payload {
            SolverCommand::StartSolver => {
                let outcome = self.orchestrator.start_solving(problem_id).await?;
                info!(%problem_id, ?outcome, "Start command handled");
            }
            SolverCommand::StopSolver => {
                let stopped = self.orchestrator.stop_solving(problem_id).await?;
                info!(%problem_id, stopped, "Stop command handled");
            }
            command => {
                if let Some(change) = command.into_fact_change() {
                    self.orchestrator.submit_fact_change(problem_id, change).await?;
                }
            }
        }

        self.mark_handled(problem_id, message_id);
        Ok(())
    }

    /// Processes commands in arrival order until the inbound channel closes or shutdown is signaled.
    pub async fn run(
        &self,
        mut inbound: mpsc::Receiver<CommandEnvelope>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Message gateway started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Message gateway shutting down");
                        break;
                    }
                }
                envelope = inbound.recv() => {
                    let Some(envelope) = envelope else {
                        info!("Inbound channel closed");
                        break;
                    };
                    let message_id = envelope.message_id;
                    match self.handle(envelope).await {
                        Ok(()) => {}
                        Err(GatewayError::Decode(e)) => {
                            warn!(%message_id, error = %e, "Rejected invalid command");
                        }
                        Err(e) => {
                            error!(%message_id, error = %e, "Command failed");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callcenter_events::{message_types, MessageEnvelope};
    use callcenter_id::{CallId, ProblemId};

    #[test]
    fn test_decode_command() {
        let json = serde_json::json!({
            "message_id": "7c9e6679-7425-40de-944b-e07fc1f90ae7",
            "occurred_at": "2026-01-01T00:00:00Z",
            "message_type": message_types::REMOVE_CALL,
            "message_version": 1,
            "problem_id": 1,
            "payload": {"type": "remove_call", "call_id": 4}
        });
        let envelope = decode_command(json.to_string().as_bytes()).unwrap();
        assert_eq!(envelope.problem_id, ProblemId::new(1));
        assert_eq!(
            envelope.payload,
            SolverCommand::RemoveCall {
                call_id: CallId::new(4)
            }
        );
    }

    #[test]
    fn test_decode_rejects_mismatched_type() {
        let mut envelope = MessageEnvelope::new(ProblemId::new(1), SolverCommand::StartSolver);
        envelope.message_type = message_types::STOP_SOLVER.to_string();
        let bytes = envelope.to_json().unwrap();
        assert!(matches!(
            decode_command(bytes.as_bytes()),
            Err(GatewayError::Decode(_))
        ));
    }

    #[test]
    fn test_recent_messages_evicts_oldest() {
        let mut recent = RecentMessages::default();
        let p1 = ProblemId::new(1);
        let ids: Vec<Uuid> = (0..=REDELIVERY_WINDOW).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            recent.remember(p1, *id);
        }

        assert!(!recent.contains(p1, ids[0]));
        assert!(recent.contains(p1, ids[1]));
        assert!(recent.contains(p1, ids[REDELIVERY_WINDOW]));
        assert!(!recent.contains(ProblemId::new(2), ids[1]));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_command(b"not json"),
            Err(GatewayError::Decode(_))
        ));
    }
}
