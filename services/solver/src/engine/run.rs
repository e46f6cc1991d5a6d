//! Engine run adapter.

use std::any::Any;
use std::sync::Arc;

use callcenter_domain::{CallCenter, ProblemChange};
use callcenter_id::ProblemId;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

use super::{EngineError, OptimizationEngine, SolverEvent, SolverSession};

/// A running engine.
pub struct SolverRun {
    problem_id: ProblemId,
    injector: ChangeInjector,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<(), EngineError>>,
}

impl SolverRun {
    /// Starts solving `problem` on a new task.
    pub fn spawn(
        engine: Arc<dyn OptimizationEngine>,
        problem_id: ProblemId,
        problem: CallCenter,
    ) -> (Self, SolverEventStream) {
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let failures = events_tx.clone();
        let session = SolverSession::new(changes_rx, events_tx, shutdown_rx);

        let task = tokio::spawn(async move {
            info!(%problem_id, "Solver run started");

            // The engine runs in its own task so a panic surfaces as a join
            // error; dropping the set aborts it along with this task.
            let mut solve = JoinSet::new();
            solve.spawn(async move { engine.solve(problem, session).await });
            let result = match solve.join_next().await {
                Some(Ok(result)) => result,
                Some(Err(e)) if e.is_panic() => Err(EngineError::Internal(panic_message(e.into_panic()))),
                Some(Err(_)) | None => Err(EngineError::Terminated),
            };
            match &result {
                Ok(()) => info!(%problem_id, "Solver run finished"),
                Err(e) => {
                    error!(%problem_id, error = %e, "Solver run failed");
                    let _ = failures.send(SolverEvent::Failed(e.clone()));
                }
            }
            result
        });

        let run = Self {
            problem_id,
            injector: ChangeInjector { tx: changes_tx },
            shutdown: shutdown_tx,
            task,
        };
        (run, SolverEventStream { rx: events_rx })
    }

    pub fn problem_id(&self) -> ProblemId {
        self.problem_id
    }

    /// A cloneable handle for feeding changes into this run.
    pub fn injector(&self) -> ChangeInjector {
        self.injector.clone()
    }

    /// Queues a change without blocking.
    pub fn inject(&self, change: ProblemChange) -> Result<(), EngineError> {
        self.injector.inject(change)
    }

    pub fn inject_all(
        &self,
        changes: impl IntoIterator<Item = ProblemChange>,
    ) -> Result<(), EngineError> {
        self.injector.inject_all(changes)
    }

    /// Asks the engine to stop; [`SolverRun::join`] waits for it.
    pub fn terminate(&self) {
        debug!(problem_id = %self.problem_id, "Terminating solver run");
        self.shutdown.send_replace(true);
    }

    /// Waits for the engine task and returns its terminal result.
    pub async fn join(self) -> Result<(), EngineError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(EngineError::Terminated),
            Err(e) => Err(EngineError::Internal(format!("solver task panicked: {e}"))),
        }
    }

    /// Kills the engine task without waiting for it.
    pub fn abort(&self) {
        self.task.abort();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("engine panicked: {detail}")
}

/// Feeds problem changes into a run.
#[derive(Clone)]
pub struct ChangeInjector {
    tx: mpsc::UnboundedSender<ProblemChange>,
}

impl ChangeInjector {
    pub fn inject(&self, change: ProblemChange) -> Result<(), EngineError> {
        self.tx.send(change).map_err(|_| EngineError::Terminated)
    }

    /// Queues changes in order, stopping at the first failure.
    pub fn inject_all(
        &self,
        changes: impl IntoIterator<Item = ProblemChange>,
    ) -> Result<(), EngineError> {
        changes.into_iter().try_for_each(|change| self.inject(change))
    }
}

/// Events emitted by a run, ending when the engine task exits.
pub struct SolverEventStream {
    rx: mpsc::UnboundedReceiver<SolverEvent>,
}

impl SolverEventStream {
    pub async fn next(&mut self) -> Option<SolverEvent> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use callcenter_domain::DomainError;
    use callcenter_id::CallId;

    /// Echoes the number of applied changes back as solutions until stopped.
    struct EchoEngine;

    #[async_trait]
    impl OptimizationEngine for EchoEngine {
        async fn solve(
            &self,
            mut problem: CallCenter,
            mut session: SolverSession,
        ) -> Result<(), EngineError> {
            loop {
                tokio::select! {
                    _ = session.terminated() => return Ok(()),
                    _ = tokio::time::sleep(std::time::Duration::from_millis(5)) => {
                        let changes = session.drain_changes();
                        if changes.is_empty() {
                            continue;
                        }
                        for change in changes {
                            change.apply(&mut problem)?;
                        }
                        session.publish_best(problem.clone());
                    }
                }
            }
        }
    }

    struct FailingEngine;

    #[async_trait]
    impl OptimizationEngine for FailingEngine {
        async fn solve(&self, _: CallCenter, _: SolverSession) -> Result<(), EngineError> {
            Err(DomainError::UnknownCall(CallId::new(9)).into())
        }
    }

    struct PanickingEngine;

    #[async_trait]
    impl OptimizationEngine for PanickingEngine {
        async fn solve(&self, _: CallCenter, mut session: SolverSession) -> Result<(), EngineError> {
            while session.drain_changes().is_empty() {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
            panic!("overflow when adding durations");
        }
    }

    #[tokio::test]
    async fn test_terminate_and_join() {
        let (run, mut events) = SolverRun::spawn(Arc::new(EchoEngine), ProblemId::new(1), CallCenter::default());
        run.terminate();
        run.join().await.unwrap();
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_failure_is_reported_as_event_and_result() {
        let (run, mut events) =
            SolverRun::spawn(Arc::new(FailingEngine), ProblemId::new(1), CallCenter::default());

        match events.next().await {
            Some(SolverEvent::Failed(e)) => assert_eq!(e.kind(), "unknown_call"),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(run.join().await, Err(EngineError::Domain(_))));
    }

    #[tokio::test]
    async fn test_inject_after_end_fails() {
        let (run, _events) =
            SolverRun::spawn(Arc::new(FailingEngine), ProblemId::new(1), CallCenter::default());
        let injector = run.injector();
        let _ = run.join().await;

        let pin = ProblemChange::PinCall {
            call_id: CallId::new(1),
            agent_id: callcenter_id::AgentId::new(1),
            pick_up_time: chrono::Utc::now(),
        };
        assert!(matches!(injector.inject(pin), Err(EngineError::Terminated)));
    }

    #[tokio::test]
    async fn test_abort_reports_terminated() {
        let (run, _events) = SolverRun::spawn(Arc::new(EchoEngine), ProblemId::new(1), CallCenter::default());
        run.abort();
        assert!(matches!(run.join().await, Err(EngineError::Terminated)));
    }

    #[tokio::test]
    async fn test_panic_is_reported_as_failure() {
        let (run, mut events) =
            SolverRun::spawn(Arc::new(PanickingEngine), ProblemId::new(1), CallCenter::default());
        run.inject(ProblemChange::PinCall {
            call_id: CallId::new(1),
            agent_id: callcenter_id::AgentId::new(1),
            pick_up_time: chrono::Utc::now(),
        })
        .unwrap();

        match events.next().await {
            Some(SolverEvent::Failed(EngineError::Internal(message))) => {
                assert!(message.contains("overflow when adding durations"), "{message}");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(events.next().await.is_none());
        assert!(matches!(run.join().await, Err(EngineError::Internal(_))));
    }
}
