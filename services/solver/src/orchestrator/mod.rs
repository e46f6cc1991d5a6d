//! Solver lifecycle orchestration.
//!
//! The orchestrator owns at most one engine run per process and keeps the
//! durable state consistent with it:
//!
//! 1. **Start**: claim the problem's ownership flag with a compare-and-set,
//!    load the last checkpoint, start the engine and replay every logged
//!    change newer than the checkpoint's watermark
//! 2. **Fact changes**: append to the change log first, then forward to the
//!    engine if this process is solving the problem
//! 3. **Best solutions**: pin the calls agents have started handling,
//!    checkpoint (throttled) while pruning reflected changes, then notify
//! 4. **Stop**: terminate the run, flush the last solution, release ownership
//!
//! A process that dies keeps its ownership flag set; [`SolverOrchestrator::recover`]
//! on the next boot re-claims the problem and resumes from the checkpoint.

mod checkpoint;
mod error;
mod status;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use callcenter_domain::{pin_chain_heads, CallCenter, FactChange, PersistedChange, ProblemChange};
use callcenter_events::SolverNotification;
use callcenter_id::{CallId, ProblemId};
use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::engine::{ChangeInjector, EngineError, OptimizationEngine, SolverEvent, SolverEventStream, SolverRun};
use crate::messaging::NotificationPublisher;
use crate::store::SolverStore;

pub use checkpoint::{CheckpointOutcome, ThrottledCheckpointer};
pub use error::OrchestratorError;
pub use status::{SolverPhase, SolverStatus, StartOutcome};

/// Sentinel for "no problem" in the lock-free current problem slot.
const NOT_SOLVING: i64 = i64::MIN;

/// Delay before retrying a checkpoint that failed to persist.
const STORE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Identifies this process in logs.
    pub process_id: String,
    /// Minimum spacing between checkpoints.
    pub checkpoint_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            process_id: uuid::Uuid::new_v4().to_string(),
            checkpoint_interval: Duration::from_millis(500),
        }
    }
}

/// An engine run and the task draining its events.
struct ActiveSolve {
    run: SolverRun,
    drain: JoinHandle<()>,
}

impl ActiveSolve {
    fn problem_id(&self) -> ProblemId {
        self.run.problem_id()
    }

    /// Stops the engine, then waits for the drain task to flush its last checkpoint.
    async fn wind_down(self) -> Result<(), EngineError> {
        let problem_id = self.problem_id();
        self.run.terminate();
        let result = self.run.join().await;
        if let Err(e) = self.drain.await {
            error!(%problem_id, error = %e, "Solution drain task failed");
        }
        result
    }

    fn kill(self) {
        self.run.abort();
        self.drain.abort();
    }
}

struct Inner {
    config: OrchestratorConfig,
    store: Arc<dyn SolverStore>,
    engine: Arc<dyn OptimizationEngine>,
    publisher: Arc<dyn NotificationPublisher>,
    /// Problem being solved, or [`NOT_SOLVING`]. Readable without the lifecycle lock.
    current_problem: AtomicI64,
    /// Serializes start, stop and change submission.
    lifecycle: Mutex<Option<ActiveSolve>>,
    status: watch::Sender<SolverStatus>,
}

/// Coordinates one engine run per process with the shared store.
#[derive(Clone)]
pub struct SolverOrchestrator {
    inner: Arc<Inner>,
}

impl SolverOrchestrator {
    pub fn new(
        store: Arc<dyn SolverStore>,
        engine: Arc<dyn OptimizationEngine>,
        publisher: Arc<dyn NotificationPublisher>,
        config: OrchestratorConfig,
    ) -> Self {
        let (status, _) = watch::channel(SolverStatus::IDLE);
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                engine,
                publisher,
                current_problem: AtomicI64::new(NOT_SOLVING),
                lifecycle: Mutex::new(None),
                status,
            }),
        }
    }

    pub fn process_id(&self) -> &str {
        &self.inner.config.process_id
    }

    pub fn status(&self) -> SolverStatus {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SolverStatus> {
        self.inner.status.subscribe()
    }

    /// The problem this process is solving, if any.
    pub fn current_problem(&self) -> Option<ProblemId> {
        self.inner.current_problem()
    }

    pub fn is_solving_problem(&self, problem_id: ProblemId) -> bool {
        self.current_problem() == Some(problem_id)
    }

    /// Claims `problem_id` and starts solving it.
    ///
    /// Returns without side effects if this process is already solving or
    /// another process owns the problem.
    pub async fn start_solving(&self, problem_id: ProblemId) -> Result<StartOutcome, OrchestratorError> {
        self.start_with_claim(problem_id, false).await
    }

    /// Resumes the first problem whose ownership flag was left set, typically
    /// by a process that crashed while solving it.
    pub async fn recover(&self) -> Result<Option<ProblemId>, OrchestratorError> {
        let Some(problem_id) = self.inner.store.find_first_active_problem_id()? else {
            info!(process_id = %self.process_id(), "No active problem to recover");
            return Ok(None);
        };

        info!(process_id = %self.process_id(), %problem_id, "Recovering active problem");
        match self.start_with_claim(problem_id, true).await? {
            StartOutcome::Started { .. } | StartOutcome::AlreadySolving => Ok(Some(problem_id)),
            outcome => {
                warn!(%problem_id, ?outcome, "Active problem was not recovered");
                Ok(None)
            }
        }
    }

    async fn start_with_claim(
        &self,
        problem_id: ProblemId,
        recovering: bool,
    ) -> Result<StartOutcome, OrchestratorError> {
        let inner = &self.inner;
        let mut lifecycle = inner.lifecycle.lock().await;

        if let Some(current) = inner.current_problem() {
            if current == problem_id {
                debug!(%problem_id, "Already solving");
                return Ok(StartOutcome::AlreadySolving);
            }
            info!(%problem_id, %current, "Solving another problem, ignoring start");
            return Ok(StartOutcome::Busy { current });
        }

        // A run that failed on its own still holds this process's claim
        let reclaim = match lifecycle.take() {
            Some(failed) => {
                let failed_problem = failed.problem_id();
                if let Err(e) = failed.wind_down().await {
                    debug!(problem_id = %failed_problem, error = %e, "Reaped failed solver run");
                }
                failed_problem == problem_id
            }
            None => false,
        };

        let Some(problem) = inner.store.load(problem_id)? else {
            return Err(OrchestratorError::NotFound(problem_id));
        };

        inner.set_status(Some(problem_id), SolverPhase::Claiming);
        let expected = recovering || reclaim;
        let claimed = match inner.store.compare_and_set_active(problem_id, expected, true) {
            Ok(claimed) => claimed,
            Err(e) => {
                inner.set_status(None, SolverPhase::Idle);
                return Err(e.into());
            }
        };
        if !claimed {
            info!(
                process_id = %self.process_id(),
                %problem_id,
                "Problem is owned by another process"
            );
            inner.set_status(None, SolverPhase::Idle);
            return Ok(StartOutcome::OwnedElsewhere);
        }

        let pending = match inner.store.find_by_problem_since(problem_id, problem.last_change_id) {
            Ok(pending) => pending,
            Err(e) => {
                if !expected {
                    if let Err(release) = inner.store.compare_and_set_active(problem_id, true, false) {
                        error!(%problem_id, error = %release, "Failed to release ownership");
                    }
                }
                inner.set_status(None, SolverPhase::Idle);
                return Err(e.into());
            }
        };

        inner
            .current_problem
            .store(problem_id.get(), Ordering::Release);

        let (run, events) = SolverRun::spawn(inner.engine.clone(), problem_id, problem);
        let drain = tokio::spawn(drain_events(inner.clone(), problem_id, run.injector(), events));

        let replayed = pending.len();
        if let Err(e) = run.inject_all(pending.into_iter().map(ProblemChange::from)) {
            warn!(%problem_id, error = %e, "Solver run ended during replay");
        }

        *lifecycle = Some(ActiveSolve { run, drain });
        inner.set_status(Some(problem_id), SolverPhase::Solving);

        info!(
            process_id = %self.process_id(),
            %problem_id,
            replayed,
            "Solving started"
        );
        Ok(StartOutcome::Started { replayed })
    }

    /// Stops solving `problem_id` and releases its ownership flag.
    ///
    /// Returns `Ok(false)` if this process was not solving it. Any error the
    /// engine run raised is returned after cleanup.
    pub async fn stop_solving(&self, problem_id: ProblemId) -> Result<bool, OrchestratorError> {
        let inner = &self.inner;
        let mut lifecycle = inner.lifecycle.lock().await;

        let was_solving = inner
            .current_problem
            .compare_exchange(problem_id.get(), NOT_SOLVING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        let holds_run = lifecycle
            .as_ref()
            .is_some_and(|active| active.problem_id() == problem_id);
        if !was_solving && !holds_run {
            debug!(%problem_id, "Not solving, ignoring stop");
            return Ok(false);
        }

        inner.set_status(Some(problem_id), SolverPhase::Stopping);
        let result = match lifecycle.take() {
            Some(active) => active.wind_down().await,
            None => Ok(()),
        };

        let released = inner.store.compare_and_set_active(problem_id, true, false);
        inner.set_status(None, SolverPhase::Idle);
        info!(process_id = %self.process_id(), %problem_id, "Solving stopped");

        match (result, released) {
            (Ok(()), Ok(true)) => Ok(true),
            (Ok(()), Ok(false)) => {
                warn!(%problem_id, "Ownership flag was already cleared");
                Ok(true)
            }
            (Ok(()), Err(e)) => Err(e.into()),
            (Err(engine), released) => {
                if let Err(e) = released {
                    error!(%problem_id, error = %e, "Failed to release ownership");
                }
                Err(engine.into())
            }
        }
    }

    /// Logs a fact change and forwards it to the engine if this process is solving the problem.
    pub async fn submit_fact_change(
        &self,
        problem_id: ProblemId,
        change: FactChange,
    ) -> Result<PersistedChange, OrchestratorError> {
        let lifecycle = self.inner.lifecycle.lock().await;

        let persisted = self.inner.store.append(problem_id, &change)?;
        debug!(
            %problem_id,
            change_id = %persisted.change_id,
            kind = change.kind(),
            call_id = %change.call_id(),
            "Fact change logged"
        );

        if self.is_solving_problem(problem_id) {
            if let Some(active) = lifecycle.as_ref().filter(|a| a.problem_id() == problem_id) {
                if let Err(e) = active.run.inject(persisted.clone().into()) {
                    // The change stays in the log and is replayed on the next start
                    warn!(%problem_id, change_id = %persisted.change_id, error = %e, "Change not delivered to solver");
                }
            }
        }

        Ok(persisted)
    }

    /// Winds down the active run for process exit, flushing its last
    /// solution but keeping the ownership flag so the next boot resumes it.
    pub async fn shutdown(&self) -> Option<ProblemId> {
        let inner = &self.inner;
        let mut lifecycle = inner.lifecycle.lock().await;
        inner.current_problem.store(NOT_SOLVING, Ordering::Release);

        let active = lifecycle.take()?;
        let problem_id = active.problem_id();
        inner.set_status(Some(problem_id), SolverPhase::Stopping);
        if let Err(e) = active.wind_down().await {
            warn!(%problem_id, error = %e, "Solver run ended with error during shutdown");
        }
        inner.set_status(None, SolverPhase::Idle);
        info!(process_id = %self.process_id(), %problem_id, "Solver shut down, ownership kept for recovery");
        Some(problem_id)
    }

    /// Kills the active run without flushing or releasing anything, as a
    /// process crash would.
    pub async fn abort(&self) -> Option<ProblemId> {
        let inner = &self.inner;
        let mut lifecycle = inner.lifecycle.lock().await;
        inner.current_problem.store(NOT_SOLVING, Ordering::Release);

        let active = lifecycle.take()?;
        let problem_id = active.problem_id();
        active.kill();
        inner.set_status(None, SolverPhase::Idle);
        warn!(process_id = %self.process_id(), %problem_id, "Solver run aborted");
        Some(problem_id)
    }
}

impl Inner {
    fn current_problem(&self) -> Option<ProblemId> {
        match self.current_problem.load(Ordering::Acquire) {
            NOT_SOLVING => None,
            id => Some(ProblemId::new(id)),
        }
    }

    fn set_status(&self, problem_id: Option<ProblemId>, phase: SolverPhase) {
        self.status.send_replace(SolverStatus { problem_id, phase });
    }

    fn notify(&self, notification: SolverNotification) {
        if let Err(e) = self.publisher.publish(notification) {
            warn!(error = %e, "Failed to publish notification");
        }
    }

    /// Prepares a best solution for checkpointing, or rejects it.
    ///
    /// Calls at the head of a chain are pinned here and the matching pin
    /// changes are fed back to the engine.
    fn accept_best(
        &self,
        mut solution: CallCenter,
        all_changes_processed: bool,
        injector: &ChangeInjector,
        pinned: &mut BTreeSet<CallId>,
    ) -> Option<CallCenter> {
        if !all_changes_processed || !solution.is_initialized() {
            trace!("Skipping best solution with pending changes");
            return None;
        }

        // The engine may emit a solution computed before it applied an
        // earlier pin; persisting it would un-pin a call.
        pinned.retain(|call_id| solution.calls.contains_key(call_id));
        if pinned
            .iter()
            .any(|call_id| solution.calls.get(call_id).is_some_and(|c| !c.pinned))
        {
            trace!("Skipping best solution that predates a pin");
            return None;
        }

        let pins = pin_chain_heads(&mut solution, Utc::now());
        if !pins.is_empty() {
            for pin in &pins {
                if let ProblemChange::PinCall { call_id, agent_id, .. } = pin {
                    debug!(%call_id, %agent_id, "Pinning call picked up by agent");
                    pinned.insert(*call_id);
                }
            }
            if let Err(e) = injector.inject_all(pins) {
                warn!(error = %e, "Pin changes not delivered to solver");
            }
        }
        Some(solution)
    }

    /// Attempts a throttled checkpoint. Returns the solution to retry later, if any.
    fn checkpoint(
        &self,
        problem_id: ProblemId,
        checkpointer: &ThrottledCheckpointer,
        solution: CallCenter,
    ) -> Option<(CallCenter, Instant)> {
        match checkpointer.try_checkpoint(problem_id, &solution) {
            Ok(CheckpointOutcome::Saved { pruned }) => {
                self.after_checkpoint(problem_id, &solution, pruned);
                None
            }
            Ok(CheckpointOutcome::Throttled { retry_at }) => Some((solution, retry_at)),
            Ok(CheckpointOutcome::InFlight) => Some((solution, Instant::now() + self.config.checkpoint_interval)),
            Err(e) => {
                error!(%problem_id, error = %e, "Checkpoint failed");
                Some((solution, Instant::now() + STORE_RETRY_DELAY))
            }
        }
    }

    fn flush(&self, problem_id: ProblemId, checkpointer: &ThrottledCheckpointer, solution: CallCenter) {
        match checkpointer.checkpoint_now(problem_id, &solution) {
            Ok(pruned) => self.after_checkpoint(problem_id, &solution, pruned),
            Err(e) => error!(%problem_id, error = %e, "Final checkpoint failed"),
        }
    }

    fn after_checkpoint(&self, problem_id: ProblemId, solution: &CallCenter, pruned: usize) {
        debug!(
            %problem_id,
            score = ?solution.score,
            last_change_id = ?solution.last_change_id,
            pruned,
            "Best solution checkpointed"
        );
        self.notify(SolverNotification::BestSolutionChanged { problem_id });
    }

    fn on_solver_error(&self, problem_id: ProblemId, error: &EngineError) {
        error!(%problem_id, kind = error.kind(), error = %error, "Solving failed");

        // Stop may have already taken the run over
        if self
            .current_problem
            .compare_exchange(problem_id.get(), NOT_SOLVING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.set_status(Some(problem_id), SolverPhase::Failed);
        }

        self.notify(SolverNotification::Error {
            problem_id,
            exception_class_name: error.kind().to_string(),
            exception_message: error.to_string(),
        });
    }
}

/// Consumes engine events until the run ends, checkpointing best solutions.
async fn drain_events(
    inner: Arc<Inner>,
    problem_id: ProblemId,
    injector: ChangeInjector,
    mut events: SolverEventStream,
) {
    let checkpointer = ThrottledCheckpointer::new(inner.store.clone(), inner.config.checkpoint_interval);
    let mut pinned = BTreeSet::new();
    let mut deferred: Option<(CallCenter, Instant)> = None;

    loop {
        let retry_at = deferred.as_ref().map(|(_, at)| *at);

        tokio::select! {
            event = events.next() => match event {
                Some(SolverEvent::BestSolution { solution, all_changes_processed }) => {
                    if let Some(solution) = inner.accept_best(solution, all_changes_processed, &injector, &mut pinned) {
                        deferred = inner.checkpoint(problem_id, &checkpointer, solution);
                    }
                }
                Some(SolverEvent::Failed(error)) => inner.on_solver_error(problem_id, &error),
                None => break,
            },
            _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                if let Some((solution, _)) = deferred.take() {
                    deferred = inner.checkpoint(problem_id, &checkpointer, solution);
                }
            }
        }
    }

    if let Some((solution, _)) = deferred.take() {
        inner.flush(problem_id, &checkpointer, solution);
    }
    debug!(%problem_id, "Solution drain finished");
}
