//! Throttled best-solution checkpoints.
//!
//! Best solutions can arrive far faster than they are worth persisting. The
//! checkpointer lets at most one write run at a time and spaces completed
//! writes by a minimum interval; callers keep the latest rejected solution
//! and retry it once the returned `retry_at` passes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use callcenter_domain::CallCenter;
use callcenter_id::ProblemId;
use tokio::time::Instant;

use crate::store::{SolverStore, StoreError};

/// Result of a checkpoint attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointOutcome {
    /// The solution was persisted and `pruned` log entries removed.
    Saved { pruned: usize },
    /// The previous checkpoint completed too recently.
    Throttled { retry_at: Instant },
    /// Another checkpoint is being written.
    InFlight,
}

/// Single-flight, interval-limited checkpoint writer.
pub struct ThrottledCheckpointer {
    store: Arc<dyn SolverStore>,
    interval: Duration,
    in_flight: AtomicBool,
    last_completed: Mutex<Option<Instant>>,
}

impl ThrottledCheckpointer {
    pub fn new(store: Arc<dyn SolverStore>, interval: Duration) -> Self {
        Self {
            store,
            interval,
            in_flight: AtomicBool::new(false),
            last_completed: Mutex::new(None),
        }
    }

    /// Persists `solution` unless a write is running or the interval has not elapsed.
    pub fn try_checkpoint(
        &self,
        problem_id: ProblemId,
        solution: &CallCenter,
    ) -> Result<CheckpointOutcome, StoreError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(CheckpointOutcome::InFlight);
        }

        let outcome = self.checkpoint_claimed(problem_id, solution);
        self.in_flight.store(false, Ordering::Release);
        outcome
    }

    /// Persists `solution` regardless of the interval. Used for the final flush of a run.
    pub fn checkpoint_now(
        &self,
        problem_id: ProblemId,
        solution: &CallCenter,
    ) -> Result<usize, StoreError> {
        let pruned = self.store.checkpoint(problem_id, solution)?;
        *self.last_completed() = Some(Instant::now());
        Ok(pruned)
    }

    fn last_completed(&self) -> MutexGuard<'_, Option<Instant>> {
        self.last_completed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn checkpoint_claimed(
        &self,
        problem_id: ProblemId,
        solution: &CallCenter,
    ) -> Result<CheckpointOutcome, StoreError> {
        let mut last_completed = self.last_completed();

        if let Some(retry_at) = last_completed.map(|at| at + self.interval) {
            if Instant::now() < retry_at {
                return Ok(CheckpointOutcome::Throttled { retry_at });
            }
        }

        let pruned = self.store.checkpoint(problem_id, solution)?;
        *last_completed = Some(Instant::now());
        Ok(CheckpointOutcome::Saved { pruned })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ProblemStateStore, SqliteStore};
    use callcenter_id::ChangeId;

    const PROBLEM: ProblemId = ProblemId::new(1);

    fn stamped(change_id: i64) -> CallCenter {
        CallCenter {
            last_change_id: Some(ChangeId::new(change_id)),
            ..CallCenter::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttles_within_interval() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let checkpointer = ThrottledCheckpointer::new(store.clone(), Duration::from_secs(1));

        assert_eq!(
            checkpointer.try_checkpoint(PROBLEM, &stamped(1)).unwrap(),
            CheckpointOutcome::Saved { pruned: 0 }
        );

        let outcome = checkpointer.try_checkpoint(PROBLEM, &stamped(2)).unwrap();
        assert!(matches!(outcome, CheckpointOutcome::Throttled { .. }));
        assert_eq!(
            store.load(PROBLEM).unwrap().unwrap().last_change_id,
            Some(ChangeId::new(1))
        );

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(matches!(
            checkpointer.try_checkpoint(PROBLEM, &stamped(2)).unwrap(),
            CheckpointOutcome::Saved { .. }
        ));
        assert_eq!(
            store.load(PROBLEM).unwrap().unwrap().last_change_id,
            Some(ChangeId::new(2))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_never_throttles() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let checkpointer = ThrottledCheckpointer::new(store, Duration::ZERO);

        for id in 1..=3 {
            assert!(matches!(
                checkpointer.try_checkpoint(PROBLEM, &stamped(id)).unwrap(),
                CheckpointOutcome::Saved { .. }
            ));
        }
    }

    #[test]
    fn test_rejects_concurrent_write() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let checkpointer = ThrottledCheckpointer::new(store, Duration::ZERO);
        checkpointer.in_flight.store(true, Ordering::SeqCst);

        assert_eq!(
            checkpointer.try_checkpoint(PROBLEM, &stamped(1)).unwrap(),
            CheckpointOutcome::InFlight
        );
    }
}
