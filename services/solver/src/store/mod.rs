//! Durable solver state.
//!
//! Two contracts share one database:
//! - [`ProblemStateStore`]: the checkpointed best solution per problem, plus
//!   the `active` ownership flag used for cross-process mutual exclusion
//! - [`ChangeLogStore`]: the append-only log of fact changes not yet reflected
//!   in a checkpoint
//!
//! [`SolverStore::checkpoint`] writes a solution and prunes the log in one
//! transaction, so a crash can never drop a change that the persisted
//! solution does not reflect.

mod error;
mod sqlite;

use callcenter_domain::{CallCenter, FactChange, PersistedChange};
use callcenter_id::{ChangeId, ProblemId};

pub use error::StoreError;
pub use sqlite::SqliteStore;

/// Checkpointed solutions and the ownership flag.
pub trait ProblemStateStore: Send + Sync {
    /// Loads the latest checkpoint.
    fn load(&self, problem_id: ProblemId) -> Result<Option<CallCenter>, StoreError>;

    /// Inserts or replaces the checkpoint, leaving the ownership flag untouched.
    fn save(&self, problem_id: ProblemId, solution: &CallCenter) -> Result<(), StoreError>;

    /// Atomically sets `active` to `new_value` if it currently equals `expected`.
    ///
    /// Returns false if the flag did not match or the problem does not exist.
    fn compare_and_set_active(
        &self,
        problem_id: ProblemId,
        expected: bool,
        new_value: bool,
    ) -> Result<bool, StoreError>;

    /// First problem (lowest id) whose ownership flag is set.
    fn find_first_active_problem_id(&self) -> Result<Option<ProblemId>, StoreError>;

    fn is_active(&self, problem_id: ProblemId) -> Result<bool, StoreError>;
}

/// Append-only log of fact changes.
pub trait ChangeLogStore: Send + Sync {
    /// Appends a change, assigning the next change id.
    fn append(&self, problem_id: ProblemId, change: &FactChange) -> Result<PersistedChange, StoreError>;

    /// Changes for the problem with an id greater than `after` (all when `None`), in log order.
    fn find_by_problem_since(
        &self,
        problem_id: ProblemId,
        after: Option<ChangeId>,
    ) -> Result<Vec<PersistedChange>, StoreError>;

    /// Deletes the problem's changes with an id up to and including `up_to`.
    fn delete_up_to(&self, problem_id: ProblemId, up_to: ChangeId) -> Result<usize, StoreError>;
}

/// Both contracts plus the atomic checkpoint unit of work.
pub trait SolverStore: ProblemStateStore + ChangeLogStore {
    /// Saves the solution and deletes every change it reflects, atomically.
    ///
    /// Returns the number of pruned change log entries.
    fn checkpoint(&self, problem_id: ProblemId, solution: &CallCenter) -> Result<usize, StoreError>;
}
