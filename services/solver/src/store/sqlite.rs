//! SQLite-backed solver store.
//!
//! Every process participating in solving opens the same database file, so
//! the ownership compare-and-set and the change id sequence are shared.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use callcenter_domain::{CallCenter, FactChange, PersistedChange};
use callcenter_id::{ChangeId, ProblemId};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::{ChangeLogStore, ProblemStateStore, SolverStore, StoreError};

/// How long a writer waits on a lock held by another process.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite solver store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        // Enable WAL mode so readers in other processes don't block checkpoints
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;

        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<(), StoreError> {
        // AUTOINCREMENT keeps change ids monotonic even after the log is pruned.
        self.conn()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS problems (
                problem_id INTEGER PRIMARY KEY,
                solution_json TEXT NOT NULL,
                last_change_id INTEGER,
                active INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_problems_active ON problems(active);

            CREATE TABLE IF NOT EXISTS change_log (
                change_id INTEGER PRIMARY KEY AUTOINCREMENT,
                problem_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                change_json TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_change_log_problem ON change_log(problem_id, change_id);
            "#,
        )?;

        debug!("Solver store schema initialized");
        Ok(())
    }
}

fn upsert_problem(
    conn: &Connection,
    problem_id: ProblemId,
    solution: &CallCenter,
) -> Result<(), StoreError> {
    let solution_json = serde_json::to_string(solution)?;
    conn.execute(
        r#"
        INSERT INTO problems (problem_id, solution_json, last_change_id, active, updated_at)
        VALUES (?1, ?2, ?3, 0, ?4)
        ON CONFLICT(problem_id) DO UPDATE SET
            solution_json = excluded.solution_json,
            last_change_id = excluded.last_change_id,
            updated_at = excluded.updated_at
        "#,
        params![
            problem_id.get(),
            solution_json,
            solution.last_change_id.map(ChangeId::get),
            Utc::now().timestamp(),
        ],
    )?;
    Ok(())
}

fn delete_changes_up_to(
    conn: &Connection,
    problem_id: ProblemId,
    up_to: ChangeId,
) -> Result<usize, StoreError> {
    let deleted = conn.execute(
        "DELETE FROM change_log WHERE problem_id = ?1 AND change_id <= ?2",
        params![problem_id.get(), up_to.get()],
    )?;
    Ok(deleted)
}

impl ProblemStateStore for SqliteStore {
    fn load(&self, problem_id: ProblemId) -> Result<Option<CallCenter>, StoreError> {
        let json: Option<String> = self
            .conn()?
            .query_row(
                "SELECT solution_json FROM problems WHERE problem_id = ?1",
                params![problem_id.get()],
                |row| row.get(0),
            )
            .optional()?;

        json.map(|json| serde_json::from_str(&json).map_err(StoreError::from))
            .transpose()
    }

    fn save(&self, problem_id: ProblemId, solution: &CallCenter) -> Result<(), StoreError> {
        let conn = self.conn()?;
        upsert_problem(&conn, problem_id, solution)
    }

    fn compare_and_set_active(
        &self,
        problem_id: ProblemId,
        expected: bool,
        new_value: bool,
    ) -> Result<bool, StoreError> {
        let updated = self.conn()?.execute(
            "UPDATE problems SET active = ?1, updated_at = ?2 WHERE problem_id = ?3 AND active = ?4",
            params![new_value, Utc::now().timestamp(), problem_id.get(), expected],
        )?;
        Ok(updated == 1)
    }

    fn find_first_active_problem_id(&self) -> Result<Option<ProblemId>, StoreError> {
        let id: Option<i64> = self
            .conn()?
            .query_row(
                "SELECT problem_id FROM problems WHERE active = 1 ORDER BY problem_id LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id.map(ProblemId::new))
    }

    fn is_active(&self, problem_id: ProblemId) -> Result<bool, StoreError> {
        let active: Option<bool> = self
            .conn()?
            .query_row(
                "SELECT active FROM problems WHERE problem_id = ?1",
                params![problem_id.get()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(active.unwrap_or(false))
    }
}

impl ChangeLogStore for SqliteStore {
    fn append(&self, problem_id: ProblemId, change: &FactChange) -> Result<PersistedChange, StoreError> {
        let change_json = serde_json::to_string(change)?;
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO change_log (problem_id, kind, change_json, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                problem_id.get(),
                change.kind(),
                change_json,
                Utc::now().timestamp()
            ],
        )?;

        Ok(PersistedChange {
            change_id: ChangeId::new(conn.last_insert_rowid()),
            problem_id,
            change: change.clone(),
        })
    }

    fn find_by_problem_since(
        &self,
        problem_id: ProblemId,
        after: Option<ChangeId>,
    ) -> Result<Vec<PersistedChange>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT change_id, change_json FROM change_log
            WHERE problem_id = ?1 AND change_id > ?2
            ORDER BY change_id
            "#,
        )?;

        let rows = stmt.query_map(
            params![problem_id.get(), after.map_or(i64::MIN, ChangeId::get)],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
        )?;

        let mut changes = Vec::new();
        for row in rows {
            let (change_id, change_json) = row?;
            changes.push(PersistedChange {
                change_id: ChangeId::new(change_id),
                problem_id,
                change: serde_json::from_str(&change_json)?,
            });
        }
        Ok(changes)
    }

    fn delete_up_to(&self, problem_id: ProblemId, up_to: ChangeId) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        delete_changes_up_to(&conn, problem_id, up_to)
    }
}

impl SolverStore for SqliteStore {
    fn checkpoint(&self, problem_id: ProblemId, solution: &CallCenter) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        upsert_problem(&tx, problem_id, solution)?;
        let pruned = match solution.last_change_id {
            Some(up_to) => delete_changes_up_to(&tx, problem_id, up_to)?,
            None => 0,
        };

        tx.commit()?;
        debug!(%problem_id, pruned, "Checkpoint committed");
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callcenter_domain::{Agent, Call, Skill};
    use callcenter_id::{AgentId, CallId};
    use proptest::prelude::*;

    const PROBLEM: ProblemId = ProblemId::new(1);

    fn problem() -> CallCenter {
        CallCenter::new(
            [Agent::new(AgentId::new(1), "Ann", [Skill::English])],
            [],
        )
    }

    fn add(id: i64) -> FactChange {
        FactChange::AddCall {
            call: Call::new(CallId::new(id), "555-0100", [Skill::English], Duration::from_secs(30)),
        }
    }

    #[test]
    fn test_load_missing_problem() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.load(PROBLEM).unwrap().is_none());
        assert!(!store.is_active(PROBLEM).unwrap());
    }

    #[test]
    fn test_save_and_load() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut cc = problem();
        cc.last_change_id = Some(ChangeId::new(7));
        store.save(PROBLEM, &cc).unwrap();

        assert_eq!(store.load(PROBLEM).unwrap(), Some(cc));
    }

    #[test]
    fn test_compare_and_set_active() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(!store.compare_and_set_active(PROBLEM, false, true).unwrap());

        store.save(PROBLEM, &problem()).unwrap();
        assert!(store.compare_and_set_active(PROBLEM, false, true).unwrap());
        assert!(!store.compare_and_set_active(PROBLEM, false, true).unwrap());
        assert!(store.is_active(PROBLEM).unwrap());

        // Saving a checkpoint must not clear ownership
        store.save(PROBLEM, &problem()).unwrap();
        assert!(store.is_active(PROBLEM).unwrap());

        assert!(store.compare_and_set_active(PROBLEM, true, false).unwrap());
        assert!(!store.is_active(PROBLEM).unwrap());
    }

    #[test]
    fn test_find_first_active_problem() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.find_first_active_problem_id().unwrap(), None);

        for id in [3, 2, 5] {
            store.save(ProblemId::new(id), &problem()).unwrap();
        }
        store.compare_and_set_active(ProblemId::new(5), false, true).unwrap();
        store.compare_and_set_active(ProblemId::new(3), false, true).unwrap();

        assert_eq!(
            store.find_first_active_problem_id().unwrap(),
            Some(ProblemId::new(3))
        );
    }

    #[test]
    fn test_change_log_ordering_and_filter() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = store.append(PROBLEM, &add(10)).unwrap();
        let other = store.append(ProblemId::new(2), &add(11)).unwrap();
        let second = store.append(PROBLEM, &add(12)).unwrap();
        assert!(first.change_id < other.change_id);
        assert!(other.change_id < second.change_id);

        let all = store.find_by_problem_since(PROBLEM, None).unwrap();
        assert_eq!(all, vec![first.clone(), second.clone()]);

        let since = store
            .find_by_problem_since(PROBLEM, Some(first.change_id))
            .unwrap();
        assert_eq!(since, vec![second]);
    }

    #[test]
    fn test_change_ids_not_reused_after_prune() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = store.append(PROBLEM, &add(10)).unwrap();
        assert_eq!(store.delete_up_to(PROBLEM, first.change_id).unwrap(), 1);

        let next = store.append(PROBLEM, &add(11)).unwrap();
        assert!(next.change_id > first.change_id);
    }

    #[test]
    fn test_checkpoint_prunes_reflected_changes_only() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.save(PROBLEM, &problem()).unwrap();
        let first = store.append(PROBLEM, &add(10)).unwrap();
        let second = store.append(PROBLEM, &add(11)).unwrap();
        let foreign = store.append(ProblemId::new(2), &add(12)).unwrap();

        let mut cc = problem();
        cc.last_change_id = Some(first.change_id);
        assert_eq!(store.checkpoint(PROBLEM, &cc).unwrap(), 1);

        assert_eq!(store.load(PROBLEM).unwrap().unwrap().last_change_id, Some(first.change_id));
        assert_eq!(store.find_by_problem_since(PROBLEM, None).unwrap(), vec![second]);
        assert_eq!(
            store.find_by_problem_since(ProblemId::new(2), None).unwrap(),
            vec![foreign]
        );
    }

    proptest! {
        #[test]
        fn prop_checkpoint_prunes_exactly_up_to_watermark(
            owners in proptest::collection::vec(1i64..=2, 1..20),
            cut in 0usize..20,
        ) {
            let store = SqliteStore::open_in_memory().unwrap();
            let appended: Vec<PersistedChange> = owners
                .iter()
                .enumerate()
                .map(|(i, owner)| store.append(ProblemId::new(*owner), &add(i as i64)).unwrap())
                .collect();
            let watermark = appended[cut.min(appended.len() - 1)].change_id;

            let mut cc = problem();
            cc.last_change_id = Some(watermark);
            store.checkpoint(PROBLEM, &cc).unwrap();

            let remaining = store.find_by_problem_since(PROBLEM, None).unwrap();
            let expected: Vec<_> = appended
                .iter()
                .filter(|c| c.problem_id == PROBLEM && c.change_id > watermark)
                .cloned()
                .collect();
            prop_assert_eq!(remaining, expected);

            let other = ProblemId::new(2);
            let untouched: Vec<_> = appended.iter().filter(|c| c.problem_id == other).cloned().collect();
            prop_assert_eq!(store.find_by_problem_since(other, None).unwrap(), untouched);
        }
    }

    #[test]
    fn test_file_store_shared_between_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("solver.db");
        let a = SqliteStore::open(&path).unwrap();
        let b = SqliteStore::open(&path).unwrap();

        a.save(PROBLEM, &problem()).unwrap();
        assert!(b.compare_and_set_active(PROBLEM, false, true).unwrap());
        assert!(!a.compare_and_set_active(PROBLEM, false, true).unwrap());
    }
}
