//! End-to-end solver flows.
//!
//! Each "process" is a full solver stack (file-backed store, greedy engine,
//! orchestrator, gateway) with its own database connection, so ownership and
//! change ids are arbitrated by SQLite exactly as between real processes:
//!
//! 1. Seed a problem, start it from JSON commands, add and prolong calls
//! 2. Verify checkpoints, pins and outbound notification lines
//! 3. Crash the owner mid-stream and recover on a second process
//!
//! ## Running
//!
//! ```bash
//! cargo test -p callcenter-e2e --test happy_path
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use callcenter_domain::{Agent, CallCenter, Skill};
use callcenter_events::channels;
use callcenter_id::{AgentId, CallId, ProblemId};
use callcenter_solver::messaging::{decode_command, stdio, NotificationEnvelope};
use callcenter_solver::store::{ChangeLogStore, ProblemStateStore};
use callcenter_solver::{
    ChannelPublisher, GreedyEngine, GreedyEngineConfig, MessageGateway, OrchestratorConfig,
    SolverOrchestrator, SqliteStore,
};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::info;

const PROBLEM: ProblemId = ProblemId::new(1);
const WAIT: Duration = Duration::from_secs(10);

struct Process {
    store: Arc<SqliteStore>,
    orchestrator: SolverOrchestrator,
    gateway: MessageGateway,
    notifications: mpsc::UnboundedReceiver<NotificationEnvelope>,
}

impl Process {
    fn boot(path: &Path, name: &str, checkpoint_interval: Duration) -> Self {
        let store = Arc::new(SqliteStore::open(path).unwrap());
        let engine = Arc::new(GreedyEngine::new(GreedyEngineConfig {
            tick: Duration::from_millis(5),
            ..GreedyEngineConfig::default()
        }));
        let (publisher, notifications) = ChannelPublisher::new();
        let orchestrator = SolverOrchestrator::new(
            store.clone(),
            engine,
            Arc::new(publisher),
            OrchestratorConfig {
                process_id: name.to_string(),
                checkpoint_interval,
            },
        );
        let gateway = MessageGateway::new(orchestrator.clone());
        Self {
            store,
            orchestrator,
            gateway,
            notifications,
        }
    }

    /// Feeds one raw JSON command line through decoding and dispatch.
    async fn send(&self, command: serde_json::Value) {
        let envelope = decode_command(command.to_string().as_bytes()).unwrap();
        self.gateway.handle(envelope).await.unwrap();
    }

    fn checkpoint(&self) -> CallCenter {
        self.store.load(PROBLEM).unwrap().unwrap()
    }

    async fn wait_until(&self, what: &str, check: impl Fn(&CallCenter) -> bool) -> CallCenter {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let solution = self.checkpoint();
            if check(&solution) {
                return solution;
            }
            assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("callcenter_solver=debug")
        .with_test_writer()
        .try_init();
}

fn envelope(message_type: &str, payload: serde_json::Value) -> serde_json::Value {
    json!({
        "message_id": uuid_like(),
        "occurred_at": "2026-10-18T09:00:00Z",
        "message_type": message_type,
        "message_version": 1,
        "problem_id": PROBLEM.get(),
        "payload": payload,
    })
}

fn uuid_like() -> String {
    static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);
    let n = COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    format!("00000000-0000-4000-8000-{n:012x}")
}

fn add_call(id: i64, skills: &[&str]) -> serde_json::Value {
    envelope(
        "call.add",
        json!({
            "type": "add_call",
            "call": {
                "id": id,
                "phone_number": "446-120-7773",
                "required_skills": skills,
                "duration": 300,
                "start_time": "2026-10-18T09:00:00Z",
            }
        }),
    )
}

fn seed(path: &Path) {
    let store = SqliteStore::open(path).unwrap();
    let problem = CallCenter::new(
        [
            Agent::new(AgentId::new(1), "Ann", [Skill::English, Skill::PropertyInsurance]),
            Agent::new(AgentId::new(2), "Beth", [Skill::German, Skill::CarInsurance]),
            Agent::new(AgentId::new(3), "Carl", [Skill::Spanish, Skill::LifeInsurance]),
        ],
        [],
    );
    store.save(PROBLEM, &problem).unwrap();
}

#[tokio::test]
async fn test_happy_path() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("callcenter.db");
    seed(&db);

    let process = Process::boot(&db, "process-a", Duration::from_millis(20));

    info!("Step 1: start solving");
    process
        .send(envelope("solver.start", json!({"type": "start_solver"})))
        .await;
    assert!(process.orchestrator.is_solving_problem(PROBLEM));
    assert!(process.store.is_active(PROBLEM).unwrap());

    info!("Step 2: add calls");
    process.send(add_call(10, &["german", "car_insurance"])).await;
    process.send(add_call(11, &["spanish"])).await;
    process.send(add_call(12, &["english", "property_insurance"])).await;
    process.send(add_call(13, &["german"])).await;

    let solution = process
        .wait_until("all calls planned", |s| s.calls.len() == 4 && s.is_initialized())
        .await;
    assert!(solution.score.unwrap().is_feasible());
    assert_eq!(solution.anchor(CallId::new(10)), Some(AgentId::new(2)));
    assert_eq!(solution.anchor(CallId::new(11)), Some(AgentId::new(3)));
    assert_eq!(solution.anchor(CallId::new(12)), Some(AgentId::new(1)));
    for agent_id in solution.agents.keys() {
        if let Some(head) = solution.chain_head(*agent_id) {
            assert!(solution.calls[&head].pinned, "head {head} of agent {agent_id} not pinned");
        }
    }

    info!("Step 3: prolong the call in progress");
    let head = solution.chain_head(AgentId::new(2)).unwrap();
    process
        .send(envelope(
            "call.prolong",
            json!({"type": "prolong_call", "call_id": head.get(), "prolongation": 120}),
        ))
        .await;
    let prolonged = process
        .wait_until("prolongation", |s| {
            s.calls.get(&head).is_some_and(|c| c.duration == Duration::from_secs(420))
        })
        .await;
    assert_eq!(prolonged.anchor(head), Some(AgentId::new(2)));

    info!("Step 4: stop solving");
    process
        .send(envelope("solver.stop", json!({"type": "stop_solver"})))
        .await;
    assert!(!process.store.is_active(PROBLEM).unwrap());
    assert!(process.store.find_by_problem_since(PROBLEM, None).unwrap().is_empty());

    info!("Step 5: notifications render as channel-tagged lines");
    let Process {
        orchestrator,
        gateway,
        notifications,
        ..
    } = process;
    drop(gateway);
    drop(orchestrator);
    let mut out = Vec::new();
    stdio::write_notifications(&mut out, notifications).await.unwrap();
    let lines: Vec<serde_json::Value> = out
        .split(|b| *b == b'\n')
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_slice(line).unwrap())
        .collect();
    assert!(!lines.is_empty());
    assert!(lines.iter().all(|l| l["channel"] == channels::BEST_SOLUTION));
    assert!(lines
        .iter()
        .all(|l| l["message"]["payload"]["problem_id"] == PROBLEM.get()));
}

#[tokio::test]
async fn test_crash_recovery_across_processes() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("callcenter.db");
    seed(&db);

    let mut first = Process::boot(&db, "process-a", Duration::from_secs(3600));
    let second = Process::boot(&db, "process-b", Duration::from_millis(20));

    first
        .send(envelope("solver.start", json!({"type": "start_solver"})))
        .await;
    tokio::time::timeout(WAIT, first.notifications.recv())
        .await
        .unwrap()
        .unwrap();

    // The second process cannot take over a live problem
    second
        .send(envelope("solver.start", json!({"type": "start_solver"})))
        .await;
    assert!(!second.orchestrator.is_solving_problem(PROBLEM));

    first.send(add_call(20, &["english"])).await;
    first.send(add_call(21, &["german"])).await;
    first
        .send(envelope(
            "call.remove",
            json!({"type": "remove_call", "call_id": 20}),
        ))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(first.checkpoint().last_change_id, None);

    info!("Crashing the owner before its next checkpoint");
    first.orchestrator.abort().await;
    assert!(first.store.is_active(PROBLEM).unwrap());
    assert_eq!(second.store.find_by_problem_since(PROBLEM, None).unwrap().len(), 3);

    assert_eq!(second.orchestrator.recover().await.unwrap(), Some(PROBLEM));
    let solution = second
        .wait_until("replayed changes", |s| {
            s.last_change_id.is_some() && second.store.find_by_problem_since(PROBLEM, None).unwrap().is_empty()
        })
        .await;
    assert_eq!(solution.calls.keys().copied().collect::<Vec<_>>(), vec![CallId::new(21)]);
    assert_eq!(solution.anchor(CallId::new(21)), Some(AgentId::new(2)));

    second.orchestrator.stop_solving(PROBLEM).await.unwrap();
    assert!(!second.store.is_active(PROBLEM).unwrap());
}
