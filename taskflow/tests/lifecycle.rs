//! Lifecycle tests across the store, the scheduler and the driver.
//!
//! These drive whole task lifecycles through the public API: racing claims,
//! concurrent readers during transitions, restarts that rescan the store,
//! dependency gating and review rework.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use taskflow::core::stage::Stage;
use taskflow::core::types::AgentDecision;
use taskflow::driver::{Driver, DriverOptions, LoopStop, Services};
use taskflow::io::init::initial_config;
use taskflow::io::provider::ProviderError;
use taskflow::io::store::StoreError;
use taskflow::project::Project;
use taskflow::test_support::{ScriptedProvider, TestWorkspace, complete, persona, task, tool_call};

fn workspace(review: bool, reviewer: Option<&str>) -> TestWorkspace {
    let mut cfg = initial_config();
    cfg.scheduling.poll_interval_ms = 10;
    cfg.review.enabled = review;
    cfg.review.reviewer_persona = reviewer.map(str::to_string);
    cfg.review.max_review_attempts = 2;
    cfg.backend.max_retries = 0;
    let ws = TestWorkspace::with_config(cfg);
    ws.write_persona(&persona("writer", &["write_file", "read_file"]));
    ws.write_persona(&persona("critic", &[]));
    ws
}

fn driver(ws: &TestWorkspace, provider: &Arc<ScriptedProvider>) -> Driver {
    Driver::new(
        Project::open(ws.root()).expect("open"),
        Services {
            provider: provider.clone(),
            gateway: Arc::new(ws.gateway.clone()),
        },
    )
    .expect("driver")
}

fn until_idle() -> DriverOptions {
    DriverOptions {
        max_cycles: Some(100),
        until_idle: true,
    }
}

/// Eight threads race to claim the same pending task; exactly one wins and
/// every loser sees a stage mismatch.
#[test]
fn racing_claims_succeed_at_most_once() {
    let ws = workspace(false, None);
    ws.store().enqueue(task("t1")).expect("enqueue");

    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = ws.store();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store.transition("t1", Stage::Pending, Stage::Assigned)
            })
        })
        .collect();

    let mut wins = 0;
    for handle in handles {
        match handle.join().expect("join") {
            Ok(record) => {
                assert_eq!(record.stage, Stage::Assigned);
                wins += 1;
            }
            Err(StoreError::StageMismatch { actual, .. }) => {
                assert_eq!(actual, Stage::Assigned);
            }
            Err(StoreError::LockTimeout(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(ws.store().get("t1").expect("get").stage, Stage::Assigned);
}

/// Writers drive their own tasks to `done` while a reader keeps listing the
/// store. Every snapshot holds every task exactly once, and no task's stage
/// ever moves backwards between snapshots.
#[test]
fn listings_see_each_task_once_during_transitions() {
    const WRITERS: usize = 4;
    const PER_WRITER: usize = 5;
    let path = [Stage::Pending, Stage::Assigned, Stage::InProgress, Stage::Done];

    let ws = workspace(false, None);
    let mut ids = Vec::new();
    for w in 0..WRITERS {
        for n in 0..PER_WRITER {
            let id = format!("w{w}-t{n}");
            ws.store().enqueue(task(&id)).expect("enqueue");
            ids.push(id);
        }
    }

    let writing = Arc::new(AtomicBool::new(true));
    let reader = {
        let store = ws.store();
        let writing = Arc::clone(&writing);
        let expected = ids.clone();
        thread::spawn(move || {
            let mut last: BTreeMap<String, usize> = BTreeMap::new();
            let mut snapshots = 0;
            loop {
                let done = !writing.load(Ordering::SeqCst);
                let records = store.list_all().expect("list");
                let listed: Vec<&str> = records.iter().map(|r| r.task_id()).collect();
                assert_eq!(listed, expected, "each task exactly once");
                for record in &records {
                    let rank = path
                        .iter()
                        .position(|stage| *stage == record.stage)
                        .expect("stage on the driven path");
                    let previous = last.insert(record.task_id().to_string(), rank);
                    assert!(previous.is_none_or(|p| p <= rank), "{} regressed", record.task_id());
                }
                snapshots += 1;
                if done {
                    return snapshots;
                }
            }
        })
    };

    let writers: Vec<_> = (0..WRITERS)
        .map(|w| {
            let store = ws.store();
            thread::spawn(move || {
                for n in 0..PER_WRITER {
                    let id = format!("w{w}-t{n}");
                    for step in path.windows(2) {
                        store.transition(&id, step[0], step[1]).expect("transition");
                    }
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().expect("writer");
    }
    writing.store(false, Ordering::SeqCst);
    let snapshots = reader.join().expect("reader");

    assert!(snapshots >= 1);
    let records = ws.store().list_all().expect("list");
    assert!(records.iter().all(|r| r.stage == Stage::Done));
}

/// A stopped driver leaves nothing behind; a new one rescans the store and
/// continues where the first stopped without re-running finished work.
#[test]
fn restarted_driver_rescans_and_continues() {
    let ws = workspace(false, None);
    let store = ws.store();
    let mut b = task("b");
    b.dependencies = vec!["a".to_string()];
    store.enqueue(task("a")).expect("enqueue");
    store.enqueue(b).expect("enqueue");

    let provider = Arc::new(ScriptedProvider::new([complete("A")]));
    let report = driver(&ws, &provider)
        .run(&DriverOptions {
            max_cycles: Some(1),
            until_idle: false,
        })
        .expect("first run");
    assert_eq!(report.stop, LoopStop::MaxCycles);
    assert_eq!(store.get("a").expect("a").stage, Stage::Done);
    assert_eq!(store.get("b").expect("b").stage, Stage::Pending);

    provider.push(complete("B"));
    driver(&ws, &provider).run(&until_idle()).expect("second run");
    assert_eq!(store.get("b").expect("b").stage, Stage::Done);
    assert_eq!(store.get("a").expect("a").execution_attempts, 1);
    assert_eq!(provider.requests().len(), 2);

    // Nothing left: a third run is idle immediately.
    let report = driver(&ws, &provider).run(&until_idle()).expect("third run");
    assert_eq!(report.executions, 0);
}

/// A failed dependency blocks its dependents for good; they stay pending.
#[test]
fn failed_dependency_blocks_dependents() {
    let ws = workspace(false, None);
    let store = ws.store();
    let mut child = task("child");
    child.dependencies = vec!["parent.json".to_string()];
    store.enqueue(task("parent")).expect("enqueue");
    store.enqueue(child).expect("enqueue");

    let provider = Arc::new(ScriptedProvider::new([Ok(AgentDecision::Fail {
        reason: "impossible".to_string(),
    })]));
    driver(&ws, &provider).run(&until_idle()).expect("run");

    assert_eq!(store.get("parent").expect("get").stage, Stage::Failed);
    assert_eq!(store.get("child").expect("get").stage, Stage::Pending);
    let personas = Project::open(ws.root())
        .expect("open")
        .personas
        .load()
        .expect("personas");
    let blocked = taskflow::select::blocked_tasks(&store, &personas).expect("blocked");
    assert_eq!(blocked.len(), 1);
    assert!(blocked[0].reason.is_standing());
}

/// The agent writes its own deliverable through a tool call, the reviewer
/// rejects twice and the task fails once rework is exhausted.
#[test]
fn review_rework_is_bounded() {
    let ws = workspace(true, Some("critic"));
    ws.store().enqueue(task("t1")).expect("enqueue");

    let reject = |notes: &str| -> Result<AgentDecision, ProviderError> {
        Ok(AgentDecision::Fail {
            reason: notes.to_string(),
        })
    };
    let provider = Arc::new(ScriptedProvider::new([
        tool_call(
            "write_file",
            serde_json::json!({"path": "out/t1.md", "content": "draft one"}),
        ),
        complete(""),
        reject("too short"),
        complete("draft two"),
        reject("still too short"),
    ]));
    driver(&ws, &provider).run(&until_idle()).expect("run");

    let record = ws.store().get("t1").expect("get");
    assert_eq!(record.stage, Stage::Failed);
    assert_eq!(record.review_attempts, 2);
    assert_eq!(record.review_notes(), vec!["too short", "still too short"]);
    assert_eq!(provider.remaining(), 0);
    assert_eq!(
        std::fs::read_to_string(ws.workspace_root().join("out/t1.md")).expect("read"),
        "draft two"
    );
}
