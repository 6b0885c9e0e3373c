//! CLI tests for the `taskflow` binary.
//!
//! Spawns the binary against a temp project and checks exit codes and the
//! resulting task records.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use taskflow::core::stage::Stage;
use taskflow::exit_codes;
use taskflow::io::config::{load_config, write_config};
use taskflow::io::init::TaskflowPaths;
use taskflow::io::store::TaskStore;
use taskflow::test_support::task;

fn taskflow(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_taskflow"))
        .arg("--root")
        .arg(root)
        .args(args)
        .output()
        .expect("run taskflow")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn init(root: &Path) {
    let out = taskflow(root, &["init"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK), "{out:?}");
}

fn submit(root: &Path, task: &taskflow::task::Task) -> Output {
    let path = root.join(format!("{}.task.json", task.task_id));
    fs::write(&path, serde_json::to_string_pretty(task).expect("serialize")).expect("write");
    taskflow(root, &["submit", path.to_str().expect("utf-8 path")])
}

fn store(root: &Path) -> TaskStore {
    let paths = TaskflowPaths::new(root);
    let cfg = load_config(&paths.config_path).expect("config");
    TaskStore::new(
        &paths.tasks_dir,
        cfg.authorized_output_roots.clone(),
        cfg.lock_timeout(),
    )
}

fn assistant_task(id: &str) -> taskflow::task::Task {
    let mut t = task(id);
    t.persona = "assistant".to_string();
    t
}

#[test]
fn commands_require_initialized_project() {
    let temp = tempfile::tempdir().expect("tempdir");
    let out = taskflow(temp.path(), &["list"]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&out.stderr).contains("taskflow init"));
}

#[test]
fn init_twice_requires_force() {
    let temp = tempfile::tempdir().expect("tempdir");
    init(temp.path());
    assert_eq!(
        taskflow(temp.path(), &["init"]).status.code(),
        Some(exit_codes::INVALID)
    );
    assert_eq!(
        taskflow(temp.path(), &["init", "--force"]).status.code(),
        Some(exit_codes::OK)
    );
}

#[test]
fn select_exit_codes_follow_queue_state() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    init(root);

    let out = taskflow(root, &["select"]);
    assert_eq!(out.status.code(), Some(exit_codes::NOTHING_SELECTABLE));

    let mut blocked = assistant_task("blocked");
    blocked.dependencies = vec!["ghost.json".to_string()];
    assert_eq!(submit(root, &blocked).status.code(), Some(exit_codes::OK));
    let out = taskflow(root, &["select"]);
    assert_eq!(out.status.code(), Some(exit_codes::BLOCKED));
    assert!(String::from_utf8_lossy(&out.stderr).contains("ghost"));

    assert_eq!(
        submit(root, &assistant_task("ready")).status.code(),
        Some(exit_codes::OK)
    );
    let out = taskflow(root, &["select"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert_eq!(stdout(&out).trim(), "ready");

    let out = taskflow(root, &["blocked"]);
    assert!(stdout(&out).contains("blocked\tdependency not found: ghost"));
}

#[test]
fn submit_rejects_invalid_document_and_duplicates() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    init(root);

    let mut invalid = assistant_task("t1");
    invalid.dependencies = vec!["t1".to_string()];
    let out = submit(root, &invalid);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    assert!(store(root).list_all().expect("list").is_empty());

    assert_eq!(
        submit(root, &assistant_task("t1")).status.code(),
        Some(exit_codes::OK)
    );
    let out = submit(root, &assistant_task("t1"));
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&out.stderr).contains("already exists"));
}

#[test]
fn list_filters_by_stage_and_show_prints_record() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    init(root);
    submit(root, &assistant_task("a"));
    submit(root, &assistant_task("b"));
    store(root)
        .transition("b", Stage::Pending, Stage::Assigned)
        .expect("claim");

    let out = taskflow(root, &["list", "--stage", "assigned"]);
    let listed = stdout(&out);
    assert!(listed.starts_with("b\tassigned\t5\tassistant"), "{listed}");
    assert!(!listed.contains("a\t"));

    let out = taskflow(root, &["show", "a"]);
    let record: serde_json::Value = serde_json::from_slice(&out.stdout).expect("json");
    assert_eq!(record["stage"], "pending");
    assert_eq!(record["task"]["task_id"], "a");
}

#[test]
fn cancel_and_operator_review() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    init(root);
    submit(root, &assistant_task("c"));
    submit(root, &assistant_task("r"));
    let store = store(root);

    let out = taskflow(root, &["cancel", "c", "--reason", "obsolete"]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID), "pending cannot be cancelled");
    store
        .transition("c", Stage::Pending, Stage::Assigned)
        .expect("claim");
    let out = taskflow(root, &["cancel", "c", "--reason", "obsolete"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let record = store.get("c").expect("get");
    assert_eq!(record.stage, Stage::Failed);
    assert_eq!(record.failure_reason(), Some("cancelled: obsolete"));

    for (from, to) in [
        (Stage::Pending, Stage::Assigned),
        (Stage::Assigned, Stage::InProgress),
        (Stage::InProgress, Stage::Review),
    ] {
        store.transition("r", from, to).expect("advance");
    }
    let out = taskflow(root, &["reject", "r", "--note", "cite sources"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert_eq!(store.get("r").expect("get").review_notes(), vec!["cite sources"]);
    assert_eq!(store.get("r").expect("get").stage, Stage::Assigned);

    let out = taskflow(root, &["approve", "r"]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID), "not in review");
}

#[test]
fn eval_uses_restricted_evaluator() {
    let temp = tempfile::tempdir().expect("tempdir");
    let out = taskflow(temp.path(), &["eval", "max(2, math.floor(3.7)) * 2"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert_eq!(stdout(&out).trim(), "6");

    let out = taskflow(temp.path(), &["eval", "__import__('os').system('id')"]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
}

#[test]
fn personas_lists_example_persona() {
    let temp = tempfile::tempdir().expect("tempdir");
    init(temp.path());
    let out = taskflow(temp.path(), &["personas"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert!(stdout(&out).starts_with("assistant\t"));
}

/// A backend that always answers `fail` exercises the whole run path without
/// touching the gateway.
#[cfg(unix)]
#[test]
fn run_until_idle_applies_agent_failure() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    init(root);
    let paths = TaskflowPaths::new(root);
    let mut cfg = load_config(&paths.config_path).expect("config");
    cfg.scheduling.poll_interval_ms = 20;
    cfg.backend.command = vec![
        "sh".to_string(),
        "-c".to_string(),
        r#"cat >/dev/null; echo '{"decision":"fail","reason":"cannot do it"}'"#.to_string(),
    ];
    write_config(&paths.config_path, &cfg).expect("write config");
    submit(root, &assistant_task("t1"));

    let out = taskflow(root, &["run", "--until-idle", "--max-cycles", "100"]);
    assert_eq!(
        out.status.code(),
        Some(exit_codes::OK),
        "{}",
        String::from_utf8_lossy(&out.stderr)
    );

    let record = store(root).get("t1").expect("get");
    assert_eq!(record.stage, Stage::Failed);
    assert_eq!(record.failure_reason(), Some("cannot do it"));
    assert!(paths.runs_dir.join("t1/1/meta.json").is_file());
}
