//! Operator commands: submit, cancel, and manual review verdicts.
//!
//! Each command is one compare-and-swap on the task store. A running driver
//! notices the new stage on its next cycle (and kills in-flight work for a
//! cancelled task).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tracing::info;

use crate::core::stage::Stage;
use crate::core::state_update::{ReviewVerdict, after_review};
use crate::io::store::{StoreError, TaskStore};
use crate::task::{Annotation, AnnotationKind, TaskRecord};

/// Read a task document from `path` and enqueue it.
pub fn submit_file(store: &TaskStore, path: &Path) -> Result<TaskRecord> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let document: Value =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    let record = store
        .enqueue_document(&document)
        .with_context(|| format!("submit {}", path.display()))?;
    Ok(record)
}

/// Move an `Assigned` or `InProgress` task to `Failed` with a cancellation
/// annotation.
pub fn cancel_task(store: &TaskStore, task_id: &str, reason: &str) -> Result<TaskRecord> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(anyhow!("a cancellation reason is required"));
    }
    let current = store.get(task_id)?;
    if !matches!(current.stage, Stage::Assigned | Stage::InProgress) {
        return Err(anyhow!(
            "task '{task_id}' is {}; only assigned or in-progress tasks can be cancelled",
            current.stage
        ));
    }
    let record = store
        .transition_with(task_id, current.stage, Stage::Failed, |record| {
            record.annotations.push(Annotation::new(
                AnnotationKind::Cancellation,
                format!("cancelled: {reason}"),
            ));
        })
        .map_err(|err| raced(err, "cancel"))?;
    info!(task_id, "task cancelled");
    Ok(record)
}

/// Apply an operator verdict to a task in `Review`.
pub fn review_verdict(
    store: &TaskStore,
    task_id: &str,
    verdict: &ReviewVerdict,
    max_review_attempts: u32,
) -> Result<TaskRecord> {
    let current = store.get(task_id)?;
    if current.stage != Stage::Review {
        return Err(anyhow!("task '{task_id}' is {}, not review", current.stage));
    }
    let change = after_review(verdict, current.review_attempts, max_review_attempts);
    let record = store
        .transition_with(task_id, Stage::Review, change.to, |record| {
            record.annotations.extend(change.annotations);
            record.review_attempts = change.review_attempts;
        })
        .map_err(|err| raced(err, "review"))?;
    info!(task_id, to = %record.stage, "review verdict applied");
    Ok(record)
}

fn raced(err: StoreError, action: &str) -> anyhow::Error {
    match err {
        StoreError::StageMismatch { task_id, actual, .. } => {
            anyhow!("task '{task_id}' moved to {actual} before the {action} could be applied")
        }
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestWorkspace, task};

    fn in_review(ws: &TestWorkspace) -> TaskStore {
        let store = ws.store();
        store.enqueue(task("t1")).expect("enqueue");
        store
            .transition("t1", Stage::Pending, Stage::Assigned)
            .expect("claim");
        store
            .transition("t1", Stage::Assigned, Stage::InProgress)
            .expect("start");
        store
            .transition("t1", Stage::InProgress, Stage::Review)
            .expect("review");
        store
    }

    #[test]
    fn submit_validates_document() {
        let ws = TestWorkspace::new();
        let path = ws.root().join("task.json");
        fs::write(&path, r#"{"task_id": "t1"}"#).expect("write");
        let err = submit_file(&ws.store(), &path).unwrap_err();
        assert!(format!("{err:#}").contains("invalid task"), "{err:#}");

        let doc = serde_json::to_string(&task("t1")).expect("serialize");
        fs::write(&path, doc).expect("write");
        let record = submit_file(&ws.store(), &path).expect("submit");
        assert_eq!(record.stage, Stage::Pending);
    }

    #[test]
    fn cancel_fails_task_with_reason() {
        let ws = TestWorkspace::new();
        let store = ws.store();
        store.enqueue(task("t1")).expect("enqueue");
        assert!(cancel_task(&store, "t1", "no longer needed").is_err());

        store
            .transition("t1", Stage::Pending, Stage::Assigned)
            .expect("claim");
        let record = cancel_task(&store, "t1", "no longer needed").expect("cancel");
        assert_eq!(record.stage, Stage::Failed);
        assert_eq!(record.failure_reason(), Some("cancelled: no longer needed"));
    }

    #[test]
    fn rejection_returns_task_for_rework_then_fails() {
        let ws = TestWorkspace::new();
        let store = in_review(&ws);
        let reject = ReviewVerdict::Rejected {
            notes: "add sources".to_string(),
        };
        let record = review_verdict(&store, "t1", &reject, 2).expect("reject");
        assert_eq!(record.stage, Stage::Assigned);
        assert_eq!(record.review_notes(), vec!["add sources"]);

        store
            .transition("t1", Stage::Assigned, Stage::InProgress)
            .expect("start");
        store
            .transition("t1", Stage::InProgress, Stage::Review)
            .expect("review");
        let record = review_verdict(&store, "t1", &reject, 2).expect("reject");
        assert_eq!(record.stage, Stage::Failed);
        assert_eq!(record.review_attempts, 2);
    }

    #[test]
    fn approval_completes_task() {
        let ws = TestWorkspace::new();
        let store = in_review(&ws);
        let record = review_verdict(
            &store,
            "t1",
            &ReviewVerdict::Approved {
                notes: String::new(),
            },
            3,
        )
        .expect("approve");
        assert_eq!(record.stage, Stage::Done);
        assert!(review_verdict(
            &store,
            "t1",
            &ReviewVerdict::Approved {
                notes: String::new()
            },
            3
        )
        .is_err());
    }
}
