//! Task documents and the persisted task record.
//!
//! A [`Task`] is the immutable document submitted by a producer. The store
//! wraps it in a [`TaskRecord`] that carries the only mutable scheduling state:
//! the current [`Stage`], machine-appended annotations, attempt counters, and
//! the owning worker while a task is in progress.

use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::stage::Stage;

/// Priority used when a task does not specify one (medium on a 1-10 scale).
pub const DEFAULT_PRIORITY: i64 = 5;

/// A unit of work. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub created_by: String,
    pub timestamp: DateTime<Utc>,
    /// Lower value = more urgent. `None` means [`DEFAULT_PRIORITY`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    pub persona: String,
    pub objective: String,
    #[serde(default)]
    pub context: String,
    /// Task ids (or `<id>.json` file names) that must be `Done` first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Workspace-relative destination for the deliverable.
    pub output_path: String,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
}

impl Task {
    pub fn effective_priority(&self) -> i64 {
        self.priority.unwrap_or(DEFAULT_PRIORITY)
    }
}

/// Why an annotation was appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationKind {
    /// Reviewer feedback on a rejected deliverable.
    Review,
    /// Reason for a transition to `Failed`.
    Failure,
    /// Operator cancellation.
    Cancellation,
    /// Crash recovery or other driver bookkeeping.
    Recovery,
    Note,
}

/// Machine-appended note. Original task fields are never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub kind: AnnotationKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl Annotation {
    pub fn new(kind: AnnotationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Worker currently executing the task (set only while `InProgress`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub pid: u32,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
}

/// Result of the most recent successful execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub summary: String,
    pub completed_at: DateTime<Utc>,
}

/// Persisted envelope: one per task, keyed by `task.task_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub stage: Stage,
    pub task: Task,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub execution_attempts: u32,
    #[serde(default)]
    pub review_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Owner>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion: Option<Completion>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// A fresh record in the entry stage.
    pub fn pending(task: Task) -> Self {
        Self {
            stage: Stage::Pending,
            task,
            annotations: Vec::new(),
            execution_attempts: 0,
            review_attempts: 0,
            owner: None,
            completion: None,
            updated_at: Utc::now(),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task.task_id
    }

    /// Reviewer feedback accumulated across rejected attempts, oldest first.
    pub fn review_notes(&self) -> Vec<&str> {
        self.annotations
            .iter()
            .filter(|a| a.kind == AnnotationKind::Review)
            .map(|a| a.message.as_str())
            .collect()
    }

    /// The most recent failure or cancellation reason, if any.
    pub fn failure_reason(&self) -> Option<&str> {
        self.annotations
            .iter()
            .rev()
            .find(|a| matches!(a.kind, AnnotationKind::Failure | AnnotationKind::Cancellation))
            .map(|a| a.message.as_str())
    }
}

static ID_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").ok());

/// Validate a task or persona identifier: `[A-Za-z0-9._-]`, no leading dot.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(anyhow!("id must not be empty"));
    }
    if id.contains('/') || id.contains('\\') {
        return Err(anyhow!("id must not contain path separators"));
    }
    if !ID_RE.as_ref().is_some_and(|re| re.is_match(id)) {
        return Err(anyhow!(
            "id must be [A-Za-z0-9._-] only and not start with '.' (got '{id}')"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::task;

    #[test]
    fn validate_id_rejects_separators_and_dots() {
        assert!(validate_id("report-1.v2").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("a/b").is_err());
        assert!(validate_id("..").is_err());
        assert!(validate_id(".hidden").is_err());
        assert!(validate_id("semi;colon").is_err());
    }

    #[test]
    fn missing_priority_uses_default() {
        let mut t = task("t1");
        t.priority = None;
        assert_eq!(t.effective_priority(), DEFAULT_PRIORITY);
    }

    /// A record written and read back re-serializes byte-identically.
    #[test]
    fn record_round_trip_is_byte_identical() {
        let mut record = TaskRecord::pending(task("t1"));
        record
            .annotations
            .push(Annotation::new(AnnotationKind::Review, "tighten the intro"));
        let first = serde_json::to_string_pretty(&record).expect("serialize");
        let parsed: TaskRecord = serde_json::from_str(&first).expect("parse");
        let second = serde_json::to_string_pretty(&parsed).expect("serialize");
        assert_eq!(first, second);
        assert_eq!(parsed, record);
    }

    #[test]
    fn review_notes_and_failure_reason() {
        let mut record = TaskRecord::pending(task("t1"));
        record
            .annotations
            .push(Annotation::new(AnnotationKind::Review, "first"));
        record
            .annotations
            .push(Annotation::new(AnnotationKind::Failure, "boom"));
        record
            .annotations
            .push(Annotation::new(AnnotationKind::Review, "second"));
        assert_eq!(record.review_notes(), vec!["first", "second"]);
        assert_eq!(record.failure_reason(), Some("boom"));
    }
}
