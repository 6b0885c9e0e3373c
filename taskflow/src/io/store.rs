//! Directory-backed task store: one JSON record per task, keyed by id.
//!
//! `stage` inside the record is the only scheduling state. Every mutation is a
//! compare-and-swap under the task's advisory lock, written to a temp file and
//! renamed over the record, so readers always see either the old or the new
//! record and never zero or two copies of a task.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::invariants::{validate_record, validate_task};
use crate::core::stage::Stage;
use crate::io::lock::{self, Acquire, TaskLock};
use crate::io::schema;
use crate::task::{Annotation, Task, TaskRecord, validate_id};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid task: {}", .0.join("; "))]
    Invalid(Vec<String>),
    #[error("task '{0}' already exists")]
    Duplicate(String),
    #[error("task '{0}' not found")]
    NotFound(String),
    #[error("task '{task_id}' is {actual}, expected {expected}")]
    StageMismatch {
        task_id: String,
        expected: Stage,
        actual: Stage,
    },
    #[error("task '{task_id}' cannot move from {from} to {to}")]
    IllegalTransition {
        task_id: String,
        from: Stage,
        to: Stage,
    },
    #[error("timed out waiting for the lock on task '{0}'")]
    LockTimeout(String),
    #[error("corrupt record {path}: {message}")]
    Corrupt { path: PathBuf, message: String },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Handle to `.taskflow/tasks/`. Cheap to clone; holds no in-memory state.
#[derive(Debug, Clone)]
pub struct TaskStore {
    dir: PathBuf,
    authorized_roots: Vec<String>,
    lock_timeout: Duration,
}

impl TaskStore {
    pub fn new(
        dir: impl Into<PathBuf>,
        authorized_roots: Vec<String>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            dir: dir.into(),
            authorized_roots,
            lock_timeout,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn authorized_roots(&self) -> &[String] {
        &self.authorized_roots
    }

    fn record_path(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{task_id}.json"))
    }

    fn lock_path(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{task_id}.lock"))
    }

    /// Unique sibling temp path. The leading dot keeps it out of listings.
    fn temp_path(&self, task_id: &str) -> PathBuf {
        let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.dir
            .join(format!(".{task_id}.{}.{n}.tmp", std::process::id()))
    }

    /// Validate a raw task document against the schema, then enqueue it.
    pub fn enqueue_document(&self, document: &Value) -> StoreResult<TaskRecord> {
        let errors = schema::check_task(document)?;
        if !errors.is_empty() {
            return Err(StoreError::Invalid(errors));
        }
        let task: Task = serde_json::from_value(document.clone())
            .map_err(|err| StoreError::Invalid(vec![err.to_string()]))?;
        self.enqueue(task)
    }

    /// Accept a well-formed task into `Pending`.
    ///
    /// The record is written to a temp file and hard-linked into place, which
    /// fails if the id is taken; two concurrent enqueues of one id cannot
    /// both succeed and nothing is mutated on rejection.
    #[instrument(skip_all, fields(task_id = %task.task_id))]
    pub fn enqueue(&self, task: Task) -> StoreResult<TaskRecord> {
        let errors = validate_task(&task, &self.authorized_roots);
        if !errors.is_empty() {
            return Err(StoreError::Invalid(errors));
        }
        fs::create_dir_all(&self.dir)
            .map_err(|err| StoreError::io(format!("create {}", self.dir.display()), err))?;

        let task_id = task.task_id.clone();
        let record = TaskRecord::pending(task);
        let final_path = self.record_path(&task_id);
        let tmp_path = self.temp_path(&task_id);
        write_record(&tmp_path, &record)?;
        let linked = fs::hard_link(&tmp_path, &final_path);
        if let Err(err) = fs::remove_file(&tmp_path) {
            warn!(path = %tmp_path.display(), err = %err, "failed to remove temp record");
        }
        match linked {
            Ok(()) => {
                info!("task enqueued");
                Ok(record)
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                Err(StoreError::Duplicate(task_id))
            }
            Err(err) => Err(StoreError::io(
                format!("link {}", final_path.display()),
                err,
            )),
        }
    }

    pub fn get(&self, task_id: &str) -> StoreResult<TaskRecord> {
        if validate_id(task_id).is_err() {
            return Err(StoreError::NotFound(task_id.to_string()));
        }
        read_record(&self.record_path(task_id))?
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))
    }

    /// Snapshot of every record, ordered by task id.
    ///
    /// Unreadable or mismatched records are logged and skipped; a record is
    /// never reported twice.
    pub fn list_all(&self) -> StoreResult<Vec<TaskRecord>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(StoreError::io(format!("read {}", self.dir.display()), err));
            }
        };

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|err| StoreError::io(format!("read {}", self.dir.display()), err))?;
            let path = entry.path();
            let Some(stem) = record_stem(&path) else {
                continue;
            };
            match read_record(&path) {
                Ok(Some(record)) if record.task_id() == stem => records.push(record),
                Ok(Some(record)) => warn!(
                    path = %path.display(),
                    task_id = record.task_id(),
                    "record id does not match file name, skipping"
                ),
                Ok(None) => {}
                Err(err) => warn!(path = %path.display(), err = %err, "skipping unreadable record"),
            }
        }
        records.sort_by(|a, b| a.task_id().cmp(b.task_id()));
        Ok(records)
    }

    /// Records currently in `stage`.
    pub fn list(&self, stage: Stage) -> StoreResult<Vec<TaskRecord>> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|r| r.stage == stage)
            .collect())
    }

    /// Move `task_id` from `from` to `to` if it is still in `from`.
    pub fn transition(&self, task_id: &str, from: Stage, to: Stage) -> StoreResult<TaskRecord> {
        self.transition_with(task_id, from, to, |_| {})
    }

    /// Like [`transition`](Self::transition), letting the caller append
    /// annotations or bump counters in the same write.
    #[instrument(skip_all, fields(task_id = %task_id, from = %from, to = %to))]
    pub fn transition_with(
        &self,
        task_id: &str,
        from: Stage,
        to: Stage,
        apply: impl FnOnce(&mut TaskRecord),
    ) -> StoreResult<TaskRecord> {
        if !from.can_transition(to) {
            return Err(StoreError::IllegalTransition {
                task_id: task_id.to_string(),
                from,
                to,
            });
        }
        let record = self.mutate(task_id, from, |record| {
            apply(record);
            record.stage = to;
            if to != Stage::InProgress {
                record.owner = None;
            }
        })?;
        info!("task transitioned");
        Ok(record)
    }

    /// Modify a record without changing its stage.
    pub fn update(
        &self,
        task_id: &str,
        expected: Stage,
        apply: impl FnOnce(&mut TaskRecord),
    ) -> StoreResult<TaskRecord> {
        self.mutate(task_id, expected, |record| {
            apply(record);
            record.stage = expected;
        })
    }

    /// Append a machine annotation in whatever stage the task is in.
    pub fn annotate(&self, task_id: &str, annotation: Annotation) -> StoreResult<TaskRecord> {
        let stage = self.get(task_id)?.stage;
        self.update(task_id, stage, |record| record.annotations.push(annotation))
    }

    /// Remove locks abandoned by crashed processes.
    pub fn clear_stale_locks(&self, max_age: Duration) -> StoreResult<Vec<PathBuf>> {
        Ok(lock::clear_stale_locks(&self.dir, max_age)?)
    }

    fn mutate(
        &self,
        task_id: &str,
        expected: Stage,
        apply: impl FnOnce(&mut TaskRecord),
    ) -> StoreResult<TaskRecord> {
        let path = self.record_path(task_id);
        if validate_id(task_id).is_err() || !path.exists() {
            return Err(StoreError::NotFound(task_id.to_string()));
        }
        let _lock = match TaskLock::acquire(&self.lock_path(task_id), self.lock_timeout)? {
            Acquire::Held(lock) => lock,
            Acquire::TimedOut => return Err(StoreError::LockTimeout(task_id.to_string())),
        };

        let mut record =
            read_record(&path)?.ok_or_else(|| StoreError::NotFound(task_id.to_string()))?;
        if record.stage != expected {
            debug!(actual = %record.stage, "stage changed underneath caller");
            return Err(StoreError::StageMismatch {
                task_id: task_id.to_string(),
                expected,
                actual: record.stage,
            });
        }

        let original_task = record.task.clone();
        apply(&mut record);
        if record.task != original_task {
            return Err(StoreError::Invalid(vec![format!(
                "task '{task_id}' document is immutable"
            )]));
        }
        record.updated_at = Utc::now();
        let errors = validate_record(&record);
        if !errors.is_empty() {
            return Err(StoreError::Invalid(errors));
        }

        let tmp_path = self.temp_path(task_id);
        write_record(&tmp_path, &record)?;
        if let Err(err) = fs::rename(&tmp_path, &path) {
            // Best effort: a leftover temp file is ignored by listings anyway.
            let _ = fs::remove_file(&tmp_path);
            return Err(StoreError::io(format!("replace {}", path.display()), err));
        }
        Ok(record)
    }
}

/// Task id for a record file name, or `None` for temp/lock/foreign files.
fn record_stem(path: &Path) -> Option<&str> {
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    validate_id(stem).ok().map(|()| stem)
}

fn read_record(path: &Path) -> StoreResult<Option<TaskRecord>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(StoreError::io(format!("read {}", path.display()), err)),
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|err| StoreError::Corrupt {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
}

fn write_record(path: &Path, record: &TaskRecord) -> StoreResult<()> {
    let mut buf = serde_json::to_string_pretty(record)
        .map_err(|err| StoreError::Other(anyhow::Error::new(err).context("serialize record")))?;
    buf.push('\n');
    fs::write(path, buf).map_err(|err| StoreError::io(format!("write {}", path.display()), err))
}
