//! Per-attempt artifacts under `.taskflow/runs/<task_id>/`.
//!
//! Always written, independent of `RUST_LOG`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::types::TranscriptEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Execution,
    Review,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunMeta {
    pub task_id: String,
    pub kind: RunKind,
    pub attempt: u32,
    pub persona: String,
    /// `completed`, `failed`, `cancelled`, `approved` or `rejected`.
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub rounds: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct RunPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub transcript_path: PathBuf,
}

impl RunPaths {
    /// `runs/<task_id>/<attempt>` for executions, `runs/<task_id>/review-NNN`
    /// for reviews.
    pub fn new(runs_dir: &Path, task_id: &str, kind: RunKind, attempt: u32) -> Self {
        let leaf = match kind {
            RunKind::Execution => attempt.to_string(),
            RunKind::Review => format!("review-{attempt:03}"),
        };
        let dir = runs_dir.join(task_id).join(leaf);
        Self {
            meta_path: dir.join("meta.json"),
            transcript_path: dir.join("transcript.json"),
            dir,
        }
    }
}

pub fn write_run(
    runs_dir: &Path,
    meta: &RunMeta,
    transcript: &[TranscriptEntry],
) -> Result<RunPaths> {
    let paths = RunPaths::new(runs_dir, &meta.task_id, meta.kind, meta.attempt);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create run dir {}", paths.dir.display()))?;
    write_json(&paths.meta_path, meta)?;
    write_json(&paths.transcript_path, &transcript)?;
    Ok(paths)
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AgentDecision, ToolOutcome};

    #[test]
    fn run_paths_are_stable() {
        let runs = Path::new("/w/.taskflow/runs");
        let exec = RunPaths::new(runs, "t1", RunKind::Execution, 2);
        assert!(exec.dir.ends_with("t1/2"));
        let review = RunPaths::new(runs, "t1", RunKind::Review, 1);
        assert!(review.dir.ends_with("t1/review-001"));
        assert!(review.transcript_path.ends_with("transcript.json"));
    }

    #[test]
    fn writes_meta_and_transcript() {
        let temp = tempfile::tempdir().expect("tempdir");
        let now = Utc::now();
        let meta = RunMeta {
            task_id: "t1".to_string(),
            kind: RunKind::Execution,
            attempt: 1,
            persona: "writer".to_string(),
            outcome: "failed".to_string(),
            reason: Some("exceeded 1 tool rounds".to_string()),
            rounds: 2,
            started_at: now,
            ended_at: now,
            duration_ms: 0,
        };
        let transcript = vec![TranscriptEntry {
            round: 1,
            decision: AgentDecision::ToolCall {
                tool: "read_file".to_string(),
                arguments: serde_json::json!({"path": "a.md"}),
            },
            result: Some(ToolOutcome {
                ok: true,
                output: "hello".to_string(),
            }),
        }];
        let paths = write_run(temp.path(), &meta, &transcript).expect("write");

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&paths.meta_path).expect("read"))
                .expect("parse");
        assert_eq!(written["outcome"], "failed");
        assert_eq!(written["kind"], "execution");
        let transcript: Vec<TranscriptEntry> =
            serde_json::from_str(&fs::read_to_string(&paths.transcript_path).expect("read"))
                .expect("parse");
        assert_eq!(transcript.len(), 1);
    }
}
