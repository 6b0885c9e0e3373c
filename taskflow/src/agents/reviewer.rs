//! Reviewer agent: judges a deliverable against the task's success criteria.
//!
//! `complete` approves (the summary becomes the approval note); `fail`
//! rejects with its reason as reviewer feedback for the rework attempt.

use tracing::warn;

use super::{AgentEnv, AgentRun, LoopEnd, run_agent};
use crate::core::cancel::CancelToken;
use crate::core::state_update::ReviewVerdict;
use crate::persona::Persona;
use crate::task::TaskRecord;
use crate::tools::ToolError;
use crate::tools::file::{quote, run_line};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewOutcome {
    Verdict(ReviewVerdict),
    /// The review itself could not finish; the task fails with this reason.
    Failed { reason: String },
    Cancelled,
}

pub fn review_task(
    env: &AgentEnv<'_>,
    record: &TaskRecord,
    reviewer: &Persona,
    cancel: &CancelToken,
) -> AgentRun<ReviewOutcome> {
    let task = &record.task;
    let started_at = chrono::Utc::now();
    let early = |outcome| AgentRun {
        outcome,
        transcript: Vec::new(),
        started_at,
    };

    let deliverable = match run_line(
        env.gateway,
        &format!("Get-Content -Path {}", quote(&task.output_path)),
        cancel,
    ) {
        Ok(text) => text,
        Err(_) if cancel.is_cancelled() => return early(ReviewOutcome::Cancelled),
        Err(err @ ToolError::Security(_)) => {
            return early(ReviewOutcome::Failed {
                reason: err.to_string(),
            });
        }
        Err(err) => {
            warn!(task_id = %task.task_id, err = %err, "deliverable unreadable");
            return early(ReviewOutcome::Verdict(ReviewVerdict::Rejected {
                notes: format!("deliverable {} could not be read: {err}", task.output_path),
            }));
        }
    };

    let summary = record.completion.as_ref().map(|c| c.summary.as_str());
    let message = match env.prompts.render_review(record, &deliverable, summary) {
        Ok(message) => message,
        Err(err) => {
            return early(ReviewOutcome::Failed {
                reason: format!("render review message: {err:#}"),
            });
        }
    };

    run_agent(env, task, reviewer, message, cancel).map(|end| match end {
        LoopEnd::Complete {
            deliverable,
            summary,
        } => {
            let notes = if summary.trim().is_empty() {
                deliverable
            } else {
                summary
            };
            ReviewOutcome::Verdict(ReviewVerdict::Approved { notes })
        }
        LoopEnd::Fail { reason } => {
            ReviewOutcome::Verdict(ReviewVerdict::Rejected { notes: reason })
        }
        LoopEnd::Aborted { reason } => ReviewOutcome::Failed {
            reason: format!("review aborted: {reason}"),
        },
        LoopEnd::Cancelled => ReviewOutcome::Cancelled,
    })
}
