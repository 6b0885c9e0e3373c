//! Pure stage decisions for execution and review results.
//!
//! The driver applies these through the store's compare-and-swap transition;
//! nothing here touches disk.

use crate::core::stage::Stage;
use crate::task::{Annotation, AnnotationKind};

/// What one execution attempt produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed { summary: String },
    Failed { reason: String },
    /// Stopped by an operator; the cancel command already moved the task.
    Cancelled,
}

/// A reviewer's (agent or operator) decision on a deliverable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewVerdict {
    Approved { notes: String },
    Rejected { notes: String },
}

/// Target stage plus what to record alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageChange {
    pub to: Stage,
    pub annotations: Vec<Annotation>,
    pub review_attempts: u32,
}

/// Where an `InProgress` task goes after an attempt.
///
/// `None` for a cancelled attempt: the task has already left `InProgress`.
pub fn after_execution(
    outcome: &ExecutionOutcome,
    review_enabled: bool,
    review_attempts: u32,
) -> Option<StageChange> {
    match outcome {
        ExecutionOutcome::Completed { .. } => Some(StageChange {
            to: if review_enabled {
                Stage::Review
            } else {
                Stage::Done
            },
            annotations: Vec::new(),
            review_attempts,
        }),
        ExecutionOutcome::Failed { reason } => Some(StageChange {
            to: Stage::Failed,
            annotations: vec![Annotation::new(AnnotationKind::Failure, reason.clone())],
            review_attempts,
        }),
        ExecutionOutcome::Cancelled => None,
    }
}

/// Where a `Review` task goes after a verdict.
///
/// Rejections send the task back for rework until `max_review_attempts`
/// rejections have accumulated, then fail it.
pub fn after_review(
    verdict: &ReviewVerdict,
    review_attempts: u32,
    max_review_attempts: u32,
) -> StageChange {
    match verdict {
        ReviewVerdict::Approved { notes } => StageChange {
            to: Stage::Done,
            annotations: (!notes.trim().is_empty())
                .then(|| Annotation::new(AnnotationKind::Note, format!("approved: {notes}")))
                .into_iter()
                .collect(),
            review_attempts,
        },
        ReviewVerdict::Rejected { notes } => {
            let attempts = review_attempts.saturating_add(1);
            let notes = if notes.trim().is_empty() {
                "rejected without notes".to_string()
            } else {
                notes.clone()
            };
            let mut annotations = vec![Annotation::new(AnnotationKind::Review, notes.clone())];
            let to = if attempts >= max_review_attempts {
                annotations.push(Annotation::new(
                    AnnotationKind::Failure,
                    format!("review rejected {attempts} time(s); last notes: {notes}"),
                ));
                Stage::Failed
            } else {
                Stage::Assigned
            };
            StageChange {
                to,
                annotations,
                review_attempts: attempts,
            }
        }
    }
}

/// Whether another execution attempt may start.
pub fn attempts_exhausted(execution_attempts: u32, max_execution_attempts: u32) -> bool {
    execution_attempts >= max_execution_attempts
}
