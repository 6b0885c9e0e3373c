//! Message templates for the executor and reviewer agents.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::types::ToolDefinition;
use crate::task::TaskRecord;

const TASK_TEMPLATE: &str = include_str!("prompts/task.md");
const REVIEW_TEMPLATE: &str = include_str!("prompts/review.md");

/// Deliverable text beyond this many bytes is cut before review.
pub const REVIEW_DELIVERABLE_LIMIT: usize = 32 * 1024;

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("task", TASK_TEMPLATE)
            .context("load task template")?;
        env.add_template("review", REVIEW_TEMPLATE)
            .context("load review template")?;
        Ok(Self { env })
    }

    /// Message for an execution attempt. Rework attempts carry the review
    /// notes accumulated so far.
    pub fn render_task(&self, record: &TaskRecord, tools: &[ToolDefinition]) -> Result<String> {
        let task = &record.task;
        let template = self.env.get_template("task")?;
        let rendered = template.render(context! {
            task_id => &task.task_id,
            objective => task.objective.trim(),
            context => (!task.context.trim().is_empty()).then(|| task.context.trim()),
            constraints => &task.constraints,
            review_notes => record.review_notes(),
            output_path => &task.output_path,
            tools => tools,
        })?;
        Ok(rendered)
    }

    pub fn render_review(
        &self,
        record: &TaskRecord,
        deliverable: &str,
        summary: Option<&str>,
    ) -> Result<String> {
        let task = &record.task;
        let (deliverable, truncated) = clip(deliverable, REVIEW_DELIVERABLE_LIMIT);
        let template = self.env.get_template("review")?;
        let rendered = template.render(context! {
            task_id => &task.task_id,
            objective => task.objective.trim(),
            success_criteria => &task.success_criteria,
            summary => summary.map(str::trim).filter(|s| !s.is_empty()),
            output_path => &task.output_path,
            deliverable => deliverable,
            deliverable_truncated => truncated,
        })?;
        Ok(rendered)
    }
}

fn clip(text: &str, limit: usize) -> (&str, bool) {
    if text.len() <= limit {
        return (text, false);
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    (&text[..cut], true)
}
