//! Executor agent: performs a task and writes its deliverable.

use tracing::{info, warn};

use super::{AgentEnv, AgentRun, LoopEnd, run_agent};
use crate::core::cancel::CancelToken;
use crate::core::state_update::ExecutionOutcome;
use crate::persona::Persona;
use crate::task::TaskRecord;
use crate::tools::ToolError;
use crate::tools::file::{quote, run_line, write_via_gateway};

/// Run one execution attempt for `record` as `persona`.
///
/// Never returns an error: anything that stops the attempt becomes
/// [`ExecutionOutcome::Failed`] with a readable reason.
pub fn execute_task(
    env: &AgentEnv<'_>,
    record: &TaskRecord,
    persona: &Persona,
    cancel: &CancelToken,
) -> AgentRun<ExecutionOutcome> {
    let task = &record.task;
    let tools = env.registry.definitions_for(persona);
    let message = match env.prompts.render_task(record, &tools) {
        Ok(message) => message,
        Err(err) => {
            return AgentRun {
                outcome: ExecutionOutcome::Failed {
                    reason: format!("render task message: {err:#}"),
                },
                transcript: Vec::new(),
                started_at: chrono::Utc::now(),
            };
        }
    };

    let run = run_agent(env, task, persona, message, cancel);
    run.map(|end| match end {
        LoopEnd::Complete {
            deliverable,
            summary,
        } => match deliver(env, &task.output_path, &deliverable, cancel) {
            Ok(()) => {
                info!(task_id = %task.task_id, output_path = %task.output_path, "deliverable written");
                ExecutionOutcome::Completed { summary }
            }
            Err(_) if cancel.is_cancelled() => ExecutionOutcome::Cancelled,
            Err(err) => {
                warn!(task_id = %task.task_id, err = %err, "deliverable not written");
                ExecutionOutcome::Failed {
                    reason: format!("write deliverable {}: {err}", task.output_path),
                }
            }
        },
        LoopEnd::Fail { reason } | LoopEnd::Aborted { reason } => {
            ExecutionOutcome::Failed { reason }
        }
        LoopEnd::Cancelled => ExecutionOutcome::Cancelled,
    })
}

/// Write the deliverable through the gateway. An empty deliverable means the
/// agent wrote `output_path` itself, which must then exist as a file.
fn deliver(
    env: &AgentEnv<'_>,
    output_path: &str,
    deliverable: &str,
    cancel: &CancelToken,
) -> Result<(), ToolError> {
    if !deliverable.is_empty() {
        write_via_gateway(env.gateway, output_path, deliverable, false, cancel)?;
        return Ok(());
    }
    let stat = run_line(
        env.gateway,
        &format!("Test-Path -Path {}", quote(output_path)),
        cancel,
    )?;
    if stat.trim_start().starts_with("file") {
        Ok(())
    } else {
        Err(ToolError::Failed(
            "agent completed without a deliverable and the output file does not exist"
                .to_string(),
        ))
    }
}
