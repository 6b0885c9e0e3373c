//! Selection helpers for `taskflow select` and `taskflow blocked`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::scheduler::{BlockedTask, plan};
use crate::core::stage::Stage;
use crate::io::personas::PersonaSet;
use crate::io::store::TaskStore;
use crate::task::TaskRecord;

/// Structured selection outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectOutcome {
    /// Nothing is pending.
    Empty,
    /// The task the driver would claim next.
    Ready(SelectedTask),
    /// Tasks are pending but none can be assigned.
    Blocked(Vec<BlockedTask>),
}

/// Minimal selected task metadata for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectedTask {
    pub task_id: String,
    pub persona: String,
    pub priority: i64,
    pub timestamp: DateTime<Utc>,
}

/// Select the next task from a snapshot of records.
pub fn select_from_records(records: &[TaskRecord], personas: &PersonaSet) -> SelectOutcome {
    let plan = plan(records, |name| personas.contains(name));
    if let Some(next) = plan.ready.first() {
        return SelectOutcome::Ready(SelectedTask {
            task_id: next.task.task_id.clone(),
            persona: next.task.persona.clone(),
            priority: next.task.effective_priority(),
            timestamp: next.task.timestamp,
        });
    }
    if plan.blocked.is_empty() {
        SelectOutcome::Empty
    } else {
        SelectOutcome::Blocked(plan.blocked)
    }
}

/// Load the store and select the next task without claiming it.
pub fn select_from_store(store: &TaskStore, personas: &PersonaSet) -> Result<SelectOutcome> {
    let records = store.list_all()?;
    Ok(select_from_records(&records, personas))
}

/// Every pending task that cannot be assigned right now.
pub fn blocked_tasks(store: &TaskStore, personas: &PersonaSet) -> Result<Vec<BlockedTask>> {
    let records = store.list_all()?;
    Ok(plan(&records, |name| personas.contains(name)).blocked)
}

/// Count of records per stage, in lifecycle order.
pub fn stage_counts(records: &[TaskRecord]) -> Vec<(Stage, usize)> {
    Stage::ALL
        .iter()
        .map(|stage| (*stage, records.iter().filter(|r| r.stage == *stage).count()))
        .collect()
}
