//! Dependency gating and priority ordering over a snapshot of task records.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use crate::core::stage::Stage;
use crate::task::TaskRecord;

/// Why a pending task cannot be assigned yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BlockReason {
    /// Some dependency has `Failed`; the task can never run.
    FailedDependency { failed: Vec<String> },
    /// Some dependency does not exist in the store.
    MissingDependency { missing: Vec<String> },
    /// The referenced persona does not resolve.
    UnknownPersona { persona: String },
    /// The task waits on itself through pending dependencies.
    DependencyCycle { cycle: Vec<String> },
    /// A pending dependency is itself stuck (standing-blocked or on a cycle).
    BlockedDependency { blocked: Vec<String> },
    /// All dependencies exist; some are not `Done` yet.
    Waiting { pending: Vec<String> },
}

impl BlockReason {
    /// Standing blocks will not clear on their own and need operator attention.
    pub fn is_standing(&self) -> bool {
        !matches!(self, Self::Waiting { .. })
    }

    pub fn describe(&self) -> String {
        match self {
            Self::FailedDependency { failed } => {
                format!("dependency failed: {}", failed.join(", "))
            }
            Self::MissingDependency { missing } => {
                format!("dependency not found: {}", missing.join(", "))
            }
            Self::UnknownPersona { persona } => format!("persona '{persona}' not found"),
            Self::DependencyCycle { cycle } => format!("dependency cycle: {}", cycle.join(" -> ")),
            Self::BlockedDependency { blocked } => {
                format!("dependency blocked: {}", blocked.join(", "))
            }
            Self::Waiting { pending } => format!("waiting on: {}", pending.join(", ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedTask {
    pub task_id: String,
    #[serde(flatten)]
    pub reason: BlockReason,
}

/// Partition of the `Pending` stage.
#[derive(Debug)]
pub struct Plan<'a> {
    /// Selectable tasks, most urgent first.
    pub ready: Vec<&'a TaskRecord>,
    /// Tasks held back, ordered by task id.
    pub blocked: Vec<BlockedTask>,
}

/// Dependencies may name a task id or its record file (`<id>.json`).
pub fn dependency_key(dependency: &str) -> &str {
    let trimmed = dependency.trim();
    trimmed.strip_suffix(".json").unwrap_or(trimmed)
}

/// Partition pending records into ready and blocked.
///
/// Ready order is `(priority, timestamp, task_id)` ascending, so equal inputs
/// always produce the same order. `persona_exists` lets the caller hold back
/// tasks whose persona cannot be resolved at assignment time.
///
/// A wait that can never end (a dependency cycle, or a pending dependency
/// that is itself stuck) is reported as a standing block, not `Waiting`.
pub fn plan<'a>(records: &'a [TaskRecord], persona_exists: impl Fn(&str) -> bool) -> Plan<'a> {
    let stages: HashMap<&str, Stage> = records
        .iter()
        .map(|r| (r.task_id(), r.stage))
        .collect();
    let pending: Vec<&TaskRecord> = records
        .iter()
        .filter(|r| r.stage == Stage::Pending)
        .collect();
    let direct: HashMap<&str, Option<BlockReason>> = pending
        .iter()
        .map(|&r| (r.task_id(), block_reason(r, &stages, &persona_exists)))
        .collect();
    let graph = WaitGraph::new(&pending);
    let mut stuck = HashMap::new();

    let mut ready = Vec::new();
    let mut blocked = Vec::new();
    for record in pending {
        let reason = match direct.get(record.task_id()).cloned().flatten() {
            Some(BlockReason::Waiting { pending }) => {
                Some(graph.refine(record.task_id(), pending, &direct, &mut stuck))
            }
            other => other,
        };
        match reason {
            Some(reason) => blocked.push(BlockedTask {
                task_id: record.task_id().to_string(),
                reason,
            }),
            None => ready.push(record),
        }
    }

    ready.sort_by(|a, b| {
        (a.task.effective_priority(), a.task.timestamp, a.task_id()).cmp(&(
            b.task.effective_priority(),
            b.task.timestamp,
            b.task_id(),
        ))
    });
    blocked.sort_by(|a, b| a.task_id.cmp(&b.task_id));
    Plan { ready, blocked }
}

/// The single most urgent ready task, or `None` when nothing qualifies.
pub fn select_next(
    records: &[TaskRecord],
    persona_exists: impl Fn(&str) -> bool,
) -> Option<&TaskRecord> {
    plan(records, persona_exists).ready.into_iter().next()
}

/// Edges between pending tasks, plus the cycles among them.
struct WaitGraph<'a> {
    edges: BTreeMap<&'a str, Vec<&'a str>>,
    cycles: HashMap<&'a str, Vec<String>>,
}

impl<'a> WaitGraph<'a> {
    fn new(pending: &[&'a TaskRecord]) -> Self {
        let ids: HashSet<&str> = pending.iter().map(|r| r.task_id()).collect();
        let mut edges = BTreeMap::new();
        for &record in pending {
            let deps: Vec<&'a str> = record
                .task
                .dependencies
                .iter()
                .map(|d| dependency_key(d))
                .filter(|key| ids.contains(key))
                .collect();
            edges.insert(record.task_id(), deps);
        }
        let mut graph = Self {
            edges,
            cycles: HashMap::new(),
        };
        let mut stack = Vec::new();
        let mut finished = HashSet::new();
        let roots: Vec<&'a str> = graph.edges.keys().copied().collect();
        for root in roots {
            graph.visit(root, &mut stack, &mut finished);
        }
        graph
    }

    // Depth-first; an edge back onto the stack closes a cycle.
    fn visit(&mut self, id: &'a str, stack: &mut Vec<&'a str>, finished: &mut HashSet<&'a str>) {
        if finished.contains(id) {
            return;
        }
        if let Some(start) = stack.iter().position(|s| *s == id) {
            let mut cycle: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
            cycle.push(id.to_string());
            for member in &stack[start..] {
                self.cycles.entry(*member).or_insert_with(|| cycle.clone());
            }
            return;
        }
        stack.push(id);
        let deps = self.edges.get(id).cloned().unwrap_or_default();
        for dep in deps {
            self.visit(dep, stack, finished);
        }
        stack.pop();
        finished.insert(id);
    }

    /// Narrow a direct `Waiting` verdict for `id`.
    fn refine(
        &self,
        id: &'a str,
        pending: Vec<String>,
        direct: &HashMap<&'a str, Option<BlockReason>>,
        stuck: &mut HashMap<&'a str, bool>,
    ) -> BlockReason {
        if let Some(cycle) = self.cycles.get(id) {
            return BlockReason::DependencyCycle {
                cycle: cycle.clone(),
            };
        }
        let blocked: Vec<String> = self
            .edges
            .get(id)
            .into_iter()
            .flatten()
            .copied()
            .filter(|&dep| self.is_stuck(dep, direct, stuck))
            .map(|dep| dep.to_string())
            .collect();
        if blocked.is_empty() {
            BlockReason::Waiting { pending }
        } else {
            BlockReason::BlockedDependency { blocked }
        }
    }

    /// Whether pending task `id` can never become ready on its own.
    fn is_stuck(
        &self,
        id: &'a str,
        direct: &HashMap<&'a str, Option<BlockReason>>,
        memo: &mut HashMap<&'a str, bool>,
    ) -> bool {
        if let Some(known) = memo.get(id) {
            return *known;
        }
        memo.insert(id, false);
        let stuck = self.cycles.contains_key(id)
            || match direct.get(id) {
                Some(Some(BlockReason::Waiting { .. })) => self
                    .edges
                    .get(id)
                    .is_some_and(|deps| deps.iter().any(|&dep| self.is_stuck(dep, direct, memo))),
                Some(Some(reason)) => reason.is_standing(),
                _ => false,
            };
        memo.insert(id, stuck);
        stuck
    }
}

fn block_reason(
    record: &TaskRecord,
    stages: &HashMap<&str, Stage>,
    persona_exists: &impl Fn(&str) -> bool,
) -> Option<BlockReason> {
    let mut failed = Vec::new();
    let mut missing = Vec::new();
    let mut pending = Vec::new();
    for dependency in &record.task.dependencies {
        let key = dependency_key(dependency);
        match stages.get(key) {
            Some(Stage::Done) => {}
            Some(Stage::Failed) => failed.push(key.to_string()),
            Some(_) => pending.push(key.to_string()),
            None => missing.push(key.to_string()),
        }
    }
    if !failed.is_empty() {
        return Some(BlockReason::FailedDependency { failed });
    }
    if !missing.is_empty() {
        return Some(BlockReason::MissingDependency { missing });
    }
    if !pending.is_empty() {
        return Some(BlockReason::Waiting { pending });
    }
    if !persona_exists(&record.task.persona) {
        return Some(BlockReason::UnknownPersona {
            persona: record.task.persona.clone(),
        });
    }
    None
}
