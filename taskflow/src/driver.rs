//! The driver loop behind `taskflow run`.
//!
//! The store on disk is the only authoritative state. Each cycle re-reads it,
//! so a restarted driver resumes by rescanning. One cycle:
//!
//! 1. collect finished workers and apply their outcomes (CAS from the stage
//!    the worker started in; a mismatch means an operator got there first);
//! 2. cancel workers whose task left the stage they are working in;
//! 3. start reviews for tasks in `Review` when a reviewer persona is set;
//! 4. claim ready tasks (`Pending -> Assigned`) up to the concurrency limit;
//! 5. dispatch assigned tasks (`Assigned -> InProgress`, owner recorded);
//! 6. log pending tasks that became standing-blocked.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use crate::agents::executor::execute_task;
use crate::agents::reviewer::{ReviewOutcome, review_task};
use crate::agents::{AgentEnv, AgentRun};
use crate::core::cancel::CancelToken;
use crate::core::retry::BackoffPolicy;
use crate::core::scheduler::plan;
use crate::core::stage::Stage;
use crate::core::state_update::{
    ExecutionOutcome, ReviewVerdict, after_execution, after_review, attempts_exhausted,
};
use crate::io::gateway_client::GatewayClient;
use crate::io::lock::process_alive;
use crate::io::personas::PersonaSet;
use crate::io::prompt::PromptEngine;
use crate::io::provider::ReasoningProvider;
use crate::io::run_log::{RunKind, RunMeta, write_run};
use crate::io::store::StoreError;
use crate::io::watch::TaskWatcher;
use crate::persona::Persona;
use crate::project::Project;
use crate::task::{Annotation, AnnotationKind, Completion, Owner, TaskRecord};
use crate::tools::CapabilityRegistry;

/// Upper bound on a single wait slice while workers are running.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// When `run` returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverOptions {
    /// Stop after this many cycles (`--once` is `Some(1)`).
    pub max_cycles: Option<u64>,
    /// Stop after a cycle that leaves no worker running and nothing to start.
    pub until_idle: bool,
}

/// Reason why [`Driver::run`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    MaxCycles,
    Idle,
    /// The stop token was cancelled.
    Stopped,
}

/// Summary of a driver run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverReport {
    pub cycles: u64,
    pub executions: u32,
    pub reviews: u32,
    pub stop: LoopStop,
}

/// What one cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub finished: usize,
    pub cancelled: usize,
    pub reviews_started: usize,
    pub claimed: usize,
    pub dispatched: usize,
    pub running: usize,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        self.running == 0
            && self.claimed == 0
            && self.dispatched == 0
            && self.reviews_started == 0
    }
}

/// Reasoning backend and gateway the workers use.
#[derive(Clone)]
pub struct Services {
    pub provider: Arc<dyn ReasoningProvider>,
    pub gateway: Arc<dyn GatewayClient>,
}

/// Read-only state shared with worker threads.
struct Shared {
    registry: CapabilityRegistry,
    prompts: PromptEngine,
    services: Services,
}

enum WorkerResult {
    Execution(AgentRun<ExecutionOutcome>),
    Review(AgentRun<ReviewOutcome>),
}

/// What a run log is filed under.
struct RunLabel {
    kind: RunKind,
    attempt: u32,
    persona: String,
}

struct Worker {
    label: RunLabel,
    /// Stage the task must still be in for the result to apply.
    stage: Stage,
    cancel: CancelToken,
    handle: JoinHandle<WorkerResult>,
}

pub struct Driver {
    project: Project,
    shared: Arc<Shared>,
    workers: HashMap<String, Worker>,
    done_tx: Sender<String>,
    done_rx: Receiver<String>,
    watcher: Option<TaskWatcher>,
    reported_blocked: BTreeSet<String>,
    stop: CancelToken,
    pid: u32,
    executions: u32,
    reviews: u32,
}

impl Driver {
    pub fn new(project: Project, services: Services) -> Result<Self> {
        let watcher = if project.config.scheduling.watch {
            Some(TaskWatcher::new(&project.paths.tasks_dir)?)
        } else {
            None
        };
        let registry = CapabilityRegistry::load(&project.paths.capabilities_path)?;
        let (done_tx, done_rx) = mpsc::channel();
        Ok(Self {
            shared: Arc::new(Shared {
                registry,
                prompts: PromptEngine::new()?,
                services,
            }),
            project,
            workers: HashMap::new(),
            done_tx,
            done_rx,
            watcher,
            reported_blocked: BTreeSet::new(),
            stop: CancelToken::new(),
            pid: std::process::id(),
            executions: 0,
            reviews: 0,
        })
    }

    /// Token that stops [`run`](Self::run) after the current cycle.
    pub fn stop_token(&self) -> CancelToken {
        self.stop.clone()
    }

    pub fn running(&self) -> usize {
        self.workers.len()
    }

    /// Recover, then cycle until `options` say to stop. In-flight workers are
    /// waited for and applied before returning.
    pub fn run(&mut self, options: &DriverOptions) -> Result<DriverReport> {
        self.recover()?;
        let mut cycles = 0u64;
        let stop = loop {
            if self.stop.is_cancelled() {
                break LoopStop::Stopped;
            }
            let report = self.cycle()?;
            cycles += 1;
            debug!(cycle = cycles, ?report, "cycle finished");
            if options.until_idle && report.is_idle() {
                break LoopStop::Idle;
            }
            if options.max_cycles.is_some_and(|max| cycles >= max) {
                break LoopStop::MaxCycles;
            }
            self.wait_for_work(self.project.config.poll_interval());
        };
        self.drain()?;
        info!(cycles, ?stop, "driver stopped");
        Ok(DriverReport {
            cycles,
            executions: self.executions,
            reviews: self.reviews,
            stop,
        })
    }

    /// Startup crash recovery: clear abandoned locks, then resume or fail
    /// `InProgress` tasks whose owning process is gone. `Assigned` tasks need
    /// nothing; the next cycle dispatches them.
    #[instrument(skip_all)]
    pub fn recover(&mut self) -> Result<()> {
        let cleared = self
            .project
            .store
            .clear_stale_locks(self.project.config.stale_lock_age())?;
        if !cleared.is_empty() {
            warn!(count = cleared.len(), "cleared stale task locks");
        }

        let personas = self.project.personas.load()?;
        let max_attempts = self.project.config.executor.max_execution_attempts;
        for record in self.project.store.list(Stage::InProgress)? {
            let task_id = record.task_id().to_string();
            if self.workers.contains_key(&task_id) {
                continue;
            }
            if let Some(owner) = &record.owner
                && owner.pid != self.pid
                && process_alive(owner.pid)
            {
                debug!(task_id = %task_id, pid = owner.pid, "task owned by a live process");
                continue;
            }
            if attempts_exhausted(record.execution_attempts, max_attempts) {
                let result = self.project.store.transition_with(
                    &task_id,
                    Stage::InProgress,
                    Stage::Failed,
                    |r| {
                        r.annotations.push(Annotation::new(
                            AnnotationKind::Failure,
                            format!(
                                "interrupted during attempt {} of {max_attempts}; no attempts left",
                                r.execution_attempts
                            ),
                        ));
                    },
                );
                tolerate_race(result, &task_id)?;
                warn!(task_id = %task_id, "orphaned task failed");
                continue;
            }
            let Some(persona) = personas.get(&record.task.persona).cloned() else {
                let result = self.project.store.transition_with(
                    &task_id,
                    Stage::InProgress,
                    Stage::Failed,
                    |r| {
                        r.annotations.push(Annotation::new(
                            AnnotationKind::Failure,
                            format!("persona '{}' not found on recovery", r.task.persona),
                        ));
                    },
                );
                tolerate_race(result, &task_id)?;
                continue;
            };
            let pid = self.pid;
            let result = self
                .project
                .store
                .update(&task_id, Stage::InProgress, |r| {
                    r.execution_attempts += 1;
                    r.owner = Some(Owner {
                        pid,
                        attempt: r.execution_attempts,
                        started_at: Utc::now(),
                    });
                    r.annotations.push(Annotation::new(
                        AnnotationKind::Recovery,
                        format!(
                            "resumed after interrupted attempt; starting attempt {}",
                            r.execution_attempts
                        ),
                    ));
                });
            if let Some(resumed) = tolerate_race(result, &task_id)? {
                info!(task_id = %task_id, attempt = resumed.execution_attempts, "resuming orphaned task");
                self.spawn_execution(resumed, persona)?;
            }
        }
        Ok(())
    }

    /// Run one scheduling cycle.
    #[instrument(skip_all)]
    pub fn cycle(&mut self) -> Result<CycleReport> {
        let mut report = CycleReport {
            finished: self.collect_finished()?,
            ..CycleReport::default()
        };

        let records = self.project.store.list_all()?;
        report.cancelled = self.propagate_cancellations(&records);

        let personas = self.project.personas.load()?;
        report.reviews_started = self.start_reviews(&records, &personas)?;
        report.claimed = self.claim_ready(&records, &personas)?;
        report.dispatched = self.dispatch_assigned(&personas)?;
        self.report_blocked(&records, &personas);

        report.running = self.workers.len();
        Ok(report)
    }

    fn capacity(&self) -> usize {
        self.project
            .config
            .scheduling
            .max_concurrent_tasks
            .saturating_sub(self.workers.len())
    }

    fn collect_finished(&mut self) -> Result<usize> {
        let finished: Vec<String> = self
            .workers
            .iter()
            .filter(|(_, w)| w.handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        for task_id in &finished {
            if let Some(worker) = self.workers.remove(task_id) {
                self.apply(task_id, worker)?;
            }
        }
        Ok(finished.len())
    }

    fn apply(&mut self, task_id: &str, worker: Worker) -> Result<()> {
        let Worker {
            label,
            stage,
            handle,
            ..
        } = worker;
        let result = match handle.join() {
            Ok(result) => result,
            Err(_) => {
                error!(task_id, "worker panicked");
                let result =
                    self.project
                        .store
                        .transition_with(task_id, stage, Stage::Failed, |r| {
                            r.annotations.push(Annotation::new(
                                AnnotationKind::Failure,
                                "worker panicked",
                            ));
                        });
                tolerate_race(result, task_id)?;
                return Ok(());
            }
        };

        match result {
            WorkerResult::Execution(run) => {
                self.executions += 1;
                let (outcome, reason) = match &run.outcome {
                    ExecutionOutcome::Completed { .. } => ("completed", None),
                    ExecutionOutcome::Failed { reason } => ("failed", Some(reason.clone())),
                    ExecutionOutcome::Cancelled => ("cancelled", None),
                };
                self.log_run(task_id, &label, outcome, reason, &run);
                self.apply_execution(task_id, &run.outcome)
            }
            WorkerResult::Review(run) => {
                self.reviews += 1;
                let (outcome, reason) = match &run.outcome {
                    ReviewOutcome::Verdict(ReviewVerdict::Approved { .. }) => ("approved", None),
                    ReviewOutcome::Verdict(ReviewVerdict::Rejected { notes }) => {
                        ("rejected", Some(notes.clone()))
                    }
                    ReviewOutcome::Failed { reason } => ("failed", Some(reason.clone())),
                    ReviewOutcome::Cancelled => ("cancelled", None),
                };
                self.log_run(task_id, &label, outcome, reason, &run);
                self.apply_review(task_id, &run.outcome)
            }
        }
    }

    fn apply_execution(&self, task_id: &str, outcome: &ExecutionOutcome) -> Result<()> {
        let current = match self.project.store.get(task_id) {
            Ok(record) => record,
            Err(StoreError::NotFound(_)) => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        let review_enabled = self.project.config.review.enabled;
        let Some(change) = after_execution(outcome, review_enabled, current.review_attempts)
        else {
            debug!(task_id, "attempt cancelled; nothing to apply");
            return Ok(());
        };
        let to = change.to;
        let summary = match outcome {
            ExecutionOutcome::Completed { summary } => Some(summary.clone()),
            _ => None,
        };
        let result = self
            .project
            .store
            .transition_with(task_id, Stage::InProgress, to, |r| {
                r.annotations.extend(change.annotations);
                r.review_attempts = change.review_attempts;
                if let Some(summary) = summary {
                    r.completion = Some(Completion {
                        summary,
                        completed_at: Utc::now(),
                    });
                }
            });
        if tolerate_race(result, task_id)?.is_some() {
            info!(task_id, to = %to, "execution applied");
        }
        Ok(())
    }

    fn apply_review(&self, task_id: &str, outcome: &ReviewOutcome) -> Result<()> {
        let current = match self.project.store.get(task_id) {
            Ok(record) => record,
            Err(StoreError::NotFound(_)) => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        let result = match outcome {
            ReviewOutcome::Verdict(verdict) => {
                let change = after_review(
                    verdict,
                    current.review_attempts,
                    self.project.config.review.max_review_attempts,
                );
                self.project
                    .store
                    .transition_with(task_id, Stage::Review, change.to, |r| {
                        r.annotations.extend(change.annotations);
                        r.review_attempts = change.review_attempts;
                    })
            }
            ReviewOutcome::Failed { reason } => self.project.store.transition_with(
                task_id,
                Stage::Review,
                Stage::Failed,
                |r| {
                    r.annotations
                        .push(Annotation::new(AnnotationKind::Failure, reason.clone()));
                },
            ),
            ReviewOutcome::Cancelled => return Ok(()),
        };
        if let Some(record) = tolerate_race(result, task_id)? {
            info!(task_id, to = %record.stage, "review applied");
        }
        Ok(())
    }

    fn log_run<T>(
        &self,
        task_id: &str,
        label: &RunLabel,
        outcome: &str,
        reason: Option<String>,
        run: &AgentRun<T>,
    ) {
        let ended_at = Utc::now();
        let meta = RunMeta {
            task_id: task_id.to_string(),
            kind: label.kind,
            attempt: label.attempt,
            persona: label.persona.clone(),
            outcome: outcome.to_string(),
            reason,
            rounds: run.rounds(),
            started_at: run.started_at,
            ended_at,
            duration_ms: (ended_at - run.started_at).num_milliseconds().max(0) as u64,
        };
        if let Err(err) = write_run(&self.project.paths.runs_dir, &meta, &run.transcript) {
            warn!(task_id, err = %format!("{err:#}"), "failed to write run log");
        }
    }

    /// Cancel workers whose task was moved by someone else.
    fn propagate_cancellations(&self, records: &[TaskRecord]) -> usize {
        let stages: HashMap<&str, Stage> =
            records.iter().map(|r| (r.task_id(), r.stage)).collect();
        let mut cancelled = 0;
        for (task_id, worker) in &self.workers {
            if worker.cancel.is_cancelled() {
                continue;
            }
            if stages.get(task_id.as_str()) != Some(&worker.stage) {
                info!(task_id = %task_id, "task left {}; cancelling worker", worker.stage);
                worker.cancel.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }

    fn start_reviews(&mut self, records: &[TaskRecord], personas: &PersonaSet) -> Result<usize> {
        let review = &self.project.config.review;
        if !review.enabled {
            return Ok(0);
        }
        let Some(reviewer_name) = review.reviewer_persona.clone() else {
            return Ok(0);
        };
        let Some(reviewer) = personas.get(&reviewer_name).cloned() else {
            if self.reported_blocked.insert(format!("reviewer:{reviewer_name}")) {
                warn!(persona = %reviewer_name, "reviewer persona not found; reviews wait for an operator");
            }
            return Ok(0);
        };
        let mut started = 0;
        for record in records.iter().filter(|r| r.stage == Stage::Review) {
            if self.capacity() == 0 {
                break;
            }
            if self.workers.contains_key(record.task_id()) {
                continue;
            }
            self.spawn_review(record.clone(), reviewer.clone())?;
            started += 1;
        }
        Ok(started)
    }

    fn claim_ready(&mut self, records: &[TaskRecord], personas: &PersonaSet) -> Result<usize> {
        let pending_assigned = records
            .iter()
            .filter(|r| r.stage == Stage::Assigned && !self.workers.contains_key(r.task_id()))
            .count();
        let mut budget = self.capacity().saturating_sub(pending_assigned);
        let plan = plan(records, |name| personas.contains(name));
        let mut claimed = 0;
        for record in plan.ready {
            if budget == 0 {
                break;
            }
            let task_id = record.task_id();
            let result = self
                .project
                .store
                .transition(task_id, Stage::Pending, Stage::Assigned);
            if tolerate_race(result, task_id)?.is_some() {
                info!(task_id, priority = record.task.effective_priority(), "task claimed");
                claimed += 1;
                budget -= 1;
            }
        }
        Ok(claimed)
    }

    fn dispatch_assigned(&mut self, personas: &PersonaSet) -> Result<usize> {
        let max_attempts = self.project.config.executor.max_execution_attempts;
        let mut dispatched = 0;
        // Re-read: claims from this cycle and rework from reviews are included.
        for record in self.project.store.list(Stage::Assigned)? {
            if self.capacity() == 0 {
                break;
            }
            let task_id = record.task_id().to_string();
            if self.workers.contains_key(&task_id) {
                continue;
            }
            if attempts_exhausted(record.execution_attempts, max_attempts) {
                let result = self.project.store.transition_with(
                    &task_id,
                    Stage::Assigned,
                    Stage::Failed,
                    |r| {
                        r.annotations.push(Annotation::new(
                            AnnotationKind::Failure,
                            format!("execution attempts exhausted ({max_attempts})"),
                        ));
                    },
                );
                tolerate_race(result, &task_id)?;
                continue;
            }
            let Some(persona) = personas.get(&record.task.persona).cloned() else {
                let result = self.project.store.transition_with(
                    &task_id,
                    Stage::Assigned,
                    Stage::Failed,
                    |r| {
                        r.annotations.push(Annotation::new(
                            AnnotationKind::Failure,
                            format!("persona '{}' not found", r.task.persona),
                        ));
                    },
                );
                tolerate_race(result, &task_id)?;
                continue;
            };
            let pid = self.pid;
            let result = self.project.store.transition_with(
                &task_id,
                Stage::Assigned,
                Stage::InProgress,
                |r| {
                    r.execution_attempts += 1;
                    r.owner = Some(Owner {
                        pid,
                        attempt: r.execution_attempts,
                        started_at: Utc::now(),
                    });
                },
            );
            if let Some(started) = tolerate_race(result, &task_id)? {
                info!(task_id = %task_id, attempt = started.execution_attempts, "task dispatched");
                self.spawn_execution(started, persona)?;
                dispatched += 1;
            }
        }
        Ok(dispatched)
    }

    /// Warn once per task when it becomes standing-blocked.
    fn report_blocked(&mut self, records: &[TaskRecord], personas: &PersonaSet) {
        let plan = plan(records, |name| personas.contains(name));
        let mut standing = BTreeSet::new();
        for blocked in plan.blocked.iter().filter(|b| b.reason.is_standing()) {
            if !self.reported_blocked.contains(&blocked.task_id) {
                warn!(task_id = %blocked.task_id, reason = %blocked.reason.describe(), "task is blocked");
            }
            standing.insert(blocked.task_id.clone());
        }
        self.reported_blocked
            .retain(|key| key.starts_with("reviewer:") || standing.contains(key));
        self.reported_blocked.extend(standing);
    }

    fn spawn_execution(&mut self, record: TaskRecord, persona: Persona) -> Result<()> {
        let attempt = record.execution_attempts;
        let persona_name = persona.persona_name.clone();
        let max_tool_rounds = self.project.config.executor.max_tool_rounds;
        let backoff = self.project.config.backoff_policy();
        let label = RunLabel {
            kind: RunKind::Execution,
            attempt,
            persona: persona_name,
        };
        self.spawn(
            record,
            label,
            Stage::InProgress,
            move |shared, record, cancel| {
                let env = shared.env(backoff, max_tool_rounds);
                WorkerResult::Execution(execute_task(&env, &record, &persona, &cancel))
            },
        )
    }

    fn spawn_review(&mut self, record: TaskRecord, reviewer: Persona) -> Result<()> {
        let attempt = record.review_attempts + 1;
        let persona_name = reviewer.persona_name.clone();
        let max_tool_rounds = self.project.config.executor.max_tool_rounds;
        let backoff = self.project.config.backoff_policy();
        info!(task_id = %record.task_id(), attempt, "review started");
        let label = RunLabel {
            kind: RunKind::Review,
            attempt,
            persona: persona_name,
        };
        self.spawn(
            record,
            label,
            Stage::Review,
            move |shared, record, cancel| {
                let env = shared.env(backoff, max_tool_rounds);
                WorkerResult::Review(review_task(&env, &record, &reviewer, &cancel))
            },
        )
    }

    fn spawn(
        &mut self,
        record: TaskRecord,
        label: RunLabel,
        stage: Stage,
        work: impl FnOnce(&Shared, TaskRecord, CancelToken) -> WorkerResult + Send + 'static,
    ) -> Result<()> {
        let task_id = record.task_id().to_string();
        let cancel = CancelToken::new();
        let shared = Arc::clone(&self.shared);
        let done = self.done_tx.clone();
        let worker_cancel = cancel.clone();
        let worker_id = task_id.clone();
        let handle = thread::Builder::new()
            .name(format!("task-{task_id}"))
            .spawn(move || {
                let result = work(&shared, record, worker_cancel);
                let _ = done.send(worker_id);
                result
            })
            .with_context(|| format!("spawn worker for task '{task_id}'"))?;
        self.workers.insert(
            task_id,
            Worker {
                label,
                stage,
                cancel,
                handle,
            },
        );
        Ok(())
    }

    /// Sleep until a worker finishes, the tasks directory changes, the stop
    /// token fires, or `timeout` elapses.
    fn wait_for_work(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        loop {
            if self.stop.is_cancelled() {
                return;
            }
            if self.done_rx.try_recv().is_ok() {
                while self.done_rx.try_recv().is_ok() {}
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            let slice = (deadline - now).min(WAIT_SLICE);
            match &self.watcher {
                Some(watcher) => {
                    if watcher.wait(slice) {
                        return;
                    }
                }
                None => thread::sleep(slice),
            }
        }
    }

    /// Wait for every running worker and apply its result.
    fn drain(&mut self) -> Result<()> {
        while !self.workers.is_empty() {
            if self.stop.is_cancelled() {
                for worker in self.workers.values() {
                    worker.cancel.cancel();
                }
            }
            // Operator moves (e.g. `taskflow cancel`) still reach running workers.
            match self.project.store.list_all() {
                Ok(records) => {
                    self.propagate_cancellations(&records);
                }
                Err(err) => warn!(err = %err, "rescan during drain failed"),
            }
            let _ = self.done_rx.recv_timeout(WAIT_SLICE);
            self.collect_finished()?;
        }
        Ok(())
    }
}

impl Shared {
    fn env(&self, backoff: BackoffPolicy, max_tool_rounds: u32) -> AgentEnv<'_> {
        AgentEnv {
            registry: &self.registry,
            provider: self.services.provider.as_ref(),
            gateway: self.services.gateway.as_ref(),
            prompts: &self.prompts,
            backoff,
            max_tool_rounds,
        }
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        for worker in self.workers.values() {
            worker.cancel.cancel();
        }
    }
}

/// A stage mismatch means another actor moved the task first; that is not an
/// error for the driver.
fn tolerate_race(
    result: Result<TaskRecord, StoreError>,
    task_id: &str,
) -> Result<Option<TaskRecord>> {
    match result {
        Ok(record) => Ok(Some(record)),
        Err(StoreError::StageMismatch {
            expected, actual, ..
        }) => {
            debug!(task_id, %expected, %actual, "lost race for task");
            Ok(None)
        }
        Err(StoreError::LockTimeout(_)) => {
            warn!(task_id, "task lock busy; retrying next cycle");
            Ok(None)
        }
        Err(err) => Err(anyhow!(err).context(format!("update task '{task_id}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::OrchestratorConfig;
    use crate::io::init::initial_config;
    use crate::test_support::{ScriptedProvider, TestWorkspace, complete, persona, task};
    use std::fs;

    fn config(review: bool) -> OrchestratorConfig {
        let mut cfg = initial_config();
        cfg.scheduling.poll_interval_ms = 10;
        cfg.review.enabled = review;
        cfg.backend.max_retries = 0;
        cfg
    }

    fn driver(ws: &TestWorkspace, provider: Arc<ScriptedProvider>) -> Driver {
        ws.write_persona(&persona("writer", &["write_file", "read_file"]));
        let project = Project::open(ws.root()).expect("open");
        Driver::new(
            project,
            Services {
                provider,
                gateway: Arc::new(ws.gateway.clone()),
            },
        )
        .expect("driver")
    }

    fn until_idle() -> DriverOptions {
        DriverOptions {
            max_cycles: Some(50),
            until_idle: true,
        }
    }

    #[test]
    fn dependency_chain_runs_in_order() {
        let ws = TestWorkspace::with_config(config(false));
        let store = ws.store();
        let mut second = task("b");
        second.dependencies = vec!["a.json".to_string()];
        store.enqueue(second).expect("enqueue b");
        store.enqueue(task("a")).expect("enqueue a");

        let provider = Arc::new(ScriptedProvider::new([complete("A"), complete("B")]));
        let mut driver = driver(&ws, Arc::clone(&provider));
        let report = driver.run(&until_idle()).expect("run");

        assert_eq!(report.stop, LoopStop::Idle);
        assert_eq!(report.executions, 2);
        assert_eq!(store.get("a").expect("a").stage, Stage::Done);
        assert_eq!(store.get("b").expect("b").stage, Stage::Done);
        let order: Vec<_> = provider.requests().into_iter().map(|r| r.task_id).collect();
        assert_eq!(order, vec!["a", "b"]);
        assert!(ws.paths().runs_dir.join("a/1/transcript.json").is_file());
    }

    #[test]
    fn failed_execution_records_reason() {
        let ws = TestWorkspace::with_config(config(false));
        ws.store().enqueue(task("t1")).expect("enqueue");
        let provider = Arc::new(ScriptedProvider::default());
        let mut driver = driver(&ws, provider);
        driver.run(&until_idle()).expect("run");

        let record = ws.store().get("t1").expect("get");
        assert_eq!(record.stage, Stage::Failed);
        assert!(record.failure_reason().is_some_and(|r| r.contains("script exhausted")));
        assert_eq!(record.execution_attempts, 1);
    }

    #[test]
    fn review_enabled_without_reviewer_waits_in_review() {
        let ws = TestWorkspace::with_config(config(true));
        ws.store().enqueue(task("t1")).expect("enqueue");
        let provider = Arc::new(ScriptedProvider::new([complete("draft")]));
        let mut driver = driver(&ws, provider);
        driver.run(&until_idle()).expect("run");

        let record = ws.store().get("t1").expect("get");
        assert_eq!(record.stage, Stage::Review);
        assert_eq!(
            record.completion.map(|c| c.summary),
            Some("done".to_string())
        );
    }

    #[test]
    fn reviewer_rejection_triggers_rework() {
        let mut cfg = config(true);
        cfg.review.reviewer_persona = Some("critic".to_string());
        let ws = TestWorkspace::with_config(cfg);
        ws.write_persona(&persona("critic", &[]));
        ws.store().enqueue(task("t1")).expect("enqueue");

        let provider = Arc::new(ScriptedProvider::new([
            complete("first draft"),
            Ok(crate::core::types::AgentDecision::Fail {
                reason: "needs a conclusion".to_string(),
            }),
            complete("second draft with conclusion"),
            complete(""),
        ]));
        let mut driver = driver(&ws, Arc::clone(&provider));
        let report = driver.run(&until_idle()).expect("run");

        let record = ws.store().get("t1").expect("get");
        assert_eq!(record.stage, Stage::Done);
        assert_eq!(record.review_attempts, 1);
        assert_eq!(record.execution_attempts, 2);
        assert_eq!(report.reviews, 2);
        // The rework attempt sees the reviewer's notes.
        assert!(provider.requests()[2].message.contains("needs a conclusion"));
        assert_eq!(
            fs::read_to_string(ws.workspace_root().join("out/t1.md")).expect("read"),
            "second draft with conclusion"
        );
    }

    #[test]
    fn orphaned_task_is_resumed_and_counted() {
        let ws = TestWorkspace::with_config(config(false));
        let store = ws.store();
        store.enqueue(task("t1")).expect("enqueue");
        store
            .transition("t1", Stage::Pending, Stage::Assigned)
            .expect("claim");
        store
            .transition_with("t1", Stage::Assigned, Stage::InProgress, |r| {
                r.execution_attempts = 1;
                r.owner = Some(Owner {
                    pid: 999_999_999,
                    attempt: 1,
                    started_at: Utc::now(),
                });
            })
            .expect("start");

        let provider = Arc::new(ScriptedProvider::new([complete("recovered")]));
        let mut driver = driver(&ws, provider);
        driver.run(&until_idle()).expect("run");

        let record = store.get("t1").expect("get");
        assert_eq!(record.stage, Stage::Done);
        assert_eq!(record.execution_attempts, 2);
        assert!(record
            .annotations
            .iter()
            .any(|a| a.kind == AnnotationKind::Recovery));
    }

    #[test]
    fn orphan_with_no_attempts_left_fails() {
        let mut cfg = config(false);
        cfg.executor.max_execution_attempts = 1;
        let ws = TestWorkspace::with_config(cfg);
        let store = ws.store();
        store.enqueue(task("t1")).expect("enqueue");
        store
            .transition("t1", Stage::Pending, Stage::Assigned)
            .expect("claim");
        store
            .transition_with("t1", Stage::Assigned, Stage::InProgress, |r| {
                r.execution_attempts = 1;
            })
            .expect("start");

        let mut driver = driver(&ws, Arc::new(ScriptedProvider::default()));
        driver.recover().expect("recover");
        assert_eq!(store.get("t1").expect("get").stage, Stage::Failed);
    }

    #[test]
    fn concurrency_limit_is_respected() {
        let mut cfg = config(false);
        cfg.scheduling.max_concurrent_tasks = 1;
        let ws = TestWorkspace::with_config(cfg);
        let store = ws.store();
        store.enqueue(task("a")).expect("enqueue");
        store.enqueue(task("b")).expect("enqueue");

        let provider = Arc::new(ScriptedProvider::new([complete("A"), complete("B")]));
        let mut driver = driver(&ws, provider);
        let report = driver.cycle().expect("cycle");
        assert_eq!(report.claimed, 1);
        assert_eq!(report.dispatched, 1);
        assert_eq!(store.list(Stage::Pending).expect("list").len(), 1);
        driver.drain().expect("drain");
    }

    /// A provider that blocks until cancelled.
    struct Blocking;

    impl ReasoningProvider for Blocking {
        fn invoke(
            &self,
            _request: &crate::io::provider::ProviderRequest,
            cancel: &CancelToken,
        ) -> Result<crate::core::types::AgentDecision, crate::io::provider::ProviderError> {
            while !cancel.is_cancelled() {
                thread::sleep(Duration::from_millis(5));
            }
            Err(crate::io::provider::ProviderError::Cancelled)
        }
    }

    fn blocking_driver(ws: &TestWorkspace) -> Driver {
        ws.write_persona(&persona("writer", &[]));
        let project = Project::open(ws.root()).expect("open");
        Driver::new(
            project,
            Services {
                provider: Arc::new(Blocking),
                gateway: Arc::new(ws.gateway.clone()),
            },
        )
        .expect("driver")
    }

    #[test]
    fn external_cancel_stops_worker() {
        let ws = TestWorkspace::with_config(config(false));
        let store = ws.store();
        store.enqueue(task("t1")).expect("enqueue");
        let mut driver = blocking_driver(&ws);

        driver.cycle().expect("cycle");
        assert_eq!(driver.running(), 1);
        crate::operator::cancel_task(&store, "t1", "operator stop").expect("cancel");
        let report = driver.cycle().expect("cycle");
        assert_eq!(report.cancelled, 1);
        driver.drain().expect("drain");

        let record = store.get("t1").expect("get");
        assert_eq!(record.stage, Stage::Failed);
        assert_eq!(record.failure_reason(), Some("cancelled: operator stop"));
    }

    /// `--once` stops cycling after the first cycle; a cancel issued while it
    /// waits for the started worker still stops that worker.
    #[test]
    fn cancel_during_drain_stops_worker() {
        let ws = TestWorkspace::with_config(config(false));
        let store = ws.store();
        store.enqueue(task("t1")).expect("enqueue");
        let mut driver = blocking_driver(&ws);

        let operator = {
            let store = ws.store();
            thread::spawn(move || {
                while store.get("t1").expect("get").stage != Stage::InProgress {
                    thread::sleep(Duration::from_millis(5));
                }
                crate::operator::cancel_task(&store, "t1", "no longer needed").expect("cancel");
            })
        };
        let report = driver
            .run(&DriverOptions {
                max_cycles: Some(1),
                until_idle: false,
            })
            .expect("run");
        operator.join().expect("operator");

        assert_eq!(report.stop, LoopStop::MaxCycles);
        assert_eq!(driver.running(), 0);
        let record = store.get("t1").expect("get");
        assert_eq!(record.stage, Stage::Failed);
        assert_eq!(record.failure_reason(), Some("cancelled: no longer needed"));
    }
}
