//! Reasoning provider abstraction.
//!
//! The [`ReasoningProvider`] trait decouples the agent loop from whatever
//! decides the next step. [`CommandProvider`] runs an external command that
//! reads a [`ProviderRequest`] as JSON on stdin and prints an
//! [`AgentDecision`] as JSON on stdout. Tests use scripted providers.

use std::path::PathBuf;
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::cancel::CancelToken;
use crate::core::retry::BackoffPolicy;
use crate::core::types::{AgentDecision, ToolDefinition, TranscriptEntry};
use crate::io::config::BackendConfig;
use crate::io::process::run_command;
use crate::persona::ModelConfig;

/// Everything the provider sees for one round.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderRequest {
    pub task_id: String,
    pub round: u32,
    pub system_prompt: String,
    /// Rendered task message (objective, context, constraints, review notes).
    pub message: String,
    pub objective: String,
    pub context: String,
    pub constraints: Vec<String>,
    pub model: ModelConfig,
    /// Only the capabilities the persona is authorized to call.
    pub tools: Vec<ToolDefinition>,
    pub transcript: Vec<TranscriptEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Worth retrying: spawn failure, timeout, non-zero exit.
    #[error("provider unavailable: {0}")]
    Transient(String),
    /// Retrying will not help: malformed decision, misconfiguration.
    #[error("provider error: {0}")]
    Fatal(String),
    #[error("provider call cancelled")]
    Cancelled,
}

/// Decides the next step of an agent loop.
pub trait ReasoningProvider: Send + Sync {
    fn invoke(
        &self,
        request: &ProviderRequest,
        cancel: &CancelToken,
    ) -> std::result::Result<AgentDecision, ProviderError>;
}

/// Provider backed by an external command.
#[derive(Debug, Clone)]
pub struct CommandProvider {
    program: String,
    args: Vec<String>,
    workdir: Option<PathBuf>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandProvider {
    pub fn from_config(config: &BackendConfig, workdir: Option<PathBuf>) -> Result<Self> {
        let (program, args) = config
            .command
            .split_first()
            .ok_or_else(|| anyhow!("backend.command is not configured"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            workdir,
            timeout: Duration::from_secs(config.timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
        })
    }
}

impl ReasoningProvider for CommandProvider {
    #[instrument(skip_all, fields(task_id = %request.task_id, round = request.round))]
    fn invoke(
        &self,
        request: &ProviderRequest,
        cancel: &CancelToken,
    ) -> std::result::Result<AgentDecision, ProviderError> {
        let input = serde_json::to_vec(request)
            .map_err(|err| ProviderError::Fatal(format!("serialize request: {err}")))?;
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }

        let output = run_command(cmd, Some(input), self.timeout, self.output_limit_bytes, cancel)
            .map_err(|err| ProviderError::Transient(format!("{err:#}")))?;
        if output.cancelled {
            return Err(ProviderError::Cancelled);
        }
        if output.timed_out {
            return Err(ProviderError::Transient(format!(
                "timed out after {}s",
                self.timeout.as_secs()
            )));
        }
        if !output.status.success() {
            return Err(ProviderError::Transient(format!(
                "exited with status {:?}: {}",
                output.status.code(),
                output.stderr_lossy("provider").trim()
            )));
        }
        if output.stdout_truncated > 0 {
            return Err(ProviderError::Fatal(format!(
                "decision exceeded {} bytes",
                self.output_limit_bytes
            )));
        }
        parse_decision(&output.stdout_lossy())
    }
}

/// Parse a decision from provider stdout: the whole output, or failing that
/// its last non-empty line (for providers that log before answering).
pub fn parse_decision(stdout: &str) -> std::result::Result<AgentDecision, ProviderError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(ProviderError::Fatal("empty decision".to_string()));
    }
    match serde_json::from_str(trimmed) {
        Ok(decision) => Ok(decision),
        Err(whole_err) => trimmed
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .and_then(|line| serde_json::from_str(line.trim()).ok())
            .ok_or_else(|| ProviderError::Fatal(format!("malformed decision: {whole_err}"))),
    }
}

/// Invoke with bounded retries on transient errors.
///
/// Sleeps between attempts follow `policy` with random jitter and are cut
/// short by cancellation.
pub fn invoke_with_retry(
    provider: &dyn ReasoningProvider,
    request: &ProviderRequest,
    policy: &BackoffPolicy,
    cancel: &CancelToken,
) -> std::result::Result<AgentDecision, ProviderError> {
    let mut retry = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        match provider.invoke(request, cancel) {
            Ok(decision) => {
                debug!(decision = decision.kind(), "provider decided");
                return Ok(decision);
            }
            Err(ProviderError::Transient(message)) if retry < policy.max_retries => {
                let delay = policy.delay(retry, rand::thread_rng().r#gen::<f64>());
                warn!(
                    retry = retry + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    err = %message,
                    "provider call failed, retrying"
                );
                if !sleep_unless_cancelled(delay, cancel) {
                    return Err(ProviderError::Cancelled);
                }
                retry += 1;
            }
            Err(ProviderError::Transient(message)) => {
                info!(attempts = retry + 1, "provider retries exhausted");
                return Err(ProviderError::Transient(format!(
                    "{message} (after {} attempts)",
                    retry + 1
                )));
            }
            Err(err) => return Err(err),
        }
    }
}

/// Returns `false` if cancelled before `duration` elapsed.
pub fn sleep_unless_cancelled(duration: Duration, cancel: &CancelToken) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(20)));
    }
}
