//! Orchestrator configuration stored under `.taskflow/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::retry::BackoffPolicy;

/// Orchestrator configuration (TOML).
///
/// Intended to be edited by humans. Missing fields default to the values in
/// the `Default` impls below.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Workspace-relative directories deliverables may be written to.
    /// Empty means anywhere inside the gateway workspace.
    pub authorized_output_roots: Vec<String>,
    pub scheduling: SchedulingConfig,
    pub review: ReviewConfig,
    pub executor: ExecutorConfig,
    pub backend: BackendConfig,
    pub gateway: GatewaySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulingConfig {
    pub poll_interval_ms: u64,
    /// Wake up on file-system notifications for the tasks directory.
    pub watch: bool,
    pub max_concurrent_tasks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReviewConfig {
    /// Route completed tasks through `Review` instead of straight to `Done`.
    pub enabled: bool,
    /// Persona used for automatic review. `None` waits for an operator.
    pub reviewer_persona: Option<String>,
    pub max_review_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutorConfig {
    pub max_tool_rounds: u32,
    pub max_execution_attempts: u32,
    pub lock_timeout_ms: u64,
    pub stale_lock_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackendConfig {
    /// Reasoning provider command; receives a request on stdin, prints a decision.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GatewaySettings {
    /// Gateway executable. A bare name is looked up next to the running
    /// `taskflow` binary first, then on `PATH`.
    pub binary: String,
    /// Optional prefix such as `["sudo", "-n", "-u", "taskflow-agent"]`.
    pub launcher: Vec<String>,
    /// Sandbox root; relative paths are resolved against the project root.
    pub workspace_root: Option<PathBuf>,
    /// Account the gateway must run as (checked by the gateway itself).
    pub principal: Option<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            watch: false,
            max_concurrent_tasks: 2,
        }
    }
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            reviewer_persona: None,
            max_review_attempts: 3,
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 5,
            max_execution_attempts: 3,
            lock_timeout_ms: 2_000,
            stale_lock_secs: 300,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 120,
            max_retries: 3,
            base_backoff_ms: 500,
            max_backoff_ms: 10_000,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            binary: "taskflow-gateway".to_string(),
            launcher: Vec::new(),
            workspace_root: None,
            principal: None,
            timeout_secs: 30,
            output_limit_bytes: 100_000,
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.scheduling.poll_interval_ms == 0 {
            return Err(anyhow!("scheduling.poll_interval_ms must be > 0"));
        }
        if self.scheduling.max_concurrent_tasks == 0 {
            return Err(anyhow!("scheduling.max_concurrent_tasks must be > 0"));
        }
        if self.review.max_review_attempts == 0 {
            return Err(anyhow!("review.max_review_attempts must be > 0"));
        }
        if self.executor.max_execution_attempts == 0 {
            return Err(anyhow!("executor.max_execution_attempts must be > 0"));
        }
        if self.executor.lock_timeout_ms == 0 {
            return Err(anyhow!("executor.lock_timeout_ms must be > 0"));
        }
        if self.backend.timeout_secs == 0 {
            return Err(anyhow!("backend.timeout_secs must be > 0"));
        }
        if self.backend.output_limit_bytes == 0 {
            return Err(anyhow!("backend.output_limit_bytes must be > 0"));
        }
        if self.backend.base_backoff_ms > self.backend.max_backoff_ms {
            return Err(anyhow!(
                "backend.base_backoff_ms must not exceed backend.max_backoff_ms"
            ));
        }
        if self
            .backend
            .command
            .first()
            .is_some_and(|c| c.trim().is_empty())
        {
            return Err(anyhow!("backend.command must start with a program name"));
        }
        if self.gateway.binary.trim().is_empty() {
            return Err(anyhow!("gateway.binary must not be empty"));
        }
        if self.gateway.timeout_secs == 0 {
            return Err(anyhow!("gateway.timeout_secs must be > 0"));
        }
        if self.gateway.output_limit_bytes == 0 {
            return Err(anyhow!("gateway.output_limit_bytes must be > 0"));
        }
        for root in &self.authorized_output_roots {
            let path = Path::new(root);
            if root.trim().is_empty()
                || path.is_absolute()
                || path
                    .components()
                    .any(|c| matches!(c, std::path::Component::ParentDir))
            {
                return Err(anyhow!(
                    "authorized_output_roots entry '{root}' must be a relative path without '..'"
                ));
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.scheduling.poll_interval_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.executor.lock_timeout_ms)
    }

    pub fn stale_lock_age(&self) -> Duration {
        Duration::from_secs(self.executor.stale_lock_secs)
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_retries: self.backend.max_retries,
            base: Duration::from_millis(self.backend.base_backoff_ms),
            max: Duration::from_millis(self.backend.max_backoff_ms),
        }
    }

    /// Sandbox root for a project rooted at `project_root`.
    pub fn workspace_root(&self, project_root: &Path) -> PathBuf {
        match &self.gateway.workspace_root {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => project_root.join(path),
            None => project_root.to_path_buf(),
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `OrchestratorConfig::default()`.
pub fn load_config(path: &Path) -> Result<OrchestratorConfig> {
    if !path.exists() {
        let cfg = OrchestratorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: OrchestratorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &OrchestratorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
