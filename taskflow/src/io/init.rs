//! Initialization helpers for `.taskflow/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{OrchestratorConfig, write_config};
use crate::tools::DEFAULT_MANIFEST;

/// Sandbox directory created by `init`, relative to the project root.
pub const DEFAULT_WORKSPACE_DIR: &str = "workspace";

/// All canonical paths within `.taskflow/` for a project root.
#[derive(Debug, Clone)]
pub struct TaskflowPaths {
    pub root: PathBuf,
    pub taskflow_dir: PathBuf,
    pub tasks_dir: PathBuf,
    pub personas_dir: PathBuf,
    pub runs_dir: PathBuf,
    pub config_path: PathBuf,
    pub capabilities_path: PathBuf,
    pub gitignore_path: PathBuf,
    /// Default gateway sandbox, kept apart from `.taskflow/` so agents
    /// cannot reach task records.
    pub workspace_dir: PathBuf,
}

impl TaskflowPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let taskflow_dir = root.join(".taskflow");
        Self {
            root: root.clone(),
            taskflow_dir: taskflow_dir.clone(),
            tasks_dir: taskflow_dir.join("tasks"),
            personas_dir: taskflow_dir.join("personas"),
            runs_dir: taskflow_dir.join("runs"),
            config_path: taskflow_dir.join("config.toml"),
            capabilities_path: taskflow_dir.join("capabilities.toml"),
            gitignore_path: taskflow_dir.join(".gitignore"),
            workspace_dir: root.join(DEFAULT_WORKSPACE_DIR),
        }
    }

    pub fn persona_path(&self, name: &str) -> PathBuf {
        self.personas_dir.join(format!("{name}.json"))
    }
}

/// Options for `init_workspace`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing taskflow-owned files.
    pub force: bool,
}

/// Create `.taskflow/` scaffolding in `root`.
///
/// Fails if `.taskflow/` already exists unless `options.force` is set. Task
/// records are never touched, even with `force`.
pub fn init_workspace(root: &Path, options: &InitOptions) -> Result<TaskflowPaths> {
    let paths = TaskflowPaths::new(root);
    if paths.taskflow_dir.exists() && !paths.taskflow_dir.is_dir() {
        return Err(anyhow!(
            "taskflow init: .taskflow exists but is not a directory"
        ));
    }
    if paths.taskflow_dir.exists() && !options.force {
        return Err(anyhow!(
            "taskflow init: .taskflow already exists (use --force to overwrite)"
        ));
    }

    create_dir(&paths.taskflow_dir)?;
    create_dir(&paths.tasks_dir)?;
    create_dir(&paths.personas_dir)?;
    create_dir(&paths.runs_dir)?;
    create_dir(&paths.workspace_dir)?;

    write_file(&paths.gitignore_path, TASKFLOW_GITIGNORE)?;
    write_config(&paths.config_path, &initial_config())?;
    write_file(&paths.capabilities_path, DEFAULT_MANIFEST)?;
    write_file(&paths.persona_path("assistant"), EXAMPLE_PERSONA)?;

    Ok(paths)
}

/// Config written by `init`: defaults plus the separate sandbox directory.
pub fn initial_config() -> OrchestratorConfig {
    let mut cfg = OrchestratorConfig::default();
    cfg.gateway.workspace_root = Some(PathBuf::from(DEFAULT_WORKSPACE_DIR));
    cfg
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

const TASKFLOW_GITIGNORE: &str = "runs/\ntasks/*.lock\ntasks/*.tmp\n";

const EXAMPLE_PERSONA: &str = r#"{
  "persona_name": "assistant",
  "model_config": {
    "provider": "local",
    "model": "default",
    "temperature": 0.2
  },
  "system_prompt": "You are a careful assistant. Work only inside the workspace and finish by writing the deliverable.",
  "tools": [
    "read_file",
    "write_file",
    "list_directory",
    "create_directory",
    "evaluate_expression"
  ]
}
"#;
