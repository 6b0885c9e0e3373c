//! An opened `.taskflow/` project: paths, config, store, personas and
//! capabilities, loaded once per command.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::io::config::{OrchestratorConfig, load_config};
use crate::io::init::TaskflowPaths;
use crate::io::personas::PersonaCatalog;
use crate::io::store::TaskStore;
use crate::tools::CapabilityRegistry;

pub struct Project {
    pub paths: TaskflowPaths,
    pub config: OrchestratorConfig,
    pub store: TaskStore,
    pub registry: CapabilityRegistry,
    pub personas: PersonaCatalog,
}

impl Project {
    /// Open the project rooted at `root`. Fails if `taskflow init` has not
    /// been run there.
    pub fn open(root: &Path) -> Result<Self> {
        let paths = TaskflowPaths::new(root);
        if !paths.taskflow_dir.is_dir() {
            return Err(anyhow!(
                "{} is not a taskflow project (run `taskflow init` first)",
                root.display()
            ));
        }
        let config = load_config(&paths.config_path)?;
        let registry = CapabilityRegistry::load(&paths.capabilities_path)?;
        let personas = PersonaCatalog::new(&paths.personas_dir)
            .with_known_tools(registry.names().map(str::to_string));
        let store = TaskStore::new(
            &paths.tasks_dir,
            config.authorized_output_roots.clone(),
            config.lock_timeout(),
        );
        Ok(Self {
            paths,
            config,
            store,
            registry,
            personas,
        })
    }

    /// Canonical gateway sandbox root; must already exist.
    pub fn workspace_root(&self) -> Result<PathBuf> {
        let root = self.config.workspace_root(&self.paths.root);
        let canonical = root
            .canonicalize()
            .with_context(|| format!("resolve workspace root {}", root.display()))?;
        if !canonical.is_dir() {
            return Err(anyhow!(
                "workspace root {} is not a directory",
                canonical.display()
            ));
        }
        Ok(canonical)
    }
}
