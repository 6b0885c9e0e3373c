//! Test-only helpers: deterministic tasks and personas, a scripted reasoning
//! provider, and a throwaway project with an in-process gateway.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use chrono::{TimeZone, Utc};
use taskflow_gateway::GatewayConfig;
use tempfile::TempDir;

use crate::core::cancel::CancelToken;
use crate::core::stage::Stage;
use crate::core::types::AgentDecision;
use crate::io::config::OrchestratorConfig;
use crate::io::gateway_client::InProcessGateway;
use crate::io::init::{InitOptions, TaskflowPaths, init_workspace, initial_config};
use crate::io::provider::{ProviderError, ProviderRequest, ReasoningProvider};
use crate::io::store::TaskStore;
use crate::persona::{ModelConfig, Persona};
use crate::task::{Task, TaskRecord};
use crate::tools::ToolContext;

/// A valid task for persona `writer` with priority 5 and no dependencies.
pub fn task(id: &str) -> Task {
    Task {
        task_id: id.to_string(),
        created_by: "test".to_string(),
        timestamp: Utc
            .with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_default(),
        priority: Some(5),
        persona: "writer".to_string(),
        objective: format!("{id} objective"),
        context: String::new(),
        dependencies: Vec::new(),
        output_path: format!("out/{id}.md"),
        success_criteria: Vec::new(),
        constraints: Vec::new(),
    }
}

/// Wrap `task` in a record at `stage` with no history.
pub fn record(task: Task, stage: Stage) -> TaskRecord {
    TaskRecord {
        stage,
        ..TaskRecord::pending(task)
    }
}

pub fn persona(name: &str, tools: &[&str]) -> Persona {
    Persona {
        persona_name: name.to_string(),
        model_config: ModelConfig::default(),
        system_prompt: format!("You are {name}."),
        tools: tools.iter().map(|t| t.to_string()).collect(),
    }
}

/// Shorthand for a `complete` decision.
pub fn complete(deliverable: &str) -> Result<AgentDecision, ProviderError> {
    Ok(AgentDecision::Complete {
        deliverable: deliverable.to_string(),
        summary: "done".to_string(),
    })
}

/// Shorthand for a `tool_call` decision.
pub fn tool_call(tool: &str, arguments: serde_json::Value) -> Result<AgentDecision, ProviderError> {
    Ok(AgentDecision::ToolCall {
        tool: tool.to_string(),
        arguments,
    })
}

/// Replays queued responses in order and records every request.
///
/// Once the queue is empty every call fails fatally, so a test that expects
/// fewer rounds than it scripted shows up as a failed task.
#[derive(Default)]
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<AgentDecision, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: impl IntoIterator<Item = Result<AgentDecision, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, response: Result<AgentDecision, ProviderError>) {
        self.responses
            .lock()
            .expect("responses lock")
            .push_back(response);
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().expect("responses lock").len()
    }
}

impl ReasoningProvider for ScriptedProvider {
    fn invoke(
        &self,
        request: &ProviderRequest,
        cancel: &CancelToken,
    ) -> Result<AgentDecision, ProviderError> {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        self.responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Fatal("script exhausted".to_string())))
    }
}

/// An initialized project in a temp directory.
pub struct TestWorkspace {
    _temp: TempDir,
    paths: TaskflowPaths,
    config: OrchestratorConfig,
    pub gateway: InProcessGateway,
    pub cancel: CancelToken,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self::with_config(initial_config())
    }

    /// Initialize, then overwrite `.taskflow/config.toml` with `config`.
    pub fn with_config(config: OrchestratorConfig) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_workspace(temp.path(), &InitOptions { force: false }).expect("init");
        crate::io::config::write_config(&paths.config_path, &config).expect("write config");
        let root = config.workspace_root(&paths.root);
        fs::create_dir_all(&root).expect("create workspace");
        let gateway = InProcessGateway::new(GatewayConfig::new(&root).expect("gateway config"));
        Self {
            _temp: temp,
            paths,
            config,
            gateway,
            cancel: CancelToken::new(),
        }
    }

    /// Project root (the directory holding `.taskflow/`).
    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    /// Canonical gateway sandbox root.
    pub fn workspace_root(&self) -> &Path {
        crate::io::gateway_client::GatewayClient::workspace_root(&self.gateway)
    }

    pub fn paths(&self) -> &TaskflowPaths {
        &self.paths
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> TaskStore {
        TaskStore::new(
            &self.paths.tasks_dir,
            self.config.authorized_output_roots.clone(),
            self.config.lock_timeout(),
        )
    }

    pub fn tool_context(&self) -> ToolContext<'_> {
        ToolContext {
            gateway: &self.gateway,
            cancel: &self.cancel,
        }
    }

    pub fn write_persona(&self, persona: &Persona) {
        let mut buf = serde_json::to_string_pretty(persona).expect("serialize persona");
        buf.push('\n');
        fs::write(self.paths.persona_path(&persona.persona_name), buf).expect("write persona");
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}
