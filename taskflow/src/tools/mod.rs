//! Capability registry: name -> typed handler plus argument schema.
//!
//! Populated from a declarative manifest (`.taskflow/capabilities.toml`);
//! nothing is discovered at runtime. Dispatch checks, in order, that the
//! persona is authorized, that the capability exists, and that the
//! arguments satisfy its schema. Only then does the handler run.

pub mod expression;
pub mod file;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use jsonschema::Validator;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::core::cancel::CancelToken;
use crate::core::types::ToolDefinition;
use crate::io::gateway_client::GatewayClient;
use crate::io::schema;
use crate::persona::Persona;

/// Manifest written by `taskflow init` and used when none exists.
pub const DEFAULT_MANIFEST: &str = include_str!("default_capabilities.toml");

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("persona is not authorized to call '{0}'")]
    CapabilityDenied(String),
    #[error("unknown capability '{0}'")]
    UnknownTool(String),
    #[error("invalid arguments for '{tool}': {}", .errors.join("; "))]
    InvalidArguments { tool: String, errors: Vec<String> },
    /// Rejected by the gateway's security layer. Ends the task.
    #[error("security violation: {0}")]
    Security(String),
    #[error("{0}")]
    Failed(String),
}

impl ToolError {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Security(_))
    }
}

/// What a handler may use.
pub struct ToolContext<'a> {
    pub gateway: &'a dyn GatewayClient,
    pub cancel: &'a CancelToken,
}

/// A built-in capability implementation.
pub trait ToolHandler: Send + Sync {
    /// `arguments` have already passed the capability's schema.
    fn call(&self, arguments: &Value, ctx: &ToolContext<'_>) -> Result<String, ToolError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    GatewayCommand,
    WriteFile,
    ReadFile,
    ListDirectory,
    DeleteFile,
    MoveFile,
    CopyFile,
    CreateDirectory,
    EvaluateExpression,
}

impl HandlerKind {
    fn handler(self) -> Arc<dyn ToolHandler> {
        match self {
            Self::GatewayCommand => Arc::new(file::GatewayCommand),
            Self::WriteFile => Arc::new(file::WriteFile),
            Self::ReadFile => Arc::new(file::ReadFile),
            Self::ListDirectory => Arc::new(file::ListDirectory),
            Self::DeleteFile => Arc::new(file::DeleteFile),
            Self::MoveFile => Arc::new(file::MoveFile),
            Self::CopyFile => Arc::new(file::CopyFile),
            Self::CreateDirectory => Arc::new(file::CreateDirectory),
            Self::EvaluateExpression => Arc::new(expression::EvaluateExpression),
        }
    }
}

/// One `[[capability]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySpec {
    pub name: String,
    pub kind: HandlerKind,
    pub description: String,
    #[serde(default = "default_parameters")]
    pub parameters: Value,
}

fn default_parameters() -> Value {
    serde_json::json!({ "type": "object" })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityManifest {
    #[serde(rename = "capability", default)]
    pub capabilities: Vec<CapabilitySpec>,
}

struct Capability {
    spec: CapabilitySpec,
    validator: Validator,
    handler: Arc<dyn ToolHandler>,
}

pub struct CapabilityRegistry {
    capabilities: BTreeMap<String, Capability>,
}

impl CapabilityRegistry {
    pub fn from_manifest(manifest: &CapabilityManifest) -> Result<Self> {
        let mut capabilities = BTreeMap::new();
        for spec in &manifest.capabilities {
            if spec.name.trim().is_empty() {
                return Err(anyhow!("capability with empty name"));
            }
            if capabilities.contains_key(&spec.name) {
                return Err(anyhow!("duplicate capability '{}'", spec.name));
            }
            let validator = schema::compile(&spec.parameters)
                .with_context(|| format!("capability '{}'", spec.name))?;
            capabilities.insert(
                spec.name.clone(),
                Capability {
                    spec: spec.clone(),
                    validator,
                    handler: spec.kind.handler(),
                },
            );
        }
        Ok(Self { capabilities })
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let manifest: CapabilityManifest =
            toml::from_str(contents).context("parse capability manifest")?;
        Self::from_manifest(&manifest)
    }

    pub fn builtin() -> Result<Self> {
        Self::from_toml(DEFAULT_MANIFEST)
    }

    /// Load the manifest at `path`, or the built-in one if it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no capability manifest, using built-in");
            return Self::builtin();
        }
        let contents =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        Self::from_toml(&contents).with_context(|| format!("load {}", path.display()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.capabilities.keys().map(String::as_str)
    }

    /// Definitions the persona may call, in the persona's order.
    pub fn definitions_for(&self, persona: &Persona) -> Vec<ToolDefinition> {
        persona
            .tools
            .iter()
            .filter_map(|name| self.capabilities.get(name))
            .map(|c| ToolDefinition {
                name: c.spec.name.clone(),
                description: c.spec.description.clone(),
                parameters: c.spec.parameters.clone(),
            })
            .collect()
    }

    /// Authorize, validate and run one tool call.
    #[instrument(skip_all, fields(persona = %persona.persona_name, tool = %tool))]
    pub fn dispatch(
        &self,
        persona: &Persona,
        tool: &str,
        arguments: &Value,
        ctx: &ToolContext<'_>,
    ) -> Result<String, ToolError> {
        if !persona.is_authorized(tool) {
            warn!("capability denied");
            return Err(ToolError::CapabilityDenied(tool.to_string()));
        }
        let capability = self
            .capabilities
            .get(tool)
            .ok_or_else(|| ToolError::UnknownTool(tool.to_string()))?;
        let errors = schema::violations(&capability.validator, arguments);
        if !errors.is_empty() {
            return Err(ToolError::InvalidArguments {
                tool: tool.to_string(),
                errors,
            });
        }
        debug!("dispatching");
        capability.handler.call(arguments, ctx)
    }
}

/// Required string argument (schema validation has already run).
pub(crate) fn str_arg<'a>(arguments: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::Failed(format!("missing string argument '{key}'")))
}

pub(crate) fn bool_arg(arguments: &Value, key: &str) -> bool {
    arguments.get(key).and_then(Value::as_bool).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestWorkspace, persona};
    use serde_json::json;
    use std::fs;

    #[test]
    fn builtin_manifest_loads_every_kind() {
        let registry = CapabilityRegistry::builtin().expect("registry");
        let kinds: std::collections::BTreeSet<_> = registry
            .capabilities
            .values()
            .map(|c| c.spec.kind)
            .collect();
        assert_eq!(kinds.len(), 9);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let manifest = r#"
            [[capability]]
            name = "calc"
            kind = "evaluate_expression"
            description = "a"

            [[capability]]
            name = "calc"
            kind = "evaluate_expression"
            description = "b"
        "#;
        let err = CapabilityRegistry::from_toml(manifest).err().expect("error");
        assert!(err.to_string().contains("duplicate capability"));
    }

    #[test]
    fn definitions_follow_persona_and_skip_unknown() {
        let registry = CapabilityRegistry::builtin().expect("registry");
        let p = persona("writer", &["write_file", "teleport", "read_file"]);
        let names: Vec<_> = registry
            .definitions_for(&p)
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["write_file", "read_file"]);
    }

    /// The capability check runs before anything touches the gateway.
    #[test]
    fn unauthorized_tool_is_denied_without_side_effects() {
        let ws = TestWorkspace::new();
        let registry = CapabilityRegistry::builtin().expect("registry");
        let p = persona("reader", &["read_file"]);
        let err = registry
            .dispatch(
                &p,
                "write_file",
                &json!({"path": "x.txt", "content": "nope"}),
                &ws.tool_context(),
            )
            .unwrap_err();
        assert_eq!(err, ToolError::CapabilityDenied("write_file".to_string()));
        assert!(!ws.workspace_root().join("x.txt").exists());
    }

    #[test]
    fn schema_violations_are_reported() {
        let ws = TestWorkspace::new();
        let registry = CapabilityRegistry::builtin().expect("registry");
        let p = persona("writer", &["write_file"]);
        let err = registry
            .dispatch(&p, "write_file", &json!({"path": 3}), &ws.tool_context())
            .unwrap_err();
        let ToolError::InvalidArguments { errors, .. } = err else {
            panic!("expected invalid arguments, got {err:?}");
        };
        assert_eq!(errors.len(), 2, "{errors:?}");
    }

    #[test]
    fn authorized_but_unregistered_tool_is_unknown() {
        let ws = TestWorkspace::new();
        let registry = CapabilityRegistry::builtin().expect("registry");
        let p = persona("writer", &["teleport"]);
        let err = registry
            .dispatch(&p, "teleport", &json!({}), &ws.tool_context())
            .unwrap_err();
        assert_eq!(err, ToolError::UnknownTool("teleport".to_string()));
    }

    #[test]
    fn dispatch_runs_handler() {
        let ws = TestWorkspace::new();
        let registry = CapabilityRegistry::builtin().expect("registry");
        let p = persona("writer", &["write_file"]);
        registry
            .dispatch(
                &p,
                "write_file",
                &json!({"path": "notes/a.md", "content": "hello"}),
                &ws.tool_context(),
            )
            .expect("dispatch");
        assert_eq!(
            fs::read_to_string(ws.workspace_root().join("notes/a.md")).expect("read"),
            "hello"
        );
    }

    #[test]
    fn load_falls_back_to_builtin() {
        let temp = tempfile::tempdir().expect("tempdir");
        let registry =
            CapabilityRegistry::load(&temp.path().join("capabilities.toml")).expect("load");
        assert!(registry.contains("evaluate_expression"));
    }
}
