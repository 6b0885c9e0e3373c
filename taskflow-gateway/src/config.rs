//! Gateway configuration: the canonical workspace root and invocation limits.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::SecurityError;

/// Default cap on bytes returned on stdout.
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 100_000;
/// Default cap on the length of a single command line.
pub const DEFAULT_MAX_COMMAND_BYTES: usize = 64 * 1024;

/// Immutable configuration for one gateway invocation.
///
/// The root is canonicalized at construction; all containment checks compare
/// against this canonical form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    root: PathBuf,
    principal: Option<String>,
    output_limit_bytes: usize,
    max_command_bytes: usize,
}

impl GatewayConfig {
    /// Build a config for `workspace_path`.
    ///
    /// The path must be absolute, exist, be a directory, and must not be the
    /// filesystem root.
    pub fn new(workspace_path: &Path) -> Result<Self, SecurityError> {
        let invalid = |reason: &str| SecurityError::InvalidRoot {
            path: workspace_path.to_path_buf(),
            reason: reason.to_string(),
        };
        if !workspace_path.is_absolute() {
            return Err(invalid("must be an absolute path"));
        }
        let root = fs::canonicalize(workspace_path).map_err(|err| invalid(&err.to_string()))?;
        if !root.is_dir() {
            return Err(invalid("not a directory"));
        }
        if root.parent().is_none() {
            return Err(invalid("the filesystem root cannot be a workspace"));
        }
        Ok(Self {
            root,
            principal: None,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            max_command_bytes: DEFAULT_MAX_COMMAND_BYTES,
        })
    }

    pub fn with_principal(mut self, principal: Option<String>) -> Self {
        self.principal = principal.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn with_output_limit_bytes(mut self, limit: usize) -> Self {
        self.output_limit_bytes = limit.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    pub fn output_limit_bytes(&self) -> usize {
        self.output_limit_bytes
    }

    pub fn max_command_bytes(&self) -> usize {
        self.max_command_bytes
    }
}
