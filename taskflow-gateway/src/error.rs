//! Security rejections raised before any filesystem effect happens.

use std::path::PathBuf;

use thiserror::Error;

/// A command (or invocation) refused by the gateway.
///
/// Every variant maps to exit code [`crate::exit_codes::SECURITY`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecurityError {
    #[error("empty command")]
    EmptyCommand,

    #[error("command too long ({len} bytes, limit {limit})")]
    CommandTooLong { len: usize, limit: usize },

    #[error("unsupported shell syntax: {0}")]
    ShellSyntax(String),

    #[error("verb '{0}' is not allowed")]
    VerbNotAllowed(String),

    #[error("malformed command: {0}")]
    Malformed(String),

    #[error("path '{raw}' escapes the workspace root")]
    PathEscape { raw: String },

    #[error("refusing to operate on the workspace root itself")]
    RootTarget,

    #[error("workspace root {path} is invalid: {reason}")]
    InvalidRoot { path: PathBuf, reason: String },

    #[error("principal '{0}' is privileged")]
    PrivilegedPrincipal(String),

    #[error("running as uid {actual}, expected principal '{expected}'")]
    IdentityMismatch { expected: String, actual: u32 },

    #[error("identity check failed: {0}")]
    Identity(String),
}

impl SecurityError {
    /// Whether the command reached for something it must not have: an
    /// off-whitelist verb, shell syntax, a path outside the root or the root
    /// itself, or a failed identity check. Syntax slips (empty, overlong or
    /// malformed commands) are not violations.
    pub fn is_violation(&self) -> bool {
        !matches!(
            self,
            Self::EmptyCommand | Self::CommandTooLong { .. } | Self::Malformed(_)
        )
    }
}
