//! Command lifecycle: receive, validate, execute, report.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::command::{self, FileCommand};
use crate::config::GatewayConfig;
use crate::containment::{ensure_within, resolve_within};
use crate::error::SecurityError;
use crate::exit_codes;
use crate::ops;
use crate::tokenize::tokenize;
use crate::verbs::Verb;

/// Lifecycle state of one gateway command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayState {
    Received,
    Validated,
    Executing,
    Succeeded,
    RuntimeFailed,
    Rejected,
}

/// Result of a command that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayOutput {
    pub state: GatewayState,
    pub verb: Verb,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub stdout_truncated: usize,
}

impl GatewayOutput {
    pub fn succeeded(&self) -> bool {
        self.state == GatewayState::Succeeded
    }
}

/// Wire form of a gateway result, printed by `taskflow-gateway --json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayReport {
    pub state: GatewayState,
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verb: Option<String>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    /// Set when the command was rejected by the security layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_error: Option<String>,
    /// The rejection was a security violation, not a syntax slip.
    #[serde(default)]
    pub violation: bool,
}

impl GatewayReport {
    pub fn from_output(output: &GatewayOutput) -> Self {
        Self {
            state: output.state,
            exit_code: output.exit_code,
            verb: Some(output.verb.name().to_string()),
            stdout: output.stdout.clone(),
            stderr: output.stderr.clone(),
            security_error: None,
            violation: false,
        }
    }

    pub fn rejected(err: &SecurityError) -> Self {
        Self {
            state: GatewayState::Rejected,
            exit_code: exit_codes::SECURITY,
            verb: None,
            stdout: String::new(),
            stderr: format!("security error: {err}\n"),
            security_error: Some(err.to_string()),
            violation: err.is_violation(),
        }
    }
}

/// Tokenize, whitelist and contain a command line without executing it.
pub fn validate(
    config: &GatewayConfig,
    command_line: &str,
) -> Result<(Verb, FileCommand<PathBuf>), SecurityError> {
    if command_line.len() > config.max_command_bytes() {
        return Err(SecurityError::CommandTooLong {
            len: command_line.len(),
            limit: config.max_command_bytes(),
        });
    }
    let tokens = tokenize(command_line)?;
    let (verb, parsed) = command::parse(&tokens)?;
    let root = config.root();
    let resolved = parsed.try_map_paths(|raw| resolve_within(root, &raw))?;
    if targets_root(&resolved, root) {
        return Err(SecurityError::RootTarget);
    }
    if let FileCommand::Copy { from, to, .. } | FileCommand::Move { from, to, .. } = &resolved {
        ensure_within(root, &ops::into_directory(from, to))?;
    }
    Ok((verb, resolved))
}

fn targets_root(command: &FileCommand<PathBuf>, root: &Path) -> bool {
    match command {
        FileCommand::Remove { path, .. } | FileCommand::Rename { path, .. } => path == root,
        FileCommand::Move { from, .. } => from == root,
        _ => false,
    }
}

/// Run one command line inside the workspace.
///
/// Security rejections are returned as `Err` and nothing touches the
/// filesystem. Anything that goes wrong after validation, including a panic
/// in the operation, becomes a `RuntimeFailed` output with exit code 1.
#[instrument(skip_all, fields(root = %config.root().display()))]
pub fn execute(config: &GatewayConfig, command_line: &str) -> Result<GatewayOutput, SecurityError> {
    debug!(state = ?GatewayState::Received, "command received");
    let (verb, command) = match validate(config, command_line) {
        Ok(validated) => validated,
        Err(err) => {
            warn!(state = ?GatewayState::Rejected, err = %err, "command rejected");
            return Err(err);
        }
    };
    debug!(state = ?GatewayState::Validated, verb = verb.name(), "command validated");

    debug!(state = ?GatewayState::Executing, verb = verb.name(), "executing");
    let result = catch_unwind(AssertUnwindSafe(|| ops::run(config.root(), &command)));
    let output = match result {
        Ok(Ok(stdout)) => {
            let (stdout, stdout_truncated) = truncate(stdout, config.output_limit_bytes());
            GatewayOutput {
                state: GatewayState::Succeeded,
                verb,
                stdout,
                stderr: String::new(),
                exit_code: exit_codes::OK,
                stdout_truncated,
            }
        }
        Ok(Err(err)) => GatewayOutput {
            state: GatewayState::RuntimeFailed,
            verb,
            stdout: String::new(),
            stderr: format!("{err:#}\n"),
            exit_code: exit_codes::RUNTIME_FAILURE,
            stdout_truncated: 0,
        },
        Err(_) => GatewayOutput {
            state: GatewayState::RuntimeFailed,
            verb,
            stdout: String::new(),
            stderr: "operation panicked\n".to_string(),
            exit_code: exit_codes::RUNTIME_FAILURE,
            stdout_truncated: 0,
        },
    };
    info!(
        state = ?output.state,
        verb = verb.name(),
        exit_code = output.exit_code,
        "command finished"
    );
    Ok(output)
}

fn truncate(mut text: String, limit: usize) -> (String, usize) {
    if text.len() <= limit {
        return (text, 0);
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let dropped = text.len() - cut;
    text.truncate(cut);
    text.push_str(&format!("\n[output truncated {dropped} bytes]\n"));
    (text, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn config() -> (tempfile::TempDir, GatewayConfig) {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = GatewayConfig::new(temp.path()).expect("config");
        (temp, cfg)
    }

    #[test]
    fn write_then_read_succeeds() {
        let (_temp, cfg) = config();
        let out = execute(&cfg, "write notes/a.txt 'hello there'").expect("write");
        assert_eq!(out.state, GatewayState::Succeeded);
        assert_eq!(out.exit_code, exit_codes::OK);

        let out = execute(&cfg, "Get-Content -Path notes/a.txt").expect("read");
        assert_eq!(out.stdout, "hello there");
    }

    #[test]
    fn off_whitelist_verb_is_rejected_without_effects() {
        let (temp, cfg) = config();
        let err = execute(&cfg, "Invoke-WebRequest http://example.com").unwrap_err();
        assert!(matches!(err, SecurityError::VerbNotAllowed(_)));
        assert_eq!(fs::read_dir(temp.path()).expect("ls").count(), 0);
    }

    #[test]
    fn escaping_destination_is_rejected_before_source_is_touched() {
        let (temp, cfg) = config();
        fs::write(temp.path().join("a.txt"), "a").expect("write");
        let err = execute(&cfg, "mv a.txt ../stolen.txt").unwrap_err();
        assert!(matches!(err, SecurityError::PathEscape { .. }));
        assert!(temp.path().join("a.txt").exists());
    }

    #[test]
    fn removing_the_root_is_refused() {
        let (_temp, cfg) = config();
        assert_eq!(
            execute(&cfg, "rm -Recurse .").unwrap_err(),
            SecurityError::RootTarget
        );
    }

    #[cfg(unix)]
    #[test]
    fn copy_into_directory_does_not_follow_outside_symlink() {
        let (temp, cfg) = config();
        let outside = tempfile::tempdir().expect("outside");
        let secret = outside.path().join("a.txt");
        fs::write(&secret, "original").expect("write");
        fs::write(temp.path().join("a.txt"), "replaced").expect("write");
        fs::create_dir(temp.path().join("d")).expect("mkdir");
        std::os::unix::fs::symlink(&secret, temp.path().join("d/a.txt")).expect("symlink");

        for line in ["cp -Force a.txt d", "mv -Force a.txt d"] {
            assert!(
                matches!(execute(&cfg, line), Err(SecurityError::PathEscape { .. })),
                "{line}"
            );
        }
        assert_eq!(fs::read_to_string(&secret).expect("read"), "original");
        assert!(temp.path().join("a.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn recursive_copy_refuses_symlinked_destination() {
        let (temp, cfg) = config();
        let outside = tempfile::tempdir().expect("outside");
        fs::create_dir_all(temp.path().join("src/nested")).expect("mkdir");
        fs::write(temp.path().join("src/nested/f.txt"), "x").expect("write");
        fs::create_dir_all(temp.path().join("dst/src")).expect("mkdir");
        std::os::unix::fs::symlink(outside.path(), temp.path().join("dst/src/nested"))
            .expect("symlink");

        let out = execute(&cfg, "cp -Recurse -Force src dst").expect("validated");
        assert_eq!(out.state, GatewayState::RuntimeFailed);
        assert!(!outside.path().join("f.txt").exists());
    }

    #[test]
    fn runtime_failures_map_to_exit_code_one() {
        let (_temp, cfg) = config();
        let out = execute(&cfg, "cat missing.txt").expect("executes");
        assert_eq!(out.state, GatewayState::RuntimeFailed);
        assert_eq!(out.exit_code, exit_codes::RUNTIME_FAILURE);
        assert!(out.stderr.contains("missing.txt"));
    }

    #[test]
    fn overlong_command_is_rejected() {
        let (_temp, cfg) = config();
        let line = format!("write a.txt {}", "x".repeat(cfg.max_command_bytes()));
        assert!(matches!(
            execute(&cfg, &line).unwrap_err(),
            SecurityError::CommandTooLong { .. }
        ));
    }

    #[test]
    fn stdout_is_truncated_at_limit() {
        let (temp, cfg) = config();
        let cfg = cfg.with_output_limit_bytes(4);
        fs::write(temp.path().join("big.txt"), "abcdefgh").expect("write");
        let out = execute(&cfg, "cat big.txt").expect("read");
        assert!(out.stdout.starts_with("abcd"));
        assert_eq!(out.stdout_truncated, 4);
    }

    #[test]
    fn report_round_trips_through_json() {
        let report = GatewayReport::rejected(&SecurityError::RootTarget);
        let json = serde_json::to_string(&report).expect("serialize");
        let back: GatewayReport = serde_json::from_str(&json).expect("parse");
        assert_eq!(back, report);
        assert_eq!(back.exit_code, exit_codes::SECURITY);
        assert!(back.violation);

        let malformed = GatewayReport::rejected(&SecurityError::Malformed("x".to_string()));
        assert!(!malformed.violation);
    }
}
