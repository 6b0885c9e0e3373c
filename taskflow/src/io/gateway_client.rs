//! Orchestrator side of the sandboxed command gateway.
//!
//! [`ProcessGateway`] launches the `taskflow-gateway` binary (optionally
//! through a launcher such as `sudo -n -u <principal>`) so file mutations run
//! under the gateway's own identity. [`InProcessGateway`] calls the gateway
//! library directly and is what tests use.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use taskflow_gateway::{GatewayConfig, GatewayReport, GatewayState, exit_codes};
use tracing::{debug, instrument, warn};

use crate::core::cancel::CancelToken;
use crate::io::config::GatewaySettings;
use crate::io::process::run_command;

/// Runs one command line through the gateway.
///
/// `Ok` covers every report the gateway produced, including security
/// rejections and runtime failures. `Err` means the gateway itself could not
/// be run (spawn failure, timeout, cancellation, unreadable report).
pub trait GatewayClient: Send + Sync {
    fn run(&self, command_line: &str, cancel: &CancelToken) -> Result<GatewayReport>;

    /// Sandbox root commands are resolved against.
    fn workspace_root(&self) -> &Path;
}

/// Spawns the gateway binary per command.
#[derive(Debug, Clone)]
pub struct ProcessGateway {
    launcher: Vec<String>,
    binary: PathBuf,
    workspace_root: PathBuf,
    principal: Option<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl ProcessGateway {
    pub fn from_settings(settings: &GatewaySettings, workspace_root: PathBuf) -> Self {
        Self {
            launcher: settings.launcher.clone(),
            binary: resolve_gateway_binary(&settings.binary),
            workspace_root,
            principal: settings.principal.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
            output_limit_bytes: settings.output_limit_bytes,
        }
    }

    fn command(&self, command_line: &str) -> Command {
        let mut cmd = match self.launcher.split_first() {
            Some((program, rest)) => {
                let mut cmd = Command::new(program);
                cmd.args(rest).arg(&self.binary);
                cmd
            }
            None => Command::new(&self.binary),
        };
        cmd.arg("--workspace-path")
            .arg(&self.workspace_root)
            .arg("--json")
            .arg("--output-limit-bytes")
            .arg(self.output_limit_bytes.to_string());
        if let Some(principal) = &self.principal {
            cmd.arg("--principal").arg(principal);
        }
        cmd.arg("--command").arg(command_line);
        cmd
    }
}

impl GatewayClient for ProcessGateway {
    #[instrument(skip_all, fields(binary = %self.binary.display()))]
    fn run(&self, command_line: &str, cancel: &CancelToken) -> Result<GatewayReport> {
        // The report wraps the (already bounded) stdout; leave room for JSON escaping.
        let capture_limit = self.output_limit_bytes.saturating_mul(2) + 64 * 1024;
        let output = run_command(
            self.command(command_line),
            None,
            self.timeout,
            capture_limit,
            cancel,
        )
        .context("run gateway")?;
        if output.cancelled {
            return Err(anyhow!("gateway command cancelled"));
        }
        if output.timed_out {
            return Err(anyhow!(
                "gateway command timed out after {}s",
                self.timeout.as_secs()
            ));
        }

        let stdout = output.stdout_lossy();
        let report = stdout
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .and_then(|line| serde_json::from_str::<GatewayReport>(line).ok());
        let Some(report) = report else {
            warn!(exit_code = ?output.status.code(), "gateway printed no report");
            return Err(anyhow!(
                "gateway exited with status {:?} without a report: {}",
                output.status.code(),
                output.stderr_lossy("gateway").trim()
            ));
        };
        if report.exit_code == exit_codes::USAGE {
            return Err(anyhow!("gateway refused its configuration: {}", report.stderr.trim()));
        }
        debug!(state = ?report.state, exit_code = report.exit_code, "gateway finished");
        Ok(report)
    }

    fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }
}

/// Calls the gateway library in-process. No identity separation.
#[derive(Debug, Clone)]
pub struct InProcessGateway {
    config: GatewayConfig,
}

impl InProcessGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }
}

impl GatewayClient for InProcessGateway {
    fn run(&self, command_line: &str, cancel: &CancelToken) -> Result<GatewayReport> {
        if cancel.is_cancelled() {
            return Err(anyhow!("gateway command cancelled"));
        }
        Ok(match taskflow_gateway::execute(&self.config, command_line) {
            Ok(output) => GatewayReport::from_output(&output),
            Err(err) => GatewayReport::rejected(&err),
        })
    }

    fn workspace_root(&self) -> &Path {
        self.config.root()
    }
}

/// Whether a report is a security violation (terminal for the task).
///
/// Malformed or empty commands are also rejected, but they are mistakes the
/// agent can correct and do not count.
pub fn is_security_violation(report: &GatewayReport) -> bool {
    report.state == GatewayState::Rejected && report.violation
}

/// Locate the gateway binary.
///
/// Paths are used as given. A bare name is looked up next to the running
/// executable (and one level up, for test binaries under `deps/`), then left
/// for `PATH` resolution.
pub fn resolve_gateway_binary(name: &str) -> PathBuf {
    let given = Path::new(name);
    if given.components().count() > 1 || given.is_absolute() {
        return given.to_path_buf();
    }
    let file_name = format!("{name}{}", std::env::consts::EXE_SUFFIX);
    if let Ok(exe) = std::env::current_exe() {
        for dir in exe.ancestors().skip(1).take(2) {
            let candidate = dir.join(&file_name);
            if candidate.is_file() {
                return candidate;
            }
        }
    }
    given.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn in_process(root: &Path) -> InProcessGateway {
        InProcessGateway::new(GatewayConfig::new(root).expect("config"))
    }

    #[test]
    fn in_process_reports_success_and_rejection() {
        let temp = tempfile::tempdir().expect("tempdir");
        let gateway = in_process(temp.path());
        let cancel = CancelToken::new();

        let ok = gateway
            .run("Set-Content -Path notes.txt -Value hi", &cancel)
            .expect("run");
        assert_eq!(ok.state, GatewayState::Succeeded);
        assert_eq!(fs::read_to_string(temp.path().join("notes.txt")).expect("read"), "hi");

        let rejected = gateway.run("Invoke-WebRequest http://x", &cancel).expect("run");
        assert!(is_security_violation(&rejected));
    }

    #[test]
    fn malformed_command_is_rejected_but_not_a_violation() {
        let temp = tempfile::tempdir().expect("tempdir");
        let report = in_process(temp.path())
            .run("ls -la", &CancelToken::new())
            .expect("run");
        assert_eq!(report.state, GatewayState::Rejected);
        assert!(!is_security_violation(&report));
    }

    #[test]
    fn runtime_failure_is_not_a_security_rejection() {
        let temp = tempfile::tempdir().expect("tempdir");
        let gateway = in_process(temp.path());
        let report = gateway.run("cat missing.txt", &CancelToken::new()).expect("run");
        assert_eq!(report.state, GatewayState::RuntimeFailed);
        assert!(!is_security_violation(&report));
    }

    #[test]
    fn cancelled_in_process_call_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(in_process(temp.path()).run("ls", &cancel).is_err());
    }

    #[test]
    fn explicit_paths_are_not_resolved() {
        assert_eq!(
            resolve_gateway_binary("/opt/bin/taskflow-gateway"),
            PathBuf::from("/opt/bin/taskflow-gateway")
        );
        assert_eq!(
            resolve_gateway_binary("./bin/gw"),
            PathBuf::from("./bin/gw")
        );
    }

    #[test]
    fn process_command_line_carries_root_and_principal() {
        let settings = GatewaySettings {
            binary: "/opt/gw".to_string(),
            launcher: vec!["sudo".to_string(), "-n".to_string()],
            principal: Some("agent".to_string()),
            ..GatewaySettings::default()
        };
        let gateway = ProcessGateway::from_settings(&settings, PathBuf::from("/srv/ws"));
        let cmd = gateway.command("ls");
        assert_eq!(cmd.get_program(), "sudo");
        let args: Vec<_> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "-n",
                "/opt/gw",
                "--workspace-path",
                "/srv/ws",
                "--json",
                "--output-limit-bytes",
                "100000",
                "--principal",
                "agent",
                "--command",
                "ls"
            ]
        );
    }
}
