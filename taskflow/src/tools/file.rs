//! File capabilities. Every effect goes through the gateway as a command
//! line; nothing here touches the filesystem directly.

use serde_json::Value;
use taskflow_gateway::GatewayState;

use super::{ToolContext, ToolError, ToolHandler, bool_arg, str_arg};
use crate::core::cancel::CancelToken;
use crate::io::gateway_client::{GatewayClient, is_security_violation};

/// Raw content bytes per write command. Quoting can at most double this,
/// which keeps each line well under the gateway's command length limit.
pub const WRITE_CHUNK_BYTES: usize = 16 * 1024;

/// Quote `value` as a single-quoted gateway token (`'` becomes `''`).
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Run one command line, mapping the gateway report onto tool errors.
pub fn run_line(
    gateway: &dyn GatewayClient,
    line: &str,
    cancel: &CancelToken,
) -> Result<String, ToolError> {
    let report = gateway
        .run(line, cancel)
        .map_err(|err| ToolError::Failed(format!("gateway unavailable: {err:#}")))?;
    if report.state == GatewayState::Rejected {
        let violation = is_security_violation(&report);
        let message = report
            .security_error
            .unwrap_or_else(|| report.stderr.trim().to_string());
        return Err(if violation {
            ToolError::Security(message)
        } else {
            ToolError::Failed(format!("command rejected: {message}"))
        });
    }
    if report.exit_code != 0 {
        let message = report.stderr.trim();
        return Err(ToolError::Failed(if message.is_empty() {
            format!("command failed with exit code {}", report.exit_code)
        } else {
            message.to_string()
        }));
    }
    Ok(report.stdout)
}

/// Write `content` to `path`, splitting it into a write followed by appends
/// when it is too large for one command line.
pub fn write_via_gateway(
    gateway: &dyn GatewayClient,
    path: &str,
    content: &str,
    append: bool,
    cancel: &CancelToken,
) -> Result<String, ToolError> {
    let mut verb = if append { "Add-Content" } else { "Set-Content" };
    let mut output = String::new();
    for chunk in chunks(content, WRITE_CHUNK_BYTES) {
        let line = format!("{verb} -Path {} -Value {}", quote(path), quote(chunk));
        output = run_line(gateway, &line, cancel)?;
        verb = "Add-Content";
    }
    Ok(output)
}

/// Split at char boundaries into pieces of at most `size` bytes. Always
/// yields at least one (possibly empty) piece.
fn chunks(text: &str, size: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = text;
    while rest.len() > size {
        let mut cut = size;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        let (head, tail) = rest.split_at(cut);
        pieces.push(head);
        rest = tail;
    }
    pieces.push(rest);
    pieces
}

/// `{command}`: a raw whitelisted gateway command.
pub struct GatewayCommand;

impl ToolHandler for GatewayCommand {
    fn call(&self, arguments: &Value, ctx: &ToolContext<'_>) -> Result<String, ToolError> {
        run_line(ctx.gateway, str_arg(arguments, "command")?, ctx.cancel)
    }
}

/// `{path, content, append?}`
pub struct WriteFile;

impl ToolHandler for WriteFile {
    fn call(&self, arguments: &Value, ctx: &ToolContext<'_>) -> Result<String, ToolError> {
        write_via_gateway(
            ctx.gateway,
            str_arg(arguments, "path")?,
            str_arg(arguments, "content")?,
            bool_arg(arguments, "append"),
            ctx.cancel,
        )
    }
}

/// `{path}`
pub struct ReadFile;

impl ToolHandler for ReadFile {
    fn call(&self, arguments: &Value, ctx: &ToolContext<'_>) -> Result<String, ToolError> {
        let line = format!("Get-Content -Path {}", quote(str_arg(arguments, "path")?));
        run_line(ctx.gateway, &line, ctx.cancel)
    }
}

/// `{path?}`, defaulting to the workspace root.
pub struct ListDirectory;

impl ToolHandler for ListDirectory {
    fn call(&self, arguments: &Value, ctx: &ToolContext<'_>) -> Result<String, ToolError> {
        let path = arguments
            .get("path")
            .and_then(Value::as_str)
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(".");
        let line = format!("Get-ChildItem -Path {}", quote(path));
        run_line(ctx.gateway, &line, ctx.cancel)
    }
}

/// `{path, recursive?}`
pub struct DeleteFile;

impl ToolHandler for DeleteFile {
    fn call(&self, arguments: &Value, ctx: &ToolContext<'_>) -> Result<String, ToolError> {
        let mut line = format!("Remove-Item -Path {}", quote(str_arg(arguments, "path")?));
        if bool_arg(arguments, "recursive") {
            line.push_str(" -Recurse");
        }
        run_line(ctx.gateway, &line, ctx.cancel)
    }
}

/// `{source, destination, overwrite?}`
pub struct MoveFile;

impl ToolHandler for MoveFile {
    fn call(&self, arguments: &Value, ctx: &ToolContext<'_>) -> Result<String, ToolError> {
        let mut line = format!(
            "Move-Item -Path {} -Destination {}",
            quote(str_arg(arguments, "source")?),
            quote(str_arg(arguments, "destination")?)
        );
        if bool_arg(arguments, "overwrite") {
            line.push_str(" -Force");
        }
        run_line(ctx.gateway, &line, ctx.cancel)
    }
}

/// `{source, destination, recursive?, overwrite?}`
pub struct CopyFile;

impl ToolHandler for CopyFile {
    fn call(&self, arguments: &Value, ctx: &ToolContext<'_>) -> Result<String, ToolError> {
        let mut line = format!(
            "Copy-Item -Path {} -Destination {}",
            quote(str_arg(arguments, "source")?),
            quote(str_arg(arguments, "destination")?)
        );
        if bool_arg(arguments, "recursive") {
            line.push_str(" -Recurse");
        }
        if bool_arg(arguments, "overwrite") {
            line.push_str(" -Force");
        }
        run_line(ctx.gateway, &line, ctx.cancel)
    }
}

/// `{path}`
pub struct CreateDirectory;

impl ToolHandler for CreateDirectory {
    fn call(&self, arguments: &Value, ctx: &ToolContext<'_>) -> Result<String, ToolError> {
        let line = format!(
            "New-Item -ItemType directory -Path {}",
            quote(str_arg(arguments, "path")?)
        );
        run_line(ctx.gateway, &line, ctx.cancel)
    }
}
