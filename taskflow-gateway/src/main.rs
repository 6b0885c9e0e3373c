use std::io::Write;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use taskflow_gateway::config::DEFAULT_OUTPUT_LIMIT_BYTES;
use taskflow_gateway::identity::verify_principal;
use taskflow_gateway::{GatewayConfig, GatewayReport, GatewayState, exit_codes, logging};

/// Run one whitelisted file operation inside a workspace root.
#[derive(Parser)]
#[command(name = "taskflow-gateway", version, about)]
struct Cli {
    /// Absolute path of the workspace root. Every operand must stay inside it.
    #[arg(long = "workspace-path", value_name = "DIR")]
    workspace_path: PathBuf,

    /// Command line to run, e.g. `cp a.txt b.txt` or `Get-ChildItem -Path src`.
    #[arg(long, value_name = "COMMAND", allow_hyphen_values = true)]
    command: String,

    /// Require the gateway to run as this (non-root) account.
    #[arg(long)]
    principal: Option<String>,

    /// Print a JSON report on stdout instead of raw output.
    #[arg(long)]
    json: bool,

    #[arg(long, default_value_t = DEFAULT_OUTPUT_LIMIT_BYTES)]
    output_limit_bytes: usize,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    process::exit(run(&cli));
}

fn run(cli: &Cli) -> i32 {
    let config = match GatewayConfig::new(&cli.workspace_path) {
        Ok(config) => config
            .with_principal(cli.principal.clone())
            .with_output_limit_bytes(cli.output_limit_bytes),
        Err(err) => {
            let mut report = GatewayReport::rejected(&err);
            report.exit_code = exit_codes::USAGE;
            emit(cli.json, &report);
            return exit_codes::USAGE;
        }
    };

    if let Err(err) = verify_principal(config.principal()) {
        emit(cli.json, &GatewayReport::rejected(&err));
        return exit_codes::SECURITY;
    }

    if let Err(err) = std::env::set_current_dir(config.root()) {
        let report = GatewayReport {
            state: GatewayState::Rejected,
            exit_code: exit_codes::USAGE,
            verb: None,
            stdout: String::new(),
            stderr: format!("enter workspace {}: {err}\n", config.root().display()),
            security_error: None,
            violation: false,
        };
        emit(cli.json, &report);
        return exit_codes::USAGE;
    }

    match taskflow_gateway::execute(&config, &cli.command) {
        Ok(output) => {
            emit(cli.json, &GatewayReport::from_output(&output));
            output.exit_code
        }
        Err(err) => {
            emit(cli.json, &GatewayReport::rejected(&err));
            exit_codes::SECURITY
        }
    }
}

fn emit(json: bool, report: &GatewayReport) {
    if json {
        match serde_json::to_string(report) {
            Ok(line) => println!("{line}"),
            Err(err) => eprintln!("serialize report: {err}"),
        }
        return;
    }
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(report.stdout.as_bytes());
    let _ = stdout.flush();
    eprint!("{}", report.stderr);
}
