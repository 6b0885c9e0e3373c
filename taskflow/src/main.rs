//! `taskflow`: directory-backed task orchestration for agent personas.
//!
//! Every command operates on the project rooted at `--root` (default: the
//! current directory), i.e. the directory holding `.taskflow/`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, anyhow};
use clap::{Args, Parser, Subcommand};
use taskflow::core::expr::{evaluate, format_number};
use taskflow::core::stage::Stage;
use taskflow::core::state_update::ReviewVerdict;
use taskflow::driver::{Driver, DriverOptions, Services};
use taskflow::exit_codes;
use taskflow::io::gateway_client::ProcessGateway;
use taskflow::io::init::{InitOptions, init_workspace};
use taskflow::io::provider::CommandProvider;
use taskflow::logging;
use taskflow::operator::{cancel_task, review_verdict, submit_file};
use taskflow::project::Project;
use taskflow::select::{SelectOutcome, blocked_tasks, select_from_store, stage_counts};

#[derive(Parser)]
#[command(
    name = "taskflow",
    version,
    about = "Directory-backed task orchestration for agent personas"
)]
struct Cli {
    /// Project root (the directory holding `.taskflow/`).
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.taskflow/` with default config, capabilities and an example persona.
    Init {
        /// Overwrite config, capabilities and the example persona.
        #[arg(short, long)]
        force: bool,
    },
    /// Validate a task document and enqueue it as `pending`.
    Submit { file: PathBuf },
    /// List tasks, optionally only those in one stage.
    List {
        #[arg(long)]
        stage: Option<Stage>,
    },
    /// Print a task record as JSON.
    Show { task_id: String },
    /// Print the id of the task the driver would claim next.
    Select,
    /// List pending tasks that cannot be assigned, with the reason.
    Blocked,
    /// Fail an assigned or in-progress task.
    Cancel {
        task_id: String,
        #[arg(long)]
        reason: String,
    },
    /// Approve a task waiting in review.
    Approve {
        task_id: String,
        #[arg(long, default_value = "")]
        note: String,
    },
    /// Reject a task waiting in review and send it back for rework.
    Reject {
        task_id: String,
        #[arg(long)]
        note: String,
    },
    /// List loadable personas and report problems.
    Personas,
    /// Evaluate an arithmetic expression with the restricted evaluator.
    Eval { expression: String },
    /// Run the driver loop.
    Run(RunArgs),
}

#[derive(Args, Debug, Clone, Default)]
struct RunArgs {
    /// Run a single cycle, then wait for started work and exit.
    #[arg(long, conflicts_with = "max_cycles")]
    once: bool,
    #[arg(long)]
    max_cycles: Option<u64>,
    /// Exit once nothing is running and nothing can be started.
    #[arg(long)]
    until_idle: bool,
}

impl RunArgs {
    fn options(&self) -> DriverOptions {
        DriverOptions {
            max_cycles: if self.once { Some(1) } else { self.max_cycles },
            until_idle: self.until_idle,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init(match cli.command {
        Command::Run(_) => "info",
        _ => "warn",
    });
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let root = cli.root.as_path();
    match cli.command {
        Command::Init { force } => cmd_init(root, force),
        Command::Submit { file } => {
            let project = Project::open(root)?;
            let record = submit_file(&project.store, &file)?;
            println!("{}", record.task_id());
            Ok(exit_codes::OK)
        }
        Command::List { stage } => cmd_list(root, stage),
        Command::Show { task_id } => {
            let project = Project::open(root)?;
            let record = project.store.get(&task_id)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(exit_codes::OK)
        }
        Command::Select => cmd_select(root),
        Command::Blocked => cmd_blocked(root),
        Command::Cancel { task_id, reason } => {
            let project = Project::open(root)?;
            cancel_task(&project.store, &task_id, &reason)?;
            println!("{task_id} failed (cancelled)");
            Ok(exit_codes::OK)
        }
        Command::Approve { task_id, note } => {
            cmd_verdict(root, &task_id, ReviewVerdict::Approved { notes: note })
        }
        Command::Reject { task_id, note } => {
            if note.trim().is_empty() {
                return Err(anyhow!("a rejection note is required"));
            }
            cmd_verdict(root, &task_id, ReviewVerdict::Rejected { notes: note })
        }
        Command::Personas => cmd_personas(root),
        Command::Eval { expression } => {
            let value = evaluate(&expression)?;
            println!("{}", format_number(value));
            Ok(exit_codes::OK)
        }
        Command::Run(args) => cmd_run(root, &args),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_workspace(root, &InitOptions { force })?;
    println!("initialized {}", paths.taskflow_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_list(root: &Path, stage: Option<Stage>) -> Result<i32> {
    let project = Project::open(root)?;
    let records = match stage {
        Some(stage) => project.store.list(stage)?,
        None => project.store.list_all()?,
    };
    for record in &records {
        println!(
            "{}\t{}\t{}\t{}",
            record.task_id(),
            record.stage,
            record.task.effective_priority(),
            record.task.persona
        );
    }
    if stage.is_none() {
        let summary: Vec<String> = stage_counts(&records)
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .map(|(stage, count)| format!("{stage}={count}"))
            .collect();
        eprintln!("{} task(s) {}", records.len(), summary.join(" "));
    }
    Ok(exit_codes::OK)
}

fn cmd_select(root: &Path) -> Result<i32> {
    let project = Project::open(root)?;
    let personas = project.personas.load()?;
    match select_from_store(&project.store, &personas)? {
        SelectOutcome::Ready(selected) => {
            println!("{}", selected.task_id);
            Ok(exit_codes::OK)
        }
        SelectOutcome::Empty => {
            eprintln!("no pending tasks");
            Ok(exit_codes::NOTHING_SELECTABLE)
        }
        SelectOutcome::Blocked(blocked) => {
            for task in &blocked {
                eprintln!("{}: {}", task.task_id, task.reason.describe());
            }
            Ok(exit_codes::BLOCKED)
        }
    }
}

fn cmd_blocked(root: &Path) -> Result<i32> {
    let project = Project::open(root)?;
    let personas = project.personas.load()?;
    for task in blocked_tasks(&project.store, &personas)? {
        let marker = if task.reason.is_standing() { "!" } else { " " };
        println!("{marker} {}\t{}", task.task_id, task.reason.describe());
    }
    Ok(exit_codes::OK)
}

fn cmd_verdict(root: &Path, task_id: &str, verdict: ReviewVerdict) -> Result<i32> {
    let project = Project::open(root)?;
    let record = review_verdict(
        &project.store,
        task_id,
        &verdict,
        project.config.review.max_review_attempts,
    )?;
    println!("{task_id} {}", record.stage);
    Ok(exit_codes::OK)
}

fn cmd_personas(root: &Path) -> Result<i32> {
    let project = Project::open(root)?;
    let personas = project.personas.load()?;
    for persona in personas.iter() {
        println!("{}\t{}", persona.persona_name, persona.tools.join(","));
    }
    for problem in &personas.problems {
        eprintln!("warning: {problem}");
    }
    for (persona, tool) in &personas.unknown_tools {
        eprintln!("warning: persona '{persona}' names unknown capability '{tool}'");
    }
    Ok(exit_codes::OK)
}

fn cmd_run(root: &Path, args: &RunArgs) -> Result<i32> {
    let project = Project::open(root)?;
    let workspace_root = project.workspace_root()?;
    let provider =
        CommandProvider::from_config(&project.config.backend, Some(workspace_root.clone()))?;
    let gateway = ProcessGateway::from_settings(&project.config.gateway, workspace_root);
    let mut driver = Driver::new(
        project,
        Services {
            provider: Arc::new(provider),
            gateway: Arc::new(gateway),
        },
    )?;
    let report = driver.run(&args.options())?;
    println!(
        "{} cycle(s), {} execution(s), {} review(s)",
        report.cycles, report.executions, report.reviews
    );
    Ok(exit_codes::OK)
}
