//! Taskcard CLI entry point.
//!
//! Provides `lint`, `validate-output` and `dry-run` subcommands.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::debug;

use taskcard::{dry_run, lint_task_card, load_task_card, AgentOutput};

/// Taskcard — lint task cards and validate agent output.
#[derive(Parser)]
#[command(name = "taskcard", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Check a task card for missing and unknown fields.
    Lint {
        /// Task card YAML file.
        file: PathBuf,
        /// Also require every listed output path to exist.
        #[arg(long)]
        check_outputs: bool,
        /// Directory output paths are resolved against (default: cwd).
        #[arg(long, default_value = ".")]
        base_dir: PathBuf,
    },
    /// Validate an agent output JSON file.
    ValidateOutput {
        /// Agent output JSON file.
        file: PathBuf,
    },
    /// Print the sample agent output for a task card.
    DryRun {
        /// Task card YAML file.
        file: PathBuf,
    },
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    axis::logging::init_cli("warn");

    match cli.command {
        Command::Lint {
            file,
            check_outputs,
            base_dir,
        } => handle_lint(&file, check_outputs.then_some(base_dir)),
        Command::ValidateOutput { file } => handle_validate_output(&file),
        Command::DryRun { file } => handle_dry_run(&file),
    }
}

fn handle_lint(file: &std::path::Path, base_dir: Option<PathBuf>) -> anyhow::Result<ExitCode> {
    let card = load_task_card(file)?;
    let report = lint_task_card(&card, base_dir.as_deref());
    debug!(file = %file.display(), issues = report.issues.len(), "task card linted");

    if report.is_ok() {
        println!("{} OK", file.display());
        return Ok(ExitCode::SUCCESS);
    }
    for issue in &report.issues {
        eprintln!("{issue}");
    }
    Ok(ExitCode::FAILURE)
}

fn handle_validate_output(file: &std::path::Path) -> anyhow::Result<ExitCode> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    match AgentOutput::from_json(&text) {
        Ok(_) => {
            println!("Agent output valid");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("Validation error: {e}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn handle_dry_run(file: &std::path::Path) -> anyhow::Result<ExitCode> {
    let card = load_task_card(file)?;
    let output = serde_json::to_string_pretty(&dry_run(&card))
        .context("failed to serialize agent output")?;
    println!("{output}");
    Ok(ExitCode::SUCCESS)
}
