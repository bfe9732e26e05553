//! Taskcard — tooling for AXIS development task cards.
//!
//! A task card is a YAML mapping describing one unit of work. This crate
//! lints cards for the required field set and validates the structured
//! output an agent produces for a card.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Task card loading and linting.
pub mod card;
/// Agent output schema and validation.
pub mod output;

use std::path::PathBuf;

pub use card::{
    lint_task_card, load_task_card, LintIssue, LintReport, TaskCard, REQUIRED_FIELDS,
};
pub use output::{dry_run, validate_agent_output, AgentOutput};

/// Errors from reading or decoding task cards and agent output.
#[derive(Debug, thiserror::Error)]
pub enum TaskCardError {
    /// The file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// File being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The task card is not valid YAML.
    #[error("invalid task card YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// The task card parsed but its top level is not a mapping.
    #[error("task card must be a mapping, found {0}")]
    NotAMapping(&'static str),
    /// The agent output is not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[source] serde_json::Error),
    /// The agent output does not match the expected shape.
    #[error("agent output does not match schema: {0}")]
    Schema(#[source] serde_json::Error),
}
