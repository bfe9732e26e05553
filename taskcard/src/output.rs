use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::card::{key_label, output_paths, TaskCard};
use crate::TaskCardError;

/// Structured result an agent returns for a task card.
///
/// Every field is required and unknown fields are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentOutput {
    /// Step-by-step plan.
    pub plan: String,
    /// Files the agent will create or edit.
    pub files_to_create_or_edit: Vec<String>,
    /// How the change will be tested.
    pub test_plan: String,
    /// Commands the agent will run.
    pub commands: Vec<String>,
    /// Risks considered and how they are checked.
    pub risk_checks: String,
    /// How to undo the change.
    pub rollback: String,
}

impl AgentOutput {
    /// Parse and validate agent output from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`TaskCardError::Json`] for malformed JSON and
    /// [`TaskCardError::Schema`] if the document has the wrong shape.
    pub fn from_json(text: &str) -> Result<Self, TaskCardError> {
        let value: Value = serde_json::from_str(text).map_err(TaskCardError::Json)?;
        validate_agent_output(&value)
    }
}

/// Validate a decoded JSON document against the agent output shape.
///
/// # Errors
///
/// Returns [`TaskCardError::Schema`] if the value is not an object with
/// exactly the [`AgentOutput`] fields and types.
pub fn validate_agent_output(value: &Value) -> Result<AgentOutput, TaskCardError> {
    AgentOutput::deserialize(value).map_err(TaskCardError::Schema)
}

/// Sample output for a card: review the task and touch its outputs.
///
/// A card without an `id` is reported as `unknown`; missing or malformed
/// `outputs` yield no files.
pub fn dry_run(card: &TaskCard) -> AgentOutput {
    let id = card
        .get("id")
        .map_or_else(|| "unknown".to_owned(), key_label);
    let files = card.get("outputs").and_then(output_paths).unwrap_or_default();

    AgentOutput {
        plan: format!("Review task {id}"),
        files_to_create_or_edit: files,
        test_plan: "noop".to_owned(),
        commands: vec!["echo dry-run".to_owned()],
        risk_checks: "none".to_owned(),
        rollback: String::new(),
    }
}
