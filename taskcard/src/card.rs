use std::fmt;
use std::path::Path;

use serde_yaml::{Mapping, Value};

use crate::TaskCardError;

/// A parsed task card: the top-level YAML mapping, in document order.
pub type TaskCard = Mapping;

/// Fields every task card must carry, and the only fields it may carry.
pub const REQUIRED_FIELDS: [&str; 10] = [
    "id",
    "title",
    "objective",
    "scope",
    "constraints",
    "inputs",
    "outputs",
    "acceptance",
    "checks",
    "risk",
];

/// One problem found in a task card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LintIssue {
    /// A required field is absent.
    MissingField(String),
    /// A field outside the required set is present.
    UnknownField(String),
    /// `outputs` is not a list of strings.
    OutputsNotList,
    /// A listed output path does not exist.
    OutputMissing(String),
}

impl fmt::Display for LintIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField(field) => write!(f, "Missing field: {field}"),
            Self::UnknownField(field) => write!(f, "Unknown field: {field}"),
            Self::OutputsNotList => write!(f, "Field `outputs` must be a list of strings"),
            Self::OutputMissing(path) => write!(f, "Output path does not exist: {path}"),
        }
    }
}

/// Every issue found in one card, in field order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LintReport {
    /// Issues found; empty means the card is clean.
    pub issues: Vec<LintIssue>,
}

impl LintReport {
    /// Whether the card passed.
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Read and parse a task card file.
///
/// An empty document is an empty card.
///
/// # Errors
///
/// Returns [`TaskCardError::Read`] if the file cannot be read,
/// [`TaskCardError::Yaml`] if it is not valid YAML and
/// [`TaskCardError::NotAMapping`] if the top level is not a mapping.
pub fn load_task_card(path: &Path) -> Result<TaskCard, TaskCardError> {
    let contents = std::fs::read_to_string(path).map_err(|source| TaskCardError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    match serde_yaml::from_str::<Value>(&contents)? {
        Value::Null => Ok(TaskCard::new()),
        Value::Mapping(card) => Ok(card),
        other => Err(TaskCardError::NotAMapping(kind_name(&other))),
    }
}

/// Lint a parsed task card.
///
/// Missing fields are reported in [`REQUIRED_FIELDS`] order, followed by
/// unknown fields. With `outputs_base` set, each output path is resolved
/// against it and must exist.
pub fn lint_task_card(card: &TaskCard, outputs_base: Option<&Path>) -> LintReport {
    let mut issues: Vec<LintIssue> = REQUIRED_FIELDS
        .iter()
        .filter(|field| !card.contains_key(**field))
        .map(|field| LintIssue::MissingField((*field).to_owned()))
        .collect();

    issues.extend(
        card.keys()
            .filter(|key| key.as_str().is_none_or(|k| !REQUIRED_FIELDS.contains(&k)))
            .map(|key| LintIssue::UnknownField(key_label(key))),
    );

    match card.get("outputs") {
        None => {}
        Some(value) => match output_paths(value) {
            None => issues.push(LintIssue::OutputsNotList),
            Some(paths) => {
                if let Some(base) = outputs_base {
                    issues.extend(
                        paths
                            .into_iter()
                            .filter(|p| !base.join(p).exists())
                            .map(LintIssue::OutputMissing),
                    );
                }
            }
        },
    }

    LintReport { issues }
}

/// The card's `outputs` as strings, or `None` if it is not a string list.
pub(crate) fn output_paths(value: &Value) -> Option<Vec<String>> {
    value
        .as_sequence()?
        .iter()
        .map(|item| item.as_str().map(str::to_owned))
        .collect()
}

/// Render a scalar key or value the way it reads in the card.
pub(crate) fn key_label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_owned(),
        other => kind_name(other).to_owned(),
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}
