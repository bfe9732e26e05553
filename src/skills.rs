//! Behaviour handlers ("skills") and their trigger registry.
//!
//! A skill declares the event kinds it reacts to and the capabilities it
//! claims. Capabilities are informational only; nothing here enforces them.
//! Dispatch isolates each handler so one failure or panic never blocks the
//! others.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::event::Event;

/// Errors a skill may report from [`Skill::on_event`].
#[derive(Debug, thiserror::Error)]
pub enum SkillError {
    /// The event lacked a field the skill needs.
    #[error("event `{kind}` is missing field `{field}`")]
    MissingField {
        /// Event kind being handled.
        kind: String,
        /// Field that was expected.
        field: String,
    },
    /// Any other failure.
    #[error("{0}")]
    Failed(String),
    /// Wrapped error from the skill's own dependencies.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Static description of a skill, used for routing and display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillManifest {
    /// Unique skill name.
    pub name: String,
    /// Skill version string.
    pub version: String,
    /// Event kinds that trigger the skill.
    #[serde(default)]
    pub triggers: Vec<String>,
    /// Declared capabilities, shown to operators but not enforced.
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// A behaviour handler invoked for matching events.
pub trait Skill: Send + Sync {
    /// The skill's manifest.
    fn manifest(&self) -> &SkillManifest;

    /// Handle one event whose kind is among the manifest triggers.
    ///
    /// # Errors
    ///
    /// Returns a [`SkillError`] if the skill could not handle the event.
    fn on_event(&self, event: &Event) -> Result<(), SkillError>;
}

/// One handler failure recorded during dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    /// Skill that failed.
    pub skill: String,
    /// Error or panic message.
    pub reason: String,
}

/// Outcome of dispatching one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers that completed successfully.
    pub delivered: usize,
    /// Handlers that returned an error or panicked.
    pub failed: Vec<HandlerFailure>,
}

/// Skills indexed by trigger event kind.
#[derive(Default)]
pub struct SkillRegistry {
    skills: Vec<Arc<dyn Skill>>,
    by_trigger: HashMap<String, Vec<usize>>,
}

impl fmt::Debug for SkillRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkillRegistry")
            .field("skills", &self.names())
            .finish()
    }
}

impl SkillRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a skill. A skill with the same name is replaced.
    pub fn register(&mut self, skill: Arc<dyn Skill>) {
        let manifest = skill.manifest();
        let name = manifest.name.clone();
        let before = self.skills.len();
        self.skills.retain(|s| s.manifest().name != name);
        if self.skills.len() != before {
            debug!(skill = %name, "replacing registered skill");
        }

        info!(
            skill = %name,
            version = %manifest.version,
            triggers = ?manifest.triggers,
            permissions = ?manifest.permissions,
            "skill registered"
        );
        self.skills.push(skill);
        self.reindex();
    }

    /// Remove a skill by name. Returns whether it was registered.
    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.skills.len();
        self.skills.retain(|s| s.manifest().name != name);
        let removed = self.skills.len() != before;
        if removed {
            self.reindex();
        }
        removed
    }

    fn reindex(&mut self) {
        self.by_trigger.clear();
        for (index, skill) in self.skills.iter().enumerate() {
            for trigger in &skill.manifest().triggers {
                let slots = self.by_trigger.entry(trigger.clone()).or_default();
                if !slots.contains(&index) {
                    slots.push(index);
                }
            }
        }
    }

    /// Number of registered skills.
    pub fn len(&self) -> usize {
        self.skills.len()
    }

    /// Whether no skills are registered.
    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// Registered skill names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.skills
            .iter()
            .map(|s| s.manifest().name.as_str())
            .collect()
    }

    /// Manifests of all registered skills, for display and audit.
    pub fn manifests(&self) -> Vec<SkillManifest> {
        self.skills.iter().map(|s| s.manifest().clone()).collect()
    }

    /// Skills triggered by `kind`, in registration order.
    pub fn handlers_for(&self, kind: &str) -> Vec<Arc<dyn Skill>> {
        self.by_trigger
            .get(kind)
            .map(|slots| {
                slots
                    .iter()
                    .filter_map(|&i| self.skills.get(i).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Invoke every skill triggered by the event's kind.
    ///
    /// Errors and panics are logged and recorded per handler; remaining
    /// handlers still run.
    pub fn dispatch(&self, event: &Event) -> DispatchReport {
        let mut report = DispatchReport::default();

        for skill in self.handlers_for(event.kind()) {
            let name = skill.manifest().name.as_str();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| skill.on_event(event)));
            let reason = match outcome {
                Ok(Ok(())) => {
                    report.delivered = report.delivered.saturating_add(1);
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(payload) => panic_message(payload.as_ref()),
            };

            warn!(skill = %name, kind = %event.kind(), error = %reason, "skill handler failed");
            report.failed.push(HandlerFailure {
                skill: name.to_owned(),
                reason,
            });
        }

        report
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_owned()
    }
}

/// Greets the commander on docking.
#[derive(Debug, Clone)]
pub struct DockedGreeting {
    manifest: SkillManifest,
}

impl DockedGreeting {
    /// Create the skill with its fixed manifest.
    pub fn new() -> Self {
        Self {
            manifest: SkillManifest {
                name: "Hello".to_owned(),
                version: "0.1.0".to_owned(),
                triggers: vec!["Docked".to_owned()],
                permissions: vec!["navigation".to_owned()],
            },
        }
    }

    /// Greeting text for a docking event.
    pub fn greeting(event: &Event) -> String {
        let station = event.get_str("StationName").unwrap_or("unknown station");
        format!("Hello! Docked at {station}")
    }
}

impl Default for DockedGreeting {
    fn default() -> Self {
        Self::new()
    }
}

impl Skill for DockedGreeting {
    fn manifest(&self) -> &SkillManifest {
        &self.manifest
    }

    fn on_event(&self, event: &Event) -> Result<(), SkillError> {
        if event.kind() == "Docked" {
            info!(skill = %self.manifest.name, "{}", Self::greeting(event));
        }
        Ok(())
    }
}
