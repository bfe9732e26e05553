//! Finite state machine engine.
//!
//! States are registered by name and switched only through explicit
//! [`StateMachine::change_state`] calls; the engine never inspects events.
//! "No active state" is both the starting condition and the result of
//! switching to an unregistered name.
//!
//! A panicking hook is caught and logged. The state stays registered; a
//! failed `enter` leaves no state active.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, error, info, trace};

use crate::skills::panic_message;

/// A named behaviour unit with lifecycle hooks.
///
/// All hooks default to no-ops.
pub trait State: Send {
    /// Called when the state becomes active.
    fn enter(&mut self) {}

    /// Called when the state stops being active.
    fn exit(&mut self) {}

    /// Called periodically while the state is active.
    fn update(&mut self) {}
}

struct ActiveState {
    name: String,
    state: Box<dyn State>,
}

/// Registry of named states with at most one active at a time.
///
/// The active state is held outside the registry while it runs, so
/// re-registering its name replaces only the registry entry: the running
/// instance still receives its `exit`, and the next `change_state` to that
/// name enters the replacement.
#[derive(Default)]
pub struct StateMachine {
    states: HashMap<String, Box<dyn State>>,
    active: Option<ActiveState>,
}

impl fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("states", &self.state_names())
            .field("current", &self.current())
            .finish()
    }
}

impl StateMachine {
    /// Create an empty machine with no active state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `state` under `name`, replacing any earlier registration.
    ///
    /// Returns `true` if a state with that name was already known.
    pub fn add_state<S>(&mut self, name: impl Into<String>, state: S) -> bool
    where
        S: State + 'static,
    {
        self.add_boxed_state(name, Box::new(state))
    }

    /// [`StateMachine::add_state`] for an already boxed state.
    pub fn add_boxed_state(&mut self, name: impl Into<String>, state: Box<dyn State>) -> bool {
        let name = name.into();
        let is_active = self.current() == Some(name.as_str());
        let replaced = self.states.insert(name.clone(), state).is_some() || is_active;
        if replaced {
            debug!(state = %name, "state re-registered, last registration wins");
        }
        replaced
    }

    /// Whether `name` is registered (active or not).
    pub fn contains(&self, name: &str) -> bool {
        self.states.contains_key(name) || self.current() == Some(name)
    }

    /// Registered state names, sorted.
    pub fn state_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.states.keys().map(String::as_str).collect();
        if let Some(active) = &self.active {
            if !self.states.contains_key(&active.name) {
                names.push(&active.name);
            }
        }
        names.sort_unstable();
        names
    }

    /// Name of the active state, if any.
    pub fn current(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.name.as_str())
    }

    /// Exit the active state (if any), then enter `name`.
    ///
    /// An unknown name, or an `enter` hook that panics, leaves the machine
    /// with no active state. Returns the name of the state now active.
    pub fn change_state(&mut self, name: &str) -> Option<&str> {
        let previous = self.active.take();
        let from = previous.as_ref().map(|p| p.name.clone());

        if let Some(mut previous) = previous {
            run_hook(&previous.name, "exit", || previous.state.exit());
            // Keep a replacement registered while the old instance was active.
            self.states.entry(previous.name).or_insert(previous.state);
        }

        match self.states.remove(name) {
            Some(mut state) => {
                if run_hook(name, "enter", || state.enter()) {
                    self.active = Some(ActiveState {
                        name: name.to_owned(),
                        state,
                    });
                    info!(from = ?from, to = %name, "state changed");
                } else {
                    self.states.insert(name.to_owned(), state);
                    info!(from = ?from, requested = %name, "state failed to enter, no state active");
                }
            }
            None => {
                info!(from = ?from, requested = %name, "unknown state, no state active");
            }
        }

        self.current()
    }

    /// Run the active state's `update` hook. No-op without an active state.
    pub fn update(&mut self) {
        if let Some(active) = &mut self.active {
            run_hook(&active.name, "update", || active.state.update());
        }
    }
}

/// Run one lifecycle hook, catching a panic. Returns `false` if it panicked.
fn run_hook(state: &str, hook: &str, f: impl FnOnce()) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(payload) => {
            error!(
                state = %state,
                hook = %hook,
                error = %panic_message(payload.as_ref()),
                "state hook failed"
            );
            false
        }
    }
}

/// State that only logs its lifecycle.
///
/// Registered by the kernel for configured state names that have no
/// behaviour of their own.
#[derive(Debug, Clone)]
pub struct TracedState {
    name: String,
}

impl TracedState {
    /// Create a traced state labelled `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl State for TracedState {
    fn enter(&mut self) {
        info!(state = %self.name, "entering state");
    }

    fn exit(&mut self) {
        info!(state = %self.name, "exiting state");
    }

    fn update(&mut self) {
        trace!(state = %self.name, "state update");
    }
}
