//! Liveness watchdog.
//!
//! A countdown that fires a callback when it has not been petted within the
//! timeout window. Arm, cancel and fire are serialized behind one lock; each
//! arm bumps a generation counter so a timer task that lost a race with a
//! later `pet` or `stop` recognises itself as stale and exits quietly.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Errors raised when constructing a [`Watchdog`].
#[derive(Debug, thiserror::Error)]
pub enum WatchdogError {
    /// A zero timeout would fire immediately on every arm.
    #[error("watchdog timeout must be greater than zero")]
    ZeroTimeout,
    /// Timers are Tokio tasks, so a runtime must be available.
    #[error("watchdog requires a Tokio runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

type Callback = Arc<dyn Fn() + Send + Sync>;

struct TimerState {
    last_pet: Instant,
    armed: bool,
    generation: u64,
    pending: Option<JoinHandle<()>>,
}

struct Shared {
    timeout: Duration,
    callback: Callback,
    runtime: Handle,
    state: Mutex<TimerState>,
    pets: AtomicU64,
    fires: AtomicU64,
}

/// Restart-safe countdown timer.
///
/// Cloning yields another handle to the same timer.
#[derive(Clone)]
pub struct Watchdog {
    shared: Arc<Shared>,
}

impl fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watchdog")
            .field("timeout", &self.shared.timeout)
            .field("armed", &self.is_armed())
            .field("pets", &self.pets())
            .field("fires", &self.fires())
            .finish()
    }
}

impl Watchdog {
    /// Create a disarmed watchdog bound to the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`WatchdogError::ZeroTimeout`] for a zero timeout and
    /// [`WatchdogError::NoRuntime`] outside a Tokio runtime.
    pub fn new<F>(timeout: Duration, callback: F) -> Result<Self, WatchdogError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        if timeout.is_zero() {
            return Err(WatchdogError::ZeroTimeout);
        }
        let runtime = Handle::try_current()?;

        Ok(Self {
            shared: Arc::new(Shared {
                timeout,
                callback: Arc::new(callback),
                runtime,
                state: Mutex::new(TimerState {
                    last_pet: Instant::now(),
                    armed: false,
                    generation: 0,
                    pending: None,
                }),
                pets: AtomicU64::new(0),
                fires: AtomicU64::new(0),
            }),
        })
    }

    /// Record now as the last pet and arm the timer.
    ///
    /// Any timer scheduled by an earlier arm is cancelled first.
    pub fn start(&self) {
        let mut state = self.shared.lock();
        state.last_pet = Instant::now();
        state.armed = true;
        self.shared.arm(&mut state, self.shared.timeout);
        debug!(timeout_ms = millis(self.shared.timeout), "watchdog armed");
    }

    /// Signal liveness. While armed this restarts the timeout window.
    pub fn pet(&self) {
        self.shared.pets.fetch_add(1, Ordering::Relaxed);
        let mut state = self.shared.lock();
        state.last_pet = Instant::now();
        if state.armed {
            self.shared.arm(&mut state, self.shared.timeout);
        }
    }

    /// Disarm and cancel any pending timer. Safe to call repeatedly or
    /// before [`Watchdog::start`].
    pub fn stop(&self) {
        let mut state = self.shared.lock();
        if state.armed {
            debug!("watchdog disarmed");
        }
        state.armed = false;
        state.generation = state.generation.wrapping_add(1);
        if let Some(pending) = state.pending.take() {
            pending.abort();
        }
    }

    /// Configured timeout.
    pub fn timeout(&self) -> Duration {
        self.shared.timeout
    }

    /// Whether the watchdog is between `start` and `stop`.
    pub fn is_armed(&self) -> bool {
        self.shared.lock().armed
    }

    /// Time since the last pet (or start).
    pub fn since_last_pet(&self) -> Duration {
        self.shared.lock().last_pet.elapsed()
    }

    /// Total `pet` calls.
    pub fn pets(&self) -> u64 {
        self.shared.pets.load(Ordering::Relaxed)
    }

    /// Total callback invocations.
    pub fn fires(&self) -> u64 {
        self.shared.fires.load(Ordering::Relaxed)
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm(self: &Arc<Self>, state: &mut TimerState, after: Duration) {
        if let Some(pending) = state.pending.take() {
            pending.abort();
        }
        state.generation = state.generation.wrapping_add(1);
        let generation = state.generation;
        let shared = Arc::clone(self);
        state.pending = Some(self.runtime.spawn(async move {
            tokio::time::sleep(after).await;
            shared.fire(generation);
        }));
    }

    fn fire(self: &Arc<Self>, generation: u64) {
        {
            let mut state = self.lock();
            if !state.armed || state.generation != generation {
                return;
            }
            state.pending = None;

            let elapsed = state.last_pet.elapsed();
            if elapsed < self.timeout {
                // A pet landed without re-arming; wait out the rest of its window.
                let remaining = self.timeout.saturating_sub(elapsed);
                self.arm(&mut state, remaining);
                return;
            }
        }

        self.fires.fetch_add(1, Ordering::Relaxed);
        warn!(timeout_ms = millis(self.timeout), "watchdog timeout fired");
        (self.callback)();
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
