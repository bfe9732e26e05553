//! Kernel: owns the state machine, watchdog and skills, and runs the
//! journal reader.
//!
//! Lifecycle: [`Kernel::start`] enters the initial state, arms the watchdog
//! and spawns the reader (plus the state update ticker). [`Kernel::stop`]
//! disarms the watchdog and asks the background tasks to finish at their
//! next poll boundary without waiting for them; [`Kernel::shutdown`] also
//! waits, bounded by [`SHUTDOWN_TIMEOUT`].
//!
//! The journal position is checkpointed after every batch the kernel
//! accepts, so a restarted kernel resumes where the previous run stopped
//! instead of replaying the file. A batch that arrives after `stop` is
//! dropped without a checkpoint and is read again by the next `start`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::AxisConfig;
use crate::event::Event;
use crate::fsm::{State, StateMachine, TracedState};
use crate::journal::{EventSink, JournalReader, ReaderError, ReaderStats, StreamPosition};
use crate::skills::{Skill, SkillManifest, SkillRegistry};
use crate::watchdog::{Watchdog, WatchdogError};

/// Upper bound on how long [`Kernel::shutdown`] waits for background tasks.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Extra action run when the watchdog fires.
pub type RecoveryAction = Arc<dyn Fn() + Send + Sync>;

/// Errors reported synchronously by kernel lifecycle calls.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// `start` called while running.
    #[error("kernel is already running")]
    AlreadyRunning,
    /// `stop` called while stopped.
    #[error("kernel is not running")]
    NotRunning,
    /// No journal directory configured and no platform default.
    #[error("no journal directory configured and no default could be resolved")]
    NoJournalDir,
    /// The journal directory does not exist or is not a directory.
    #[error("journal directory {} is not accessible", .0.display())]
    JournalDirUnavailable(PathBuf),
    /// The state machine has no usable initial state.
    #[error("initial state must not be empty")]
    EmptyInitialState,
    /// Reader construction failed.
    #[error(transparent)]
    Reader(#[from] ReaderError),
    /// Watchdog construction failed.
    #[error(transparent)]
    Watchdog(#[from] WatchdogError),
    /// Background tasks did not finish in time.
    #[error("background tasks did not stop within {0:?}")]
    ShutdownTimeout(Duration),
}

/// Point-in-time kernel counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KernelStats {
    /// Events accepted while running.
    pub events_received: u64,
    /// Events discarded because the kernel was stopped.
    pub events_dropped: u64,
    /// Skill handler failures.
    pub handler_errors: u64,
    /// Journal lines that failed to parse.
    pub parse_errors: u64,
    /// Reader poll cycles completed.
    pub polls: u64,
    /// Watchdog pets.
    pub watchdog_pets: u64,
    /// Watchdog timeouts.
    pub watchdog_fires: u64,
}

#[derive(Default)]
struct Counters {
    events_received: AtomicU64,
    events_dropped: AtomicU64,
    handler_errors: AtomicU64,
}

#[derive(Default)]
struct Tasks {
    shutdown_tx: Option<watch::Sender<bool>>,
    reader: Option<JoinHandle<()>>,
    ticker: Option<JoinHandle<()>>,
    reader_stats: Option<Arc<ReaderStats>>,
}

/// Where the next reader picks up. `epoch` identifies the reader spawned
/// by the latest `start`; batches from older readers are ignored.
#[derive(Default)]
struct Resume {
    epoch: u64,
    position: StreamPosition,
}

struct Inner {
    config: AxisConfig,
    running: AtomicBool,
    resume: Mutex<Resume>,
    fsm: Mutex<StateMachine>,
    skills: RwLock<SkillRegistry>,
    watchdog: Watchdog,
    recovery: Option<RecoveryAction>,
    counters: Counters,
    tasks: Mutex<Tasks>,
}

/// The AXIS coordinator.
///
/// Cheap to clone; clones share the same kernel.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("running", &self.is_running())
            .field("current_state", &self.current_state())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Kernel {
    /// Build a stopped kernel from config.
    ///
    /// Registers a [`TracedState`] for the initial state, the recovery
    /// state and every transition target; replace them with
    /// [`Kernel::add_state`].
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Watchdog`] for a zero timeout or when called
    /// outside a Tokio runtime, and [`KernelError::EmptyInitialState`] for a
    /// blank initial state.
    pub fn new(config: AxisConfig) -> Result<Self, KernelError> {
        Self::build(config, None)
    }

    /// [`Kernel::new`] with an extra action run on watchdog timeout.
    ///
    /// # Errors
    ///
    /// Same as [`Kernel::new`].
    pub fn with_recovery<F>(config: AxisConfig, recovery: F) -> Result<Self, KernelError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::build(config, Some(Arc::new(recovery)))
    }

    fn build(config: AxisConfig, recovery: Option<RecoveryAction>) -> Result<Self, KernelError> {
        if config.fsm.initial_state.trim().is_empty() {
            return Err(KernelError::EmptyInitialState);
        }

        let slot: Arc<OnceLock<Weak<Inner>>> = Arc::default();
        let hook = Arc::clone(&slot);
        let watchdog = Watchdog::new(config.watchdog.timeout(), move || {
            if let Some(inner) = hook.get().and_then(Weak::upgrade) {
                inner.on_watchdog_timeout();
            }
        })?;

        let mut fsm = StateMachine::new();
        for name in configured_states(&config) {
            fsm.add_state(name.clone(), TracedState::new(name));
        }

        let inner = Arc::new(Inner {
            config,
            running: AtomicBool::new(false),
            resume: Mutex::new(Resume::default()),
            fsm: Mutex::new(fsm),
            skills: RwLock::new(SkillRegistry::new()),
            watchdog,
            recovery,
            counters: Counters::default(),
            tasks: Mutex::new(Tasks::default()),
        });
        if slot.set(Arc::downgrade(&inner)).is_err() {
            debug!("watchdog hook already bound");
        }

        Ok(Self { inner })
    }

    /// Start the kernel.
    ///
    /// In order: enter the initial state, arm the watchdog, spawn the
    /// journal reader and the state update ticker. The reader resumes from
    /// the position checkpointed by the previous run, if any.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::AlreadyRunning`] if started twice and a
    /// configuration error if the journal directory is missing. Nothing is
    /// started when an error is returned.
    pub fn start(&self) -> Result<(), KernelError> {
        let inner = &self.inner;
        let journal = &inner.config.journal;

        let dir = journal.resolve_dir().ok_or(KernelError::NoJournalDir)?;
        if !dir.is_dir() {
            return Err(KernelError::JournalDirUnavailable(dir));
        }
        let reader = JournalReader::from_config(dir.clone(), journal)?;

        let mut resume = inner.lock_resume();
        if inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(KernelError::AlreadyRunning);
        }
        resume.epoch = resume.epoch.wrapping_add(1);
        let epoch = resume.epoch;
        let reader = reader.with_position(resume.position.clone());
        drop(resume);

        inner
            .lock_fsm()
            .change_state(&inner.config.fsm.initial_state);
        inner.watchdog.start();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reader_stats = reader.stats();
        let sink: Arc<dyn EventSink> = Arc::new(KernelSink {
            inner: Arc::downgrade(inner),
            epoch,
        });
        let reader_task = tokio::spawn(reader.run(sink, shutdown_rx.clone()));

        let ticker_task = match inner.config.fsm.update_interval_ms {
            0 => None,
            ms => Some(tokio::spawn(run_update_ticker(
                Arc::downgrade(inner),
                Duration::from_millis(ms),
                shutdown_rx,
            ))),
        };

        let mut tasks = inner.lock_tasks();
        // A reader left over from `stop` without `shutdown` can no longer
        // deliver, but it should not keep polling either.
        for stale in tasks.reader.take().into_iter().chain(tasks.ticker.take()) {
            stale.abort();
        }
        *tasks = Tasks {
            shutdown_tx: Some(shutdown_tx),
            reader: Some(reader_task),
            ticker: ticker_task,
            reader_stats: Some(reader_stats),
        };
        drop(tasks);

        info!(
            journal_dir = %dir.display(),
            initial_state = %inner.config.fsm.initial_state,
            watchdog_timeout_ms = inner.config.watchdog.timeout_ms,
            "kernel started"
        );
        Ok(())
    }

    /// Stop accepting events, disarm the watchdog and signal the background
    /// tasks to exit at their next poll boundary. Does not wait for them.
    ///
    /// Waits for a batch that is being handled to finish, so it must not be
    /// called from a skill handler or a state hook.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::NotRunning`] if the kernel is not running.
    pub fn stop(&self) -> Result<(), KernelError> {
        let inner = &self.inner;
        let was_running = {
            let _resume = inner.lock_resume();
            inner.running.swap(false, Ordering::SeqCst)
        };
        if !was_running {
            return Err(KernelError::NotRunning);
        }

        inner.watchdog.stop();

        if let Some(tx) = inner.lock_tasks().shutdown_tx.take() {
            if tx.send(true).is_err() {
                debug!("background tasks already exited");
            }
        }

        info!("kernel stopped");
        Ok(())
    }

    /// [`Kernel::stop`], then wait for the background tasks to finish.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::NotRunning`] if the kernel is not running and
    /// [`KernelError::ShutdownTimeout`] if the tasks outlive
    /// [`SHUTDOWN_TIMEOUT`].
    pub async fn shutdown(&self) -> Result<(), KernelError> {
        self.stop()?;

        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.inner.lock_tasks();
            tasks.reader.take().into_iter().chain(tasks.ticker.take()).collect()
        };

        for handle in handles {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "background task ended abnormally"),
                Err(_) => return Err(KernelError::ShutdownTimeout(SHUTDOWN_TIMEOUT)),
            }
        }
        Ok(())
    }

    /// Delivery callback for journal events.
    ///
    /// Pets the watchdog, dispatches to skills triggered by the event kind
    /// and applies a configured transition. Events arriving while stopped
    /// are dropped.
    pub fn handle_event(&self, event: Event) {
        self.inner.handle_event(&event);
    }

    /// Register a state (last registration wins).
    pub fn add_state<S>(&self, name: impl Into<String>, state: S) -> bool
    where
        S: State + 'static,
    {
        self.inner.lock_fsm().add_state(name, state)
    }

    /// Switch state directly. Returns the name now active.
    pub fn change_state(&self, name: &str) -> Option<String> {
        self.inner
            .lock_fsm()
            .change_state(name)
            .map(str::to_owned)
    }

    /// Run the active state's update hook.
    pub fn update(&self) {
        self.inner.lock_fsm().update();
    }

    /// Name of the active state.
    pub fn current_state(&self) -> Option<String> {
        self.inner.lock_fsm().current().map(str::to_owned)
    }

    /// Register a skill (same name replaces).
    pub fn register_skill(&self, skill: Arc<dyn Skill>) {
        self.inner
            .skills
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(skill);
    }

    /// Manifests of registered skills.
    pub fn skill_manifests(&self) -> Vec<SkillManifest> {
        self.inner
            .skills
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .manifests()
    }

    /// Configured event kind to state transitions.
    pub fn transitions(&self) -> &BTreeMap<String, String> {
        &self.inner.config.transitions
    }

    /// Whether the kernel accepts events.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Whether the reader task from the last `start` is still alive.
    pub fn is_reader_running(&self) -> bool {
        self.inner
            .lock_tasks()
            .reader
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Position the next `start` resumes from.
    pub fn journal_position(&self) -> StreamPosition {
        self.inner.lock_resume().position.clone()
    }

    /// The kernel's watchdog.
    pub fn watchdog(&self) -> &Watchdog {
        &self.inner.watchdog
    }

    /// Counter snapshot.
    pub fn stats(&self) -> KernelStats {
        let inner = &self.inner;
        let (parse_errors, polls) = inner
            .lock_tasks()
            .reader_stats
            .as_ref()
            .map(|s| (s.parse_errors(), s.polls()))
            .unwrap_or_default();

        KernelStats {
            events_received: inner.counters.events_received.load(Ordering::Relaxed),
            events_dropped: inner.counters.events_dropped.load(Ordering::Relaxed),
            handler_errors: inner.counters.handler_errors.load(Ordering::Relaxed),
            parse_errors,
            polls,
            watchdog_pets: inner.watchdog.pets(),
            watchdog_fires: inner.watchdog.fires(),
        }
    }
}

impl Inner {
    fn lock_fsm(&self) -> MutexGuard<'_, StateMachine> {
        self.fsm.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_resume(&self) -> MutexGuard<'_, Resume> {
        self.resume.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handle one reader batch and checkpoint its end position. The resume
    /// lock is held throughout so `stop` cannot split a batch.
    fn accept_batch(&self, epoch: u64, events: Vec<Event>, position: &StreamPosition) {
        let mut resume = self.lock_resume();
        if resume.epoch != epoch || !self.running.load(Ordering::SeqCst) {
            if !events.is_empty() {
                self.counters.events_dropped.fetch_add(
                    u64::try_from(events.len()).unwrap_or(u64::MAX),
                    Ordering::Relaxed,
                );
                debug!(count = events.len(), "kernel stopped, dropping batch");
            }
            return;
        }

        for event in &events {
            self.handle_event(event);
        }
        resume.position = position.clone();
    }

    fn handle_event(&self, event: &Event) {
        if !self.running.load(Ordering::SeqCst) {
            self.counters.events_dropped.fetch_add(1, Ordering::Relaxed);
            debug!(kind = %event.kind(), "kernel stopped, dropping event");
            return;
        }
        self.counters.events_received.fetch_add(1, Ordering::Relaxed);

        self.watchdog.pet();

        let report = self
            .skills
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .dispatch(event);
        if !report.failed.is_empty() {
            self.counters.handler_errors.fetch_add(
                u64::try_from(report.failed.len()).unwrap_or(u64::MAX),
                Ordering::Relaxed,
            );
        }

        if let Some(target) = self.config.transitions.get(event.kind()) {
            self.lock_fsm().change_state(target);
        }

        debug!(
            kind = %event.kind(),
            timestamp = %event.timestamp(),
            handlers = report.delivered.saturating_add(report.failed.len()),
            "event handled"
        );
    }

    fn on_watchdog_timeout(&self) {
        error!(
            timeout_ms = self.config.watchdog.timeout_ms,
            "no journal events within watchdog window, running recovery"
        );
        if let Some(recovery) = &self.recovery {
            recovery();
        }
        if let Some(state) = &self.config.watchdog.recovery_state {
            self.lock_fsm().change_state(state);
        }
    }
}

struct KernelSink {
    inner: Weak<Inner>,
    epoch: u64,
}

impl EventSink for KernelSink {
    fn deliver(&self, event: Event) {
        match self.inner.upgrade() {
            Some(inner) => inner.handle_event(&event),
            None => debug!(kind = %event.kind(), "kernel dropped, discarding event"),
        }
    }

    fn deliver_batch(&self, events: Vec<Event>, position: &StreamPosition) {
        match self.inner.upgrade() {
            Some(inner) => inner.accept_batch(self.epoch, events, position),
            None => debug!(count = events.len(), "kernel dropped, discarding batch"),
        }
    }
}

async fn run_update_ticker(
    inner: Weak<Inner>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    // Skip the first immediate tick.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                inner.lock_fsm().update();
            }
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
    debug!("state update ticker stopped");
}

fn configured_states(config: &AxisConfig) -> Vec<String> {
    let mut names = vec![config.fsm.initial_state.clone()];
    names.extend(config.watchdog.recovery_state.iter().cloned());
    names.extend(config.transitions.values().cloned());
    names.sort();
    names.dedup();
    names
}
