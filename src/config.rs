//! Configuration loading and validation.
//!
//! Loads `axis.toml` with per-section defaults. All sections use
//! `#[serde(default)]` so a minimal or empty config file is valid.
//!
//! Precedence: env vars > config file > defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::journal::{self, FilePattern};

/// Env var naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "AXIS_CONFIG";

/// Top-level AXIS configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AxisConfig {
    /// Journal directory and polling cadence.
    pub journal: JournalConfig,

    /// Liveness watchdog settings.
    pub watchdog: WatchdogConfig,

    /// State machine start-up and update cadence.
    pub fsm: FsmConfig,

    /// Event kind to state name transitions driven by the kernel.
    pub transitions: BTreeMap<String, String>,

    /// Log output settings.
    pub logging: LoggingConfig,
}

/// Journal directory and polling cadence.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Directory holding journal files. Falls back to the platform default.
    pub dir: Option<PathBuf>,

    /// Glob matched against file names in `dir`.
    pub pattern: String,

    /// Milliseconds between poll cycles.
    pub poll_interval_ms: u64,

    /// Milliseconds to wait after an empty directory or I/O error.
    pub retry_backoff_ms: u64,

    /// Lines longer than this many bytes are skipped.
    pub max_line_bytes: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            dir: None,
            pattern: default_pattern(),
            poll_interval_ms: 100,
            retry_backoff_ms: 1000,
            max_line_bytes: 1_048_576,
        }
    }
}

impl JournalConfig {
    /// Configured directory, or the platform journal location.
    pub fn resolve_dir(&self) -> Option<PathBuf> {
        self.dir.clone().or_else(journal::default_journal_dir)
    }

    /// Poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Retry backoff as a [`Duration`].
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Liveness watchdog settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Milliseconds without a journal event before the watchdog fires.
    pub timeout_ms: u64,

    /// State to enter when the watchdog fires.
    pub recovery_state: Option<String>,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 3000,
            recovery_state: None,
        }
    }
}

impl WatchdogConfig {
    /// Timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// State machine start-up and update cadence.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FsmConfig {
    /// State entered when the kernel starts.
    pub initial_state: String,

    /// Milliseconds between `update` hook calls. Zero disables the ticker.
    pub update_interval_ms: u64,
}

impl Default for FsmConfig {
    fn default() -> Self {
        Self {
            initial_state: "idle".to_owned(),
            update_interval_ms: 1000,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}

fn default_pattern() -> String {
    "Journal.*.log".to_owned()
}

impl AxisConfig {
    /// Load configuration with env overrides applied and validated.
    ///
    /// With `path` set the file must exist. Without it, `$AXIS_CONFIG` or
    /// `~/.axis/axis.toml` is tried and a missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or the
    /// resulting configuration is invalid.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// [`AxisConfig::load`] with a custom env resolver.
    ///
    /// # Errors
    ///
    /// Same as [`AxisConfig::load`].
    pub fn load_with(
        path: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => load_config(path)?,
            None => {
                let path = match env(CONFIG_PATH_ENV) {
                    Some(p) => PathBuf::from(p),
                    None => default_config_path()?,
                };
                match std::fs::read_to_string(&path) {
                    Ok(contents) => {
                        tracing::info!(path = %path.display(), "loading config from file");
                        Self::from_toml(&contents)
                            .with_context(|| format!("failed to parse config at {}", path.display()))?
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        tracing::info!("no config file found, using defaults");
                        Self::default()
                    }
                    Err(e) => {
                        return Err(anyhow::Error::new(e)
                            .context(format!("failed to read config at {}", path.display())));
                    }
                }
            }
        };

        config.apply_overrides(env);
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML string into config without overrides or validation.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or has wrong field types.
    pub fn from_toml(toml_str: &str) -> anyhow::Result<Self> {
        toml::from_str(toml_str).context("failed to parse config TOML")
    }

    /// Apply environment variable overrides (env > config > defaults).
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("AXIS_JOURNAL_DIR") {
            self.journal.dir = Some(PathBuf::from(v));
        }
        if let Some(v) = env("AXIS_WATCHDOG_TIMEOUT_MS") {
            match v.parse() {
                Ok(n) => self.watchdog.timeout_ms = n,
                Err(_) => tracing::warn!(
                    var = "AXIS_WATCHDOG_TIMEOUT_MS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("AXIS_LOG_LEVEL") {
            self.logging.level = v;
        }
    }

    /// Check the values that would otherwise fail only once loops start.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.watchdog.timeout_ms == 0 {
            anyhow::bail!("watchdog.timeout_ms must be greater than zero");
        }
        if self.journal.poll_interval_ms == 0 {
            anyhow::bail!("journal.poll_interval_ms must be greater than zero");
        }
        if self.journal.retry_backoff_ms == 0 {
            anyhow::bail!("journal.retry_backoff_ms must be greater than zero");
        }
        if self.journal.max_line_bytes == 0 {
            anyhow::bail!("journal.max_line_bytes must be greater than zero");
        }
        if self.fsm.initial_state.trim().is_empty() {
            anyhow::bail!("fsm.initial_state must not be empty");
        }
        FilePattern::new(&self.journal.pattern).context("journal.pattern is invalid")?;
        Ok(())
    }
}

/// Load config from an explicit TOML file path, without env overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<AxisConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    AxisConfig::from_toml(&contents)
        .with_context(|| format!("failed to parse config at {}", path.display()))
}

/// Resolve the default config directory (`~/.axis/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".axis"))
}

/// Default config file path (`~/.axis/axis.toml`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
    Ok(config_dir()?.join("axis.toml"))
}
