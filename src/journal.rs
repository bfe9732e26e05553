//! Journal tailing with rotation tracking.
//!
//! The reader watches a directory for files matching a glob (by default
//! `Journal.*.log`), always tails the highest-sorting one, and turns each
//! complete line into an [`Event`]. Reads use synchronous `std::fs` calls
//! since these are quick local operations.
//!
//! File identity is the path alone: a file truncated and rewritten under the
//! same name is not detected as a rotation.

use std::fs;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::JournalConfig;
use crate::event::Event;

/// Errors raised while locating or reading journal files.
///
/// Everything except [`ReaderError::InvalidPattern`] is transient: the
/// polling loop logs it and retries after a backoff.
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    /// The file name glob does not compile.
    #[error("invalid journal file pattern `{pattern}`: {source}")]
    InvalidPattern {
        /// Pattern as configured.
        pattern: String,
        /// Underlying glob error.
        #[source]
        source: glob::PatternError,
    },
    /// The journal directory could not be listed.
    #[error("failed to list journal directory {}: {source}", path.display())]
    ListDir {
        /// Directory being listed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A journal file could not be opened or positioned.
    #[error("failed to open journal file {}: {source}", path.display())]
    Open {
        /// File being opened.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Reading from an open journal file failed.
    #[error("failed to read journal file {}: {source}", path.display())]
    Read {
        /// File being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Glob applied to file names (not full paths) in the journal directory.
#[derive(Debug, Clone)]
pub struct FilePattern {
    pattern: glob::Pattern,
}

impl FilePattern {
    /// Compile a file name glob such as `Journal.*.log`.
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError::InvalidPattern`] if the glob is malformed.
    pub fn new(pattern: &str) -> Result<Self, ReaderError> {
        glob::Pattern::new(pattern)
            .map(|pattern| Self { pattern })
            .map_err(|source| ReaderError::InvalidPattern {
                pattern: pattern.to_owned(),
                source,
            })
    }

    /// Whether a file name matches.
    pub fn matches(&self, file_name: &str) -> bool {
        self.pattern.matches(file_name)
    }

    /// The pattern text.
    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }
}

/// The tailed file and the number of its bytes already consumed.
///
/// `skipping` is set while the reader is discarding the rest of an
/// oversized line that has not been terminated yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamPosition {
    file: Option<PathBuf>,
    offset: u64,
    skipping: bool,
}

impl StreamPosition {
    /// File currently being tailed, if any.
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// Byte offset just past the last consumed line.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Whether the reader is in the middle of discarding an oversized line.
    pub fn is_skipping(&self) -> bool {
        self.skipping
    }

    fn start_of(file: PathBuf) -> Self {
        Self {
            file: Some(file),
            offset: 0,
            skipping: false,
        }
    }

    fn advance(&mut self, offset: u64) {
        self.offset = self.offset.max(offset);
    }
}

/// Result of a single poll cycle.
#[derive(Debug, Default)]
pub struct PollOutcome {
    /// File that was read, `None` if the directory had no journal files.
    pub file: Option<PathBuf>,
    /// Whether this cycle switched to a new file.
    pub rotated: bool,
    /// Parsed events in file order.
    pub events: Vec<Event>,
    /// Lines that failed to parse and were skipped.
    pub parse_errors: u64,
    /// Lines skipped for exceeding the length limit.
    pub oversized_lines: u64,
}

/// Running counters shared between the polling loop and observers.
#[derive(Debug, Default)]
pub struct ReaderStats {
    polls: AtomicU64,
    rotations: AtomicU64,
    events: AtomicU64,
    parse_errors: AtomicU64,
    oversized_lines: AtomicU64,
    io_errors: AtomicU64,
}

impl ReaderStats {
    /// Completed poll cycles, successful or not.
    pub fn polls(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }

    /// File switches observed.
    pub fn rotations(&self) -> u64 {
        self.rotations.load(Ordering::Relaxed)
    }

    /// Events parsed.
    pub fn events(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }

    /// Malformed lines skipped.
    pub fn parse_errors(&self) -> u64 {
        self.parse_errors.load(Ordering::Relaxed)
    }

    /// Oversized lines skipped.
    pub fn oversized_lines(&self) -> u64 {
        self.oversized_lines.load(Ordering::Relaxed)
    }

    /// Poll cycles that failed with an I/O error.
    pub fn io_errors(&self) -> u64 {
        self.io_errors.load(Ordering::Relaxed)
    }

    fn record(&self, outcome: &PollOutcome) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        if outcome.rotated {
            self.rotations.fetch_add(1, Ordering::Relaxed);
        }
        self.events
            .fetch_add(u64::try_from(outcome.events.len()).unwrap_or(u64::MAX), Ordering::Relaxed);
        self.parse_errors
            .fetch_add(outcome.parse_errors, Ordering::Relaxed);
        self.oversized_lines
            .fetch_add(outcome.oversized_lines, Ordering::Relaxed);
    }

    fn record_io_error(&self) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        self.io_errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// Receiver of parsed events, invoked synchronously in journal order.
pub trait EventSink: Send + Sync {
    /// Take ownership of one event.
    fn deliver(&self, event: Event);

    /// Take one poll cycle's events together with the position just past
    /// them. Called after every successful cycle that found a file, even
    /// when `events` is empty.
    ///
    /// The default delivers each event in order and ignores the position.
    fn deliver_batch(&self, events: Vec<Event>, position: &StreamPosition) {
        let _ = position;
        for event in events {
            self.deliver(event);
        }
    }
}

impl<F> EventSink for F
where
    F: Fn(Event) + Send + Sync,
{
    fn deliver(&self, event: Event) {
        self(event);
    }
}

/// Tails the newest journal file in a directory.
#[derive(Debug)]
pub struct JournalReader {
    dir: PathBuf,
    pattern: FilePattern,
    position: StreamPosition,
    poll_interval: Duration,
    retry_backoff: Duration,
    max_line_bytes: usize,
    stats: Arc<ReaderStats>,
}

impl JournalReader {
    /// Create a reader with default cadence for `dir`.
    pub fn new(dir: PathBuf, pattern: FilePattern) -> Self {
        let defaults = JournalConfig::default();
        Self {
            dir,
            pattern,
            position: StreamPosition::default(),
            poll_interval: defaults.poll_interval(),
            retry_backoff: defaults.retry_backoff(),
            max_line_bytes: defaults.max_line_bytes,
            stats: Arc::new(ReaderStats::default()),
        }
    }

    /// Create a reader for `dir` using the pattern and cadence from config.
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError::InvalidPattern`] if the configured glob is malformed.
    pub fn from_config(dir: PathBuf, config: &JournalConfig) -> Result<Self, ReaderError> {
        let pattern = FilePattern::new(&config.pattern)?;
        Ok(Self::new(dir, pattern)
            .with_poll_interval(config.poll_interval())
            .with_retry_backoff(config.retry_backoff())
            .with_max_line_bytes(config.max_line_bytes))
    }

    /// Resume from a position saved by an earlier reader.
    ///
    /// If the latest file differs from `position.file()` the position is
    /// discarded on the first poll, as with any rotation.
    #[must_use]
    pub fn with_position(mut self, position: StreamPosition) -> Self {
        self.position = position;
        self
    }

    /// Set the sleep between successful poll cycles.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the sleep after an empty directory or I/O error.
    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Set the longest line that will be parsed.
    #[must_use]
    pub fn with_max_line_bytes(mut self, max: usize) -> Self {
        self.max_line_bytes = max;
        self
    }

    /// Directory being watched.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current tail position.
    pub fn position(&self) -> &StreamPosition {
        &self.position
    }

    /// Shared counters for this reader.
    pub fn stats(&self) -> Arc<ReaderStats> {
        Arc::clone(&self.stats)
    }

    /// Highest-sorting file name in the directory that matches the pattern.
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError::ListDir`] if the directory cannot be listed.
    pub fn latest_file(&self) -> Result<Option<PathBuf>, ReaderError> {
        let list_err = |source| ReaderError::ListDir {
            path: self.dir.clone(),
            source,
        };

        let mut latest: Option<(String, PathBuf)> = None;
        for entry in fs::read_dir(&self.dir).map_err(list_err)? {
            let entry = entry.map_err(list_err)?;
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if !self.pattern.matches(&name) {
                continue;
            }
            let is_later = latest.as_ref().is_none_or(|(best, _)| name > *best);
            if is_later {
                latest = Some((name, entry.path()));
            }
        }

        Ok(latest.map(|(_, path)| path))
    }

    /// Run one poll cycle: pick the latest file, follow a rotation if one
    /// happened, and parse every complete line appended since the last cycle.
    ///
    /// The offset only moves past newline-terminated lines, so a partially
    /// written trailing line is picked up once it is finished. Malformed
    /// lines, lines that are not UTF-8 and lines longer than the limit are
    /// logged and skipped. At most `max_line_bytes + 1` bytes of a line are
    /// buffered.
    ///
    /// # Errors
    ///
    /// Returns a [`ReaderError`] if the directory or file cannot be read.
    /// The position, including any pending rotation, is only committed when
    /// the cycle succeeds.
    pub fn poll_once(&mut self) -> Result<PollOutcome, ReaderError> {
        let result = self.read_new_events();
        match &result {
            Ok(outcome) => self.stats.record(outcome),
            Err(_) => self.stats.record_io_error(),
        }
        result
    }

    fn read_new_events(&mut self) -> Result<PollOutcome, ReaderError> {
        let Some(latest) = self.latest_file()? else {
            return Ok(PollOutcome::default());
        };

        let rotated = self.position.file() != Some(latest.as_path());
        let mut position = if rotated {
            StreamPosition::start_of(latest.clone())
        } else {
            self.position.clone()
        };

        let open_err = |source| ReaderError::Open {
            path: latest.clone(),
            source,
        };
        let read_err = |source| ReaderError::Read {
            path: latest.clone(),
            source,
        };
        let file = fs::File::open(&latest).map_err(open_err)?;
        let mut reader = BufReader::new(file);
        reader
            .seek(SeekFrom::Start(position.offset()))
            .map_err(open_err)?;

        let mut outcome = PollOutcome {
            file: Some(latest.clone()),
            rotated,
            ..PollOutcome::default()
        };
        let mut consumed = position.offset();

        if position.skipping {
            let (skipped, terminated) = skip_line(&mut reader).map_err(read_err)?;
            consumed = consumed.saturating_add(skipped);
            position.skipping = !terminated;
        }

        let limit = u64::try_from(self.max_line_bytes)
            .unwrap_or(u64::MAX)
            .saturating_add(1);
        let mut line = Vec::new();

        while !position.skipping {
            line.clear();
            let bytes_read = (&mut reader)
                .take(limit)
                .read_until(b'\n', &mut line)
                .map_err(read_err)?;
            if bytes_read == 0 {
                break;
            }
            let terminated = line.last() == Some(&b'\n');

            if bytes_read > self.max_line_bytes {
                let mut skipped = u64::try_from(bytes_read).unwrap_or(u64::MAX);
                if !terminated {
                    let (rest, found_end) = skip_line(&mut reader).map_err(read_err)?;
                    skipped = skipped.saturating_add(rest);
                    position.skipping = !found_end;
                }
                consumed = consumed.saturating_add(skipped);
                outcome.oversized_lines = outcome.oversized_lines.saturating_add(1);
                warn!(
                    file = %latest.display(),
                    limit = self.max_line_bytes,
                    "skipping oversized journal line"
                );
                continue;
            }

            // Unterminated tail: leave it for a later cycle.
            if !terminated {
                debug!(file = %latest.display(), bytes = bytes_read, "partial line pending");
                break;
            }

            consumed = consumed.saturating_add(u64::try_from(bytes_read).unwrap_or(u64::MAX));

            let text = match std::str::from_utf8(&line) {
                Ok(text) => text.trim(),
                Err(e) => {
                    outcome.parse_errors = outcome.parse_errors.saturating_add(1);
                    error!(
                        file = %latest.display(),
                        error = %e,
                        "failed to parse journal entry"
                    );
                    continue;
                }
            };
            if text.is_empty() {
                continue;
            }

            match Event::parse_line(text) {
                Ok(event) => outcome.events.push(event),
                Err(e) => {
                    outcome.parse_errors = outcome.parse_errors.saturating_add(1);
                    error!(
                        file = %latest.display(),
                        error = %e,
                        line = %text,
                        "failed to parse journal entry"
                    );
                }
            }
        }

        position.advance(consumed);
        if rotated {
            info!(
                file = %latest.display(),
                previous = ?self.position.file().map(Path::display),
                "monitoring new journal file"
            );
        }
        self.position = position;
        Ok(outcome)
    }

    /// Poll until `shutdown_rx` flips to `true` or its sender is dropped.
    ///
    /// Each parsed event is handed to `sink` in journal order before the next
    /// cycle begins. An empty directory or I/O error is logged and retried
    /// after the backoff. Shutdown is observed between cycles.
    pub async fn run(mut self, sink: Arc<dyn EventSink>, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            dir = %self.dir.display(),
            pattern = %self.pattern.as_str(),
            "journal reader started"
        );

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let delay = match self.poll_once() {
                Ok(outcome) if outcome.file.is_none() => {
                    warn!(dir = %self.dir.display(), "no journal files found");
                    self.retry_backoff
                }
                Ok(outcome) => {
                    sink.deliver_batch(outcome.events, &self.position);
                    self.poll_interval
                }
                Err(e) => {
                    error!(error = %e, "error reading journal");
                    self.retry_backoff
                }
            };

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!(dir = %self.dir.display(), "journal reader stopped");
    }
}

/// Discard bytes up to and including the next newline without buffering
/// them. Returns the bytes discarded and whether a newline was found.
fn skip_line<R: BufRead>(reader: &mut R) -> io::Result<(u64, bool)> {
    let mut skipped: u64 = 0;
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            return Ok((skipped, false));
        }
        let (len, found) = match buf.iter().position(|&b| b == b'\n') {
            Some(i) => (i.saturating_add(1), true),
            None => (buf.len(), false),
        };
        reader.consume(len);
        skipped = skipped.saturating_add(u64::try_from(len).unwrap_or(u64::MAX));
        if found {
            return Ok((skipped, true));
        }
    }
}

/// Platform default location of the game journal.
///
/// Linux installs run under Steam Proton, so the journal lives inside the
/// compatdata prefix.
pub fn default_journal_dir() -> Option<PathBuf> {
    let home = directories::BaseDirs::new()?.home_dir().to_path_buf();
    let saved_games = Path::new("Saved Games")
        .join("Frontier Developments")
        .join("Elite Dangerous");

    if cfg!(target_os = "linux") {
        Some(
            home.join(".local/share/Steam/steamapps/compatdata/359320/pfx/drive_c/users/steamuser")
                .join(saved_games),
        )
    } else {
        Some(home.join(saved_games))
    }
}
