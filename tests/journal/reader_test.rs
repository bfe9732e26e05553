//! Tailing a single journal file.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axis::event::Event;
use axis::journal::{EventSink, FilePattern, JournalReader};
use tokio::sync::watch;

fn reader(dir: &Path) -> JournalReader {
    JournalReader::new(
        dir.to_path_buf(),
        FilePattern::new("Journal.*.log").expect("pattern"),
    )
}

fn append(path: &Path, text: &str) {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .expect("open journal");
    f.write_all(text.as_bytes()).expect("append");
}

fn kinds(events: &[Event]) -> Vec<String> {
    events.iter().map(|e| e.kind().to_owned()).collect()
}

#[test]
fn delivers_appended_events_in_order_without_repeats() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("Journal.2025-08-29T100000.01.log");
    append(
        &path,
        "{\"timestamp\":\"t1\",\"event\":\"Startup\"}\n{\"timestamp\":\"t2\",\"event\":\"Location\"}\n",
    );

    let mut reader = reader(dir.path());
    let first = reader.poll_once().expect("poll");
    assert!(first.rotated, "first file counts as a switch");
    assert_eq!(kinds(&first.events), vec!["Startup", "Location"]);

    let idle = reader.poll_once().expect("poll");
    assert!(idle.events.is_empty(), "nothing new, nothing re-read");
    assert!(!idle.rotated);

    append(&path, "{\"timestamp\":\"t3\",\"event\":\"FSDJump\"}\n");
    let next = reader.poll_once().expect("poll");
    assert_eq!(kinds(&next.events), vec!["FSDJump"]);
    assert_eq!(reader.stats().events(), 3);
}

#[test]
fn partial_line_is_delivered_once_completed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("Journal.1.log");
    append(&path, "{\"timestamp\":\"t1\",\"event\":\"Undo");

    let mut reader = reader(dir.path());
    assert!(reader.poll_once().expect("poll").events.is_empty());
    assert_eq!(reader.position().offset(), 0);

    append(&path, "cked\"}\n");
    let outcome = reader.poll_once().expect("poll");
    assert_eq!(kinds(&outcome.events), vec!["Undocked"]);
}

#[test]
fn malformed_lines_are_skipped_and_counted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("Journal.1.log");
    append(
        &path,
        "{\"timestamp\":\"t1\",\"event\":\"Startup\"}\nnot json at all\n{\"timestamp\":\"t2\"}\n\n{\"timestamp\":\"t3\",\"event\":\"Docked\"}\n",
    );

    let mut reader = reader(dir.path());
    let outcome = reader.poll_once().expect("poll");
    assert_eq!(kinds(&outcome.events), vec!["Startup", "Docked"]);
    assert_eq!(outcome.parse_errors, 2);
    assert_eq!(reader.stats().parse_errors(), 2);
    assert_eq!(
        reader.position().offset(),
        fs::metadata(&path).expect("metadata").len()
    );
}

#[test]
fn oversized_lines_are_skipped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("Journal.1.log");
    let padding = "x".repeat(200);
    append(
        &path,
        &format!(
            "{{\"timestamp\":\"t1\",\"event\":\"Music\",\"pad\":\"{padding}\"}}\n{{\"timestamp\":\"t2\",\"event\":\"Docked\"}}\n"
        ),
    );

    let mut reader = reader(dir.path()).with_max_line_bytes(100);
    let outcome = reader.poll_once().expect("poll");
    assert_eq!(kinds(&outcome.events), vec!["Docked"]);
    assert_eq!(outcome.oversized_lines, 1);
}

#[test]
fn invalid_utf8_line_is_a_parse_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("Journal.1.log");
    let mut bytes = b"{\"timestamp\":\"t1\",\"event\":\"Sta\xffrtup\"}\n".to_vec();
    bytes.extend_from_slice(b"{\"timestamp\":\"t2\",\"event\":\"Docked\"}\n");
    fs::write(&path, &bytes).expect("write");

    let mut reader = reader(dir.path());
    let outcome = reader.poll_once().expect("poll");
    assert_eq!(kinds(&outcome.events), vec!["Docked"]);
    assert_eq!(outcome.parse_errors, 1);
    assert_eq!(reader.stats().parse_errors(), 1);
    assert_eq!(reader.position().offset(), u64::try_from(bytes.len()).expect("len"));
}

#[test]
fn oversized_unterminated_line_is_skipped_across_polls() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("Journal.1.log");
    append(&path, "{\"timestamp\":\"t1\",\"event\":\"Startup\"}\n");
    append(&path, &format!("{{\"event\":\"Music\",\"pad\":\"{}", "x".repeat(300)));

    let mut reader = reader(dir.path()).with_max_line_bytes(100);
    let first = reader.poll_once().expect("poll");
    assert_eq!(kinds(&first.events), vec!["Startup"]);
    assert_eq!(first.oversized_lines, 1);
    assert!(reader.position().is_skipping());
    assert_eq!(
        reader.position().offset(),
        fs::metadata(&path).expect("metadata").len()
    );

    // The rest of the long line is discarded, not counted again.
    append(&path, &"y".repeat(300));
    append(&path, "\"}\n{\"timestamp\":\"t2\",\"event\":\"Docked\"}\n");
    let second = reader.poll_once().expect("poll");
    assert_eq!(kinds(&second.events), vec!["Docked"]);
    assert_eq!(second.oversized_lines, 0);
    assert_eq!(second.parse_errors, 0);
    assert!(!reader.position().is_skipping());
    assert_eq!(reader.stats().oversized_lines(), 1);
}

#[test]
fn resumed_reader_skips_consumed_lines() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("Journal.1.log");
    append(
        &path,
        "{\"timestamp\":\"t1\",\"event\":\"Startup\"}\n{\"timestamp\":\"t2\",\"event\":\"Location\"}\n",
    );

    let mut first = reader(dir.path());
    assert_eq!(first.poll_once().expect("poll").events.len(), 2);

    append(&path, "{\"timestamp\":\"t3\",\"event\":\"Docked\"}\n");
    let mut resumed = reader(dir.path()).with_position(first.position().clone());
    let outcome = resumed.poll_once().expect("poll");
    assert!(!outcome.rotated);
    assert_eq!(kinds(&outcome.events), vec!["Docked"]);
}

#[test]
fn empty_directory_yields_no_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("Status.json"), "{}").expect("write");

    let mut reader = reader(dir.path());
    let outcome = reader.poll_once().expect("poll");
    assert!(outcome.file.is_none());
    assert!(reader.position().file().is_none());
}

#[tokio::test]
async fn run_waits_for_first_file_then_delivers() {
    let dir = tempfile::tempdir().expect("tempdir");
    let seen: Arc<Mutex<Vec<Event>>> = Arc::default();
    let sink_seen = Arc::clone(&seen);
    let sink: Arc<dyn EventSink> = Arc::new(move |event: Event| {
        sink_seen.lock().expect("lock").push(event);
    });

    let reader = reader(dir.path())
        .with_poll_interval(Duration::from_millis(10))
        .with_retry_backoff(Duration::from_millis(10));
    let stats = reader.stats();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(reader.run(sink, shutdown_rx));

    tokio::time::sleep(Duration::from_millis(50)).await;
    append(
        &dir.path().join("Journal.1.log"),
        "{\"timestamp\":\"t1\",\"event\":\"Startup\"}\n{broken\n",
    );

    for _ in 0..200 {
        if !seen.lock().expect("lock").is_empty() && stats.parse_errors() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    shutdown_tx.send(true).expect("send shutdown");
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("reader stops promptly")
        .expect("reader task");

    let seen = seen.lock().expect("lock");
    assert_eq!(kinds(&seen), vec!["Startup"]);
    assert_eq!(stats.parse_errors(), 1);
}
