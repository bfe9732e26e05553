//! Following the newest journal across rotations.

use std::fs;
use std::io::Write;
use std::path::Path;

use axis::journal::{FilePattern, JournalReader};

fn reader(dir: &Path) -> JournalReader {
    JournalReader::new(
        dir.to_path_buf(),
        FilePattern::new("Journal.*.log").expect("pattern"),
    )
}

#[test]
fn switches_to_newer_file_from_offset_zero() {
    let dir = tempfile::tempdir().expect("tempdir");
    let older = dir.path().join("Journal.2025-08-29T100000.01.log");
    fs::write(
        &older,
        "{\"timestamp\":\"a1\",\"event\":\"Startup\"}\n{\"timestamp\":\"a2\",\"event\":\"Location\"}\n",
    )
    .expect("write older");

    let mut reader = reader(dir.path());
    let first = reader.poll_once().expect("poll");
    assert_eq!(first.events.len(), 2);
    assert_eq!(reader.position().file(), Some(older.as_path()));

    let newer = dir.path().join("Journal.2025-08-30T090000.01.log");
    fs::write(&newer, "{\"timestamp\":\"b1\",\"event\":\"Fileheader\"}\n").expect("write newer");

    let second = reader.poll_once().expect("poll");
    assert!(second.rotated);
    assert_eq!(second.file.as_deref(), Some(newer.as_path()));
    let kinds: Vec<&str> = second.events.iter().map(|e| e.kind()).collect();
    assert_eq!(kinds, vec!["Fileheader"]);
    assert_eq!(reader.stats().rotations(), 2);

    // Writes to the old file are ignored once rotated away.
    fs::write(
        &older,
        "{\"timestamp\":\"a1\",\"event\":\"Startup\"}\n{\"timestamp\":\"a2\",\"event\":\"Location\"}\n{\"timestamp\":\"a3\",\"event\":\"Late\"}\n",
    )
    .expect("rewrite older");
    assert!(reader.poll_once().expect("poll").events.is_empty());
}

#[test]
fn unfinished_tail_of_old_file_is_abandoned() {
    let dir = tempfile::tempdir().expect("tempdir");
    let older = dir.path().join("Journal.1.log");
    fs::write(
        &older,
        "{\"timestamp\":\"a1\",\"event\":\"Startup\"}\n{\"timestamp\":\"a2\",\"event\":\"Lo",
    )
    .expect("write older");

    let mut reader = reader(dir.path());
    let first = reader.poll_once().expect("poll");
    let kinds: Vec<&str> = first.events.iter().map(|e| e.kind()).collect();
    assert_eq!(kinds, vec!["Startup"]);

    let newer = dir.path().join("Journal.2.log");
    let newer_text = "{\"timestamp\":\"b1\",\"event\":\"Fileheader\"}\n";
    fs::write(&newer, newer_text).expect("write newer");

    let second = reader.poll_once().expect("poll");
    assert!(second.rotated);
    let kinds: Vec<&str> = second.events.iter().map(|e| e.kind()).collect();
    assert_eq!(kinds, vec!["Fileheader"]);
    assert_eq!(reader.position().file(), Some(newer.as_path()));
    assert_eq!(
        reader.position().offset(),
        u64::try_from(newer_text.len()).expect("len")
    );

    let mut tail = fs::OpenOptions::new()
        .append(true)
        .open(&older)
        .expect("open older");
    tail.write_all(b"cation\"}\n").expect("finish older tail");
    assert!(reader.poll_once().expect("poll").events.is_empty());
}

#[test]
fn failed_switch_keeps_previous_position() {
    let dir = tempfile::tempdir().expect("tempdir");
    let older = dir.path().join("Journal.1.log");
    fs::write(&older, "{\"timestamp\":\"a1\",\"event\":\"Startup\"}\n").expect("write");

    let mut reader = reader(dir.path());
    reader.poll_once().expect("poll");
    let before = reader.position().clone();

    // A directory matching the pattern sorts last but cannot be read.
    let unreadable = dir.path().join("Journal.2.log");
    fs::create_dir(&unreadable).expect("mkdir");
    assert!(reader.poll_once().is_err());
    assert_eq!(reader.position(), &before);
    assert_eq!(reader.stats().io_errors(), 1);

    fs::remove_dir(&unreadable).expect("rmdir");
    let mut f = fs::OpenOptions::new()
        .append(true)
        .open(&older)
        .expect("open older");
    f.write_all(b"{\"timestamp\":\"a2\",\"event\":\"Docked\"}\n")
        .expect("append");
    let outcome = reader.poll_once().expect("poll");
    assert!(!outcome.rotated);
    let kinds: Vec<&str> = outcome.events.iter().map(|e| e.kind()).collect();
    assert_eq!(kinds, vec!["Docked"]);
}

#[test]
fn custom_pattern_limits_candidates() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("Journal.1.log"), "{\"event\":\"Startup\"}\n").expect("write");
    fs::write(dir.path().join("Other.9.log"), "{\"event\":\"Ignored\"}\n").expect("write");

    let mut reader = JournalReader::new(
        dir.path().to_path_buf(),
        FilePattern::new("Other.*.log").expect("pattern"),
    );
    let outcome = reader.poll_once().expect("poll");
    let kinds: Vec<&str> = outcome.events.iter().map(|e| e.kind()).collect();
    assert_eq!(kinds, vec!["Ignored"]);
}
