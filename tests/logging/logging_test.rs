//! Tests for `src/logging.rs`.

use axis::logging::{self, LoggingGuard};

#[test]
fn logging_guard_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<LoggingGuard>();
}

#[test]
fn logs_dir_blocked_by_a_file_is_reported() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let blocked = tmp.path().join("logs");
    std::fs::write(&blocked, "not a directory").expect("write file");

    let err = logging::init_production(&blocked.join("axis"), "info")
        .err()
        .expect("a file in the path must fail");
    assert!(
        err.to_string().contains("failed to create logs directory"),
        "{err:#}"
    );
}

#[test]
fn second_production_install_is_rejected() {
    let tmp = tempfile::tempdir().expect("should create temp dir");

    // Whichever test installs first, the global subscriber is taken by the
    // time the second call runs.
    let first = logging::init_production(&tmp.path().join("first"), "info");
    let second = logging::init_production(&tmp.path().join("second"), "info");

    assert!(tmp.path().join("first").is_dir());
    assert!(tmp.path().join("second").is_dir());
    let err = second.err().expect("second install must fail");
    assert!(
        err.to_string().contains("failed to install tracing subscriber"),
        "{err:#}"
    );
    drop(first);
}

#[test]
fn init_cli_after_another_subscriber_is_a_no_op() {
    logging::init_cli("warn");
    logging::init_cli("debug");
    tracing::info!("still logging");
}
