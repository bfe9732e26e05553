//! Coverage for config parsing, env overrides and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use axis::config::{config_dir, load_config, AxisConfig, CONFIG_PATH_ENV};

fn no_env(_: &str) -> Option<String> {
    None
}

#[test]
fn parse_complete_config() {
    let toml_str = r#"
[journal]
dir = "/games/journal"
pattern = "Journal.*.log"
poll_interval_ms = 250
retry_backoff_ms = 2000
max_line_bytes = 4096

[watchdog]
timeout_ms = 5000
recovery_state = "recovery"

[fsm]
initial_state = "menu"
update_interval_ms = 0

[transitions]
Docked = "docked"
Undocked = "flight"

[logging]
level = "debug"
"#;

    let config = AxisConfig::from_toml(toml_str).expect("parse config");
    assert_eq!(config.journal.dir.as_deref(), Some(Path::new("/games/journal")));
    assert_eq!(config.journal.poll_interval(), Duration::from_millis(250));
    assert_eq!(config.journal.retry_backoff(), Duration::from_secs(2));
    assert_eq!(config.journal.max_line_bytes, 4096);
    assert_eq!(config.watchdog.timeout(), Duration::from_secs(5));
    assert_eq!(config.watchdog.recovery_state.as_deref(), Some("recovery"));
    assert_eq!(config.fsm.initial_state, "menu");
    assert_eq!(config.fsm.update_interval_ms, 0);
    assert_eq!(
        config.transitions.get("Undocked").map(String::as_str),
        Some("flight")
    );
    assert_eq!(config.logging.level, "debug");
    assert!(config.validate().is_ok());
}

#[test]
fn empty_file_yields_defaults() {
    let config = AxisConfig::from_toml("").expect("parse empty");
    assert_eq!(config.journal.poll_interval_ms, 100);
    assert_eq!(config.journal.retry_backoff_ms, 1000);
    assert_eq!(config.watchdog.timeout_ms, 3000);
    assert!(config.watchdog.recovery_state.is_none());
    assert_eq!(config.fsm.update_interval_ms, 1000);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn env_overrides_win_over_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("axis.toml");
    fs::write(
        &path,
        "[journal]\ndir = \"/from/file\"\n[watchdog]\ntimeout_ms = 9000\n",
    )
    .expect("write config");

    let config = AxisConfig::load_with(Some(&path), |key| match key {
        "AXIS_JOURNAL_DIR" => Some("/from/env".to_owned()),
        "AXIS_WATCHDOG_TIMEOUT_MS" => Some("1500".to_owned()),
        "AXIS_LOG_LEVEL" => Some("trace".to_owned()),
        _ => None,
    })
    .expect("load");

    assert_eq!(config.journal.dir, Some(PathBuf::from("/from/env")));
    assert_eq!(config.watchdog.timeout_ms, 1500);
    assert_eq!(config.logging.level, "trace");
}

#[test]
fn config_path_env_is_used_when_no_path_given() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("custom.toml");
    fs::write(&path, "[fsm]\ninitial_state = \"menu\"\n").expect("write config");
    let path_str = path.display().to_string();

    let config = AxisConfig::load_with(None, |key| {
        (key == CONFIG_PATH_ENV).then(|| path_str.clone())
    })
    .expect("load");
    assert_eq!(config.fsm.initial_state, "menu");
}

#[test]
fn missing_default_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let absent = dir.path().join("nope.toml").display().to_string();

    let config = AxisConfig::load_with(None, |key| {
        (key == CONFIG_PATH_ENV).then(|| absent.clone())
    })
    .expect("defaults");
    assert_eq!(config.fsm.initial_state, "idle");
}

#[test]
fn explicit_missing_file_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let result = AxisConfig::load_with(Some(&dir.path().join("nope.toml")), no_env);
    assert!(result.is_err());
    assert!(load_config(&dir.path().join("nope.toml")).is_err());
}

#[test]
fn validation_rejects_unusable_values() {
    let mut config = AxisConfig::default();
    config.watchdog.timeout_ms = 0;
    assert!(config.validate().is_err());

    let mut config = AxisConfig::default();
    config.journal.poll_interval_ms = 0;
    assert!(config.validate().is_err());

    let mut config = AxisConfig::default();
    config.journal.pattern = "Journal.[.log".to_owned();
    assert!(config.validate().is_err());

    let mut config = AxisConfig::default();
    config.fsm.initial_state = String::new();
    assert!(config.validate().is_err());
}

#[test]
fn zero_retry_backoff_is_rejected() {
    let config = AxisConfig::from_toml("[journal]\nretry_backoff_ms = 0\n").expect("parse");
    let err = config.validate().expect_err("zero backoff must be rejected");
    assert!(err.to_string().contains("journal.retry_backoff_ms"), "{err}");
}

#[test]
fn wrong_types_fail_to_parse() {
    assert!(AxisConfig::from_toml("[watchdog]\ntimeout_ms = \"soon\"\n").is_err());
}

#[test]
fn config_dir_resolves() {
    let path = config_dir().expect("config dir");
    assert!(path.ends_with(".axis"));
}
