//! Configuration Module Tests
//!
//! Tests for TasklogConfig defaults, environment overrides and file loading.

use parking_lot::Mutex;
use std::path::PathBuf;
use std::time::Duration;
use tasklog_core::{EventDestination, TasklogConfig, TasklogError};

// Environment variables are process-wide; serialize the tests that touch them
static ENV_LOCK: Mutex<()> = Mutex::new(());

const TASKLOG_VARS: [&str; 5] = [
    "TASKLOG_QUEUE_CAPACITY",
    "TASKLOG_CLOSE_TIMEOUT_MS",
    "TASKLOG_SHUTDOWN_TIMEOUT_MS",
    "TASKLOG_DESTINATION",
    "TASKLOG_DESTINATION__KIND",
];

fn clear_tasklog_env() {
    for var in TASKLOG_VARS {
        std::env::remove_var(var);
    }
}

#[test]
fn config_has_expected_defaults() {
    let config = TasklogConfig::default();

    assert_eq!(config.queue_capacity, 2048);
    assert_eq!(config.close_timeout(), Duration::from_secs(5));
    assert_eq!(config.shutdown_timeout(), Duration::from_secs(5));
    assert_eq!(config.destination, EventDestination::Stdout);
}

#[test]
fn config_from_env_with_defaults() {
    let _guard = ENV_LOCK.lock();
    clear_tasklog_env();

    let config = TasklogConfig::from_env().expect("from_env should succeed");
    assert_eq!(config, TasklogConfig::default());
}

#[test]
fn config_from_env_overrides() {
    let _guard = ENV_LOCK.lock();
    clear_tasklog_env();
    std::env::set_var("TASKLOG_QUEUE_CAPACITY", "64");
    std::env::set_var("TASKLOG_CLOSE_TIMEOUT_MS", "250");
    std::env::set_var("TASKLOG_DESTINATION", "stderr");

    let config = TasklogConfig::from_env();
    clear_tasklog_env();

    let config = config.unwrap();
    assert_eq!(config.queue_capacity, 64);
    assert_eq!(config.close_timeout_ms, 250);
    assert_eq!(config.shutdown_timeout_ms, 5000);
    assert_eq!(config.destination, EventDestination::Stderr);
}

#[test]
fn config_from_env_rejects_garbage() {
    let _guard = ENV_LOCK.lock();
    clear_tasklog_env();
    std::env::set_var("TASKLOG_QUEUE_CAPACITY", "lots");

    let result = TasklogConfig::from_env();
    clear_tasklog_env();

    assert!(matches!(result, Err(TasklogError::ConfigurationError(msg)) if msg.contains("queue_capacity")));
}

#[test]
fn config_loads_from_toml_file() {
    let _guard = ENV_LOCK.lock();
    clear_tasklog_env();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasklog.toml");
    std::fs::write(
        &path,
        r#"
queue_capacity = 16
shutdown_timeout_ms = 1500

[destination]
kind = "file"
path = "/tmp/tasklog-events.jsonl"
append = false
"#,
    )
    .unwrap();

    let config = TasklogConfig::load(Some(&path)).unwrap();
    assert_eq!(config.queue_capacity, 16);
    assert_eq!(config.close_timeout_ms, 5000);
    assert_eq!(config.shutdown_timeout_ms, 1500);
    assert_eq!(
        config.destination,
        EventDestination::File {
            path: PathBuf::from("/tmp/tasklog-events.jsonl"),
            append: false,
        }
    );
}

#[test]
fn config_load_environment_beats_file() {
    let _guard = ENV_LOCK.lock();
    clear_tasklog_env();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasklog.toml");
    std::fs::write(&path, "queue_capacity = 16\ndestination = \"stdout\"\n").unwrap();

    std::env::set_var("TASKLOG_QUEUE_CAPACITY", "512");
    std::env::set_var("TASKLOG_DESTINATION", "stderr");
    let config = TasklogConfig::load(Some(&path));
    clear_tasklog_env();

    let config = config.unwrap();
    assert_eq!(config.queue_capacity, 512);
    assert_eq!(config.destination, EventDestination::Stderr);
}

#[test]
fn config_load_without_file_uses_defaults() {
    let _guard = ENV_LOCK.lock();
    clear_tasklog_env();

    let config = TasklogConfig::load(None::<&str>).unwrap();
    assert_eq!(config, TasklogConfig::default());
}

#[test]
fn config_load_rejects_zero_timeout() {
    let _guard = ENV_LOCK.lock();
    clear_tasklog_env();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasklog.toml");
    std::fs::write(&path, "close_timeout_ms = 0\n").unwrap();

    assert!(matches!(
        TasklogConfig::load(Some(&path)),
        Err(TasklogError::ConfigurationError(_))
    ));
}

#[test]
fn config_from_env_rejects_oversized_capacity() {
    let _guard = ENV_LOCK.lock();
    clear_tasklog_env();
    std::env::set_var("TASKLOG_QUEUE_CAPACITY", "18446744073709551615");

    let result = TasklogConfig::from_env();
    clear_tasklog_env();

    assert!(matches!(
        result,
        Err(TasklogError::ConfigurationError(msg)) if msg.contains("queue_capacity")
    ));
}
