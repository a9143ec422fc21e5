//! Configuration parsing and validation tests.

use std::time::Duration;

use agent_foreman::config::{DaemonConfig, GlobalConfig};
use agent_foreman::models::health::IssueSeverity;
use agent_foreman::AppError;

fn minimal_toml(root: &str) -> String {
    format!(
        r#"
workspace_root = '{root}'
worker_cli = "echo"
"#
    )
}

#[test]
fn minimal_config_gets_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config =
        GlobalConfig::from_toml_str(&minimal_toml(&dir.path().to_string_lossy())).expect("parse");

    assert_eq!(config.worker_cli, "echo");
    assert_eq!(config.daemon.poll_interval_ms, 5_000);
    assert_eq!(config.daemon.inbox_batch_size, 50);
    assert_eq!(config.health.no_output_threshold_seconds, 300);
    assert_eq!(config.health.error_count_threshold, 5);
    assert_eq!(config.health.no_output_severity, IssueSeverity::Warning);
    assert_eq!(config.steward.max_history_per_steward, 20);
    assert!(!config.steward.start_immediately);
    assert_eq!(config.session_retention(), Duration::from_secs(24 * 3_600));
}

#[test]
fn nested_sections_override_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let toml = format!(
        r#"
workspace_root = '{root}'
worker_cli = "claude"
worker_cli_args = ["--print"]
session_retention_hours = 2

[daemon]
poll_interval_ms = 2000
inbox_batch_size = 10

[health]
no_output_threshold_seconds = 60
error_count_threshold = 2
no_output_severity = "critical"

[steward]
execution_timeout_seconds = 30
max_history_per_steward = 3
start_immediately = true

[dispatch]
min_score = 0.5
"#,
        root = dir.path().to_string_lossy()
    );
    let config = GlobalConfig::from_toml_str(&toml).expect("parse");

    assert_eq!(config.worker_cli_args, vec!["--print".to_owned()]);
    assert_eq!(config.daemon.poll_interval_ms, 2_000);
    assert_eq!(config.health.no_output_severity, IssueSeverity::Critical);
    assert!(config.steward.start_immediately);
    assert!((config.dispatch.min_score - 0.5).abs() < f64::EPSILON);
    assert_eq!(config.session_retention(), Duration::from_secs(7_200));
}

#[test]
fn poll_interval_is_clamped_to_supported_range() {
    let low = DaemonConfig {
        poll_interval_ms: 10,
        inbox_batch_size: 50,
    };
    assert_eq!(low.poll_interval(), Duration::from_millis(1_000));

    let high = DaemonConfig {
        poll_interval_ms: 600_000,
        inbox_batch_size: 50,
    };
    assert_eq!(high.poll_interval(), Duration::from_millis(60_000));

    let in_range = DaemonConfig {
        poll_interval_ms: 5_000,
        inbox_batch_size: 50,
    };
    assert_eq!(in_range.poll_interval(), Duration::from_millis(5_000));
}

#[test]
fn empty_worker_cli_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let toml = format!(
        "workspace_root = '{}'\nworker_cli = \"\"\n",
        dir.path().to_string_lossy()
    );
    let result = GlobalConfig::from_toml_str(&toml);
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn zero_error_threshold_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let toml = format!(
        "workspace_root = '{}'\nworker_cli = \"echo\"\n\n[health]\nerror_count_threshold = 0\n",
        dir.path().to_string_lossy()
    );
    let result = GlobalConfig::from_toml_str(&toml);
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn missing_workspace_root_is_rejected() {
    let result = GlobalConfig::from_toml_str(&minimal_toml("/no/such/directory/anywhere"));
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn load_from_path_reads_the_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, minimal_toml(&dir.path().to_string_lossy())).expect("write config");

    let config = GlobalConfig::load_from_path(&path).expect("load");
    assert_eq!(config.worker_cli, "echo");
}

#[test]
fn malformed_toml_is_a_config_error() {
    let result = GlobalConfig::from_toml_str("workspace_root = [not toml");
    assert!(matches!(result, Err(AppError::Config(_))));
}
