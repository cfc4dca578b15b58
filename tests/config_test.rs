use std::time::Duration;

use app_job_tracker::config::*;
use app_job_tracker::error::ConfigError;

fn write_config(contents: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(CONFIG_FILE_NAME), contents).unwrap();
    dir
}

// --- Defaults ---

#[test]
fn defaults_match_daemon_conventions() {
    let config = TrackerConfig::default();

    assert_eq!(config.daemon.base_url, "http://localhost:8000");
    assert_eq!(config.daemon.request_timeout(), Duration::from_secs(5));
    assert_eq!(config.polling.interval(), Duration::from_millis(500));
    assert_eq!(config.polling.max_fetch_failures, 5);
    assert_eq!(config.polling.max_registration_polls, 20);
    assert!(!config.polling.verify_absent_with_installed);
    assert_eq!(config.cleanup.success_delay(), Duration::from_millis(100));
    assert_eq!(config.cleanup.failure_delay(), Duration::from_secs(8));
    assert_eq!(config.cleanup.refresh_delay(), Duration::from_millis(500));
    assert!(config
        .classifier
        .success_phrases
        .contains(&"completed successfully".to_string()));
    assert!(config.classifier.failure_phrases.contains(&"error:".to_string()));
    assert!(validate(&config).is_ok());
}

#[test]
fn missing_config_file_returns_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config(dir.path()).unwrap();
    assert_eq!(config, TrackerConfig::default());
}

#[test]
fn missing_explicit_config_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = load_config_from(&dir.path().join("nope.toml"));
    assert!(matches!(result, Err(ConfigError::Read { .. })));
}

// --- Parsing ---

#[test]
fn partial_file_keeps_other_defaults() {
    let dir = write_config(
        r#"
[polling]
interval_ms = 250
"#,
    );

    let config = load_config(dir.path()).unwrap();
    assert_eq!(config.polling.interval_ms, 250);
    assert_eq!(config.polling.max_fetch_failures, 5);
    assert_eq!(config.daemon, DaemonConfig::default());
    assert_eq!(config.cleanup, CleanupConfig::default());
}

#[test]
fn full_file_parses_every_section() {
    let dir = write_config(
        r#"
[daemon]
base_url = "https://robot.local:8443"
request_timeout_ms = 2000

[polling]
interval_ms = 1000
max_fetch_failures = 10
verify_absent_with_installed = true

[cleanup]
success_delay_ms = 0
failure_delay_ms = 15000
refresh_delay_ms = 250

[classifier]
success_phrases = ["all done"]
failure_phrases = ["oops", "fatal"]
"#,
    );

    let config = load_config(dir.path()).unwrap();
    assert_eq!(config.daemon.base_url, "https://robot.local:8443");
    assert_eq!(config.daemon.request_timeout_ms, 2_000);
    assert_eq!(config.polling.max_fetch_failures, 10);
    assert!(config.polling.verify_absent_with_installed);
    assert_eq!(config.cleanup.success_delay_ms, 0);
    assert_eq!(config.cleanup.failure_delay_ms, 15_000);
    assert_eq!(config.classifier.success_phrases, vec!["all done"]);
    assert_eq!(config.classifier.failure_phrases, vec!["oops", "fatal"]);
}

#[test]
fn malformed_toml_reports_parse_error_with_path() {
    let dir = write_config("[polling\ninterval_ms = ");
    match load_config(dir.path()) {
        Err(ConfigError::Parse { path, .. }) => assert!(path.ends_with(CONFIG_FILE_NAME)),
        other => panic!("expected parse error, got {:?}", other),
    }
}

#[test]
fn wrong_value_type_is_a_parse_error() {
    let dir = write_config(
        r#"
[polling]
interval_ms = "fast"
"#,
    );
    assert!(matches!(
        load_config(dir.path()),
        Err(ConfigError::Parse { .. })
    ));
}

// --- Validation ---

#[test]
fn invalid_values_are_all_reported_together() {
    let dir = write_config(
        r#"
[daemon]
base_url = "robot.local"
request_timeout_ms = 0

[polling]
interval_ms = 0

[cleanup]
success_delay_ms = 500
failure_delay_ms = 100
"#,
    );

    match load_config(dir.path()) {
        Err(ConfigError::Invalid(errors)) => {
            assert_eq!(errors.len(), 4, "got: {:?}", errors);
            assert!(errors.iter().any(|e| e.contains("daemon.base_url")));
            assert!(errors.iter().any(|e| e.contains("request_timeout_ms")));
            assert!(errors.iter().any(|e| e.contains("polling.interval_ms")));
            assert!(errors.iter().any(|e| e.contains("failure_delay_ms")));
        }
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[test]
fn blank_phrase_is_rejected() {
    let mut config = TrackerConfig::default();
    config.classifier.failure_phrases.push("   ".to_string());

    let errors = validate(&config).unwrap_err();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("classifier.failure_phrases[4]"), "got: {}", errors[0]);
}

#[test]
fn zero_failure_budget_is_allowed() {
    let mut config = TrackerConfig::default();
    config.polling.max_fetch_failures = 0;
    assert!(validate(&config).is_ok());
}
