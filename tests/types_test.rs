use app_job_tracker::types::{
    parse_job_kind, Classification, Confidence, Job, JobKind, JobStatus, ProcessedKey, RemoteJob,
    RemoteStatus, TrackerEvent,
};

// --- JobStatus transitions ---

#[test]
fn forward_transitions_are_valid() {
    use JobStatus::*;
    assert!(Starting.is_valid_transition(&Running));
    assert!(Starting.is_valid_transition(&Completed));
    assert!(Starting.is_valid_transition(&Failed));
    assert!(Running.is_valid_transition(&Running));
    assert!(Running.is_valid_transition(&Completed));
    assert!(Running.is_valid_transition(&Failed));
}

#[test]
fn terminal_statuses_have_no_transitions() {
    use JobStatus::*;
    for terminal in [Completed, Failed] {
        for to in [Starting, Running, Completed, Failed] {
            assert!(
                !terminal.is_valid_transition(&to),
                "{:?} -> {:?} should be rejected",
                terminal,
                to
            );
        }
    }
}

#[test]
fn running_cannot_go_back_to_starting() {
    assert!(!JobStatus::Running.is_valid_transition(&JobStatus::Starting));
}

// --- Daemon wire format ---

#[test]
fn remote_status_accepts_daemon_spellings() {
    let cases = [
        ("\"pending\"", RemoteStatus::Starting),
        ("\"running\"", RemoteStatus::Running),
        ("\"in_progress\"", RemoteStatus::Running),
        ("\"done\"", RemoteStatus::Completed),
        ("\"completed\"", RemoteStatus::Completed),
        ("\"failed\"", RemoteStatus::Failed),
        ("\"error\"", RemoteStatus::Failed),
        ("\"something-new\"", RemoteStatus::Unknown),
    ];
    for (raw, expected) in cases {
        let parsed: RemoteStatus = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed, expected, "parsing {}", raw);
    }
}

#[test]
fn unknown_remote_status_reads_as_running() {
    assert_eq!(RemoteStatus::Unknown.to_job_status(), JobStatus::Running);
}

#[test]
fn remote_job_tolerates_missing_fields() {
    let job: RemoteJob = serde_json::from_str(r#"{"command": "install"}"#).unwrap();
    assert_eq!(job.status, None);
    assert!(job.logs.is_empty());

    let job: RemoteJob =
        serde_json::from_str(r#"{"status": "done", "logs": ["a", "b"]}"#).unwrap();
    assert_eq!(job.status, Some(RemoteStatus::Completed));
    assert_eq!(job.logs, vec!["a", "b"]);
}

// --- Helpers ---

#[test]
fn parse_job_kind_accepts_uninstall_alias() {
    assert_eq!(parse_job_kind("Install").unwrap(), JobKind::Install);
    assert_eq!(parse_job_kind("uninstall").unwrap(), JobKind::Remove);
    assert!(parse_job_kind("update").is_err());
}

#[test]
fn last_log_line_skips_blank_lines() {
    let mut job = Job::new("job-1", JobKind::Install, "hello");
    job.log_lines = vec!["first".to_string(), "ERROR: disk full  ".to_string(), "  ".to_string()];
    assert_eq!(job.last_log_line(), Some("ERROR: disk full"));
}

#[test]
fn processed_key_is_subject_and_kind() {
    let job = Job::new("job-1", JobKind::Remove, "hello");
    assert_eq!(job.processed_key(), ProcessedKey::new("hello", JobKind::Remove));
    assert_ne!(job.processed_key(), ProcessedKey::new("hello", JobKind::Install));
}

#[test]
fn classification_maps_to_terminal_status() {
    assert_eq!(Classification::still_running().terminal_status(), None);
    assert_eq!(
        Classification::succeeded(Confidence::Low).terminal_status(),
        Some(JobStatus::Completed)
    );
    assert_eq!(
        Classification::failed(Confidence::High).terminal_status(),
        Some(JobStatus::Failed)
    );
}

#[test]
fn refresh_event_has_no_job_id() {
    assert_eq!(TrackerEvent::RefreshNeeded.job_id(), None);
    let event = TrackerEvent::PermissionRequired {
        job_id: "job-9".to_string(),
        subject_name: "hello".to_string(),
        kind: JobKind::Install,
    };
    assert_eq!(event.job_id(), Some("job-9"));
}
