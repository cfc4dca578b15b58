#![allow(dead_code)]

use std::time::Duration;

use tokio::sync::{broadcast, watch};

use app_job_tracker::config::{CleanupConfig, TrackerConfig};
use app_job_tracker::daemon::MockStatus;
use app_job_tracker::registry::JobSnapshot;
use app_job_tracker::types::{Job, JobKind, RemoteJob, RemoteStatus, TrackerEvent};

/// How long (in paused test time) helpers wait before declaring a hang.
pub const WAIT_LIMIT: Duration = Duration::from_secs(120);

/// Config with short, round timings so paused-clock tests stay readable.
///
/// Poll every 100ms, tolerate 3 failed fetches and 3 unregistered 404s,
/// remove successes after 10ms and failures after 5s, signal refresh
/// after 50ms.
pub fn fast_config() -> TrackerConfig {
    let mut config = TrackerConfig::default();
    config.daemon.request_timeout_ms = 1_000;
    config.polling.interval_ms = 100;
    config.polling.max_fetch_failures = 3;
    config.polling.max_registration_polls = 3;
    config.cleanup = CleanupConfig {
        success_delay_ms: 10,
        failure_delay_ms: 5_000,
        refresh_delay_ms: 50,
    };
    config
}

/// Creates a `Job` in the `Starting` state.
pub fn make_job(id: &str, kind: JobKind, subject: &str) -> Job {
    Job::new(id, kind, subject)
}

/// Creates a `Job` with the given status and log lines.
pub fn make_job_with_logs(
    id: &str,
    status: app_job_tracker::types::JobStatus,
    logs: &[&str],
) -> Job {
    let mut job = Job::new(id, JobKind::Install, "hello-world");
    job.status = status;
    job.log_lines = logs.iter().map(|l| l.to_string()).collect();
    job
}

pub fn running(logs: &[&str]) -> MockStatus {
    MockStatus::found(RemoteJob::new(RemoteStatus::Running, logs))
}

pub fn completed(logs: &[&str]) -> MockStatus {
    MockStatus::found(RemoteJob::new(RemoteStatus::Completed, logs))
}

pub fn failed(logs: &[&str]) -> MockStatus {
    MockStatus::found(RemoteJob::new(RemoteStatus::Failed, logs))
}

/// Next `Succeeded` or `Failed` event, skipping refresh and permission events.
pub async fn next_outcome(events: &mut broadcast::Receiver<TrackerEvent>) -> TrackerEvent {
    loop {
        let event = next_event(events).await;
        match event {
            TrackerEvent::Succeeded { .. } | TrackerEvent::Failed { .. } => return event,
            _ => continue,
        }
    }
}

pub async fn next_event(events: &mut broadcast::Receiver<TrackerEvent>) -> TrackerEvent {
    tokio::time::timeout(WAIT_LIMIT, events.recv())
        .await
        .expect("timed out waiting for tracker event")
        .expect("event channel closed")
}

/// Wait until the published snapshot satisfies `predicate`.
pub async fn wait_for_snapshot<F>(jobs: &mut watch::Receiver<JobSnapshot>, predicate: F) -> JobSnapshot
where
    F: Fn(&JobSnapshot) -> bool,
{
    tokio::time::timeout(WAIT_LIMIT, async {
        loop {
            {
                let snapshot = jobs.borrow_and_update();
                if predicate(&snapshot) {
                    return snapshot.clone();
                }
            }
            jobs.changed().await.expect("tracker dropped snapshot channel");
        }
    })
    .await
    .expect("timed out waiting for snapshot")
}
