use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Opaque job identifier assigned by the daemon.
pub type JobId = String;

// --- Enums ---

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Install,
    Remove,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Install => write!(f, "install"),
            JobKind::Remove => write!(f, "remove"),
        }
    }
}

pub fn parse_job_kind(s: &str) -> Result<JobKind, String> {
    match s.to_lowercase().as_str() {
        "install" => Ok(JobKind::Install),
        "remove" | "uninstall" => Ok(JobKind::Remove),
        _ => Err(format!("Invalid job kind '{}': expected install or remove", s)),
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Starting,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Validates whether a transition from this status to `to` is allowed.
    ///
    /// Rules:
    /// - Starting -> Running, Completed, Failed
    /// - Running -> Running, Completed, Failed
    /// - Completed and Failed are terminal; nothing leaves them
    /// - Nothing moves back to Starting
    pub fn is_valid_transition(&self, to: &JobStatus) -> bool {
        use JobStatus::*;

        if self.is_terminal() {
            return false;
        }

        matches!(
            (self, to),
            (Starting, Starting)
                | (Starting, Running)
                | (Running, Running)
                | (_, Completed)
                | (_, Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Starting => write!(f, "starting"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Reliability of an inferred outcome.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Default assumption, nothing corroborated it.
    Low,
    /// Log heuristic or installed-list cross-check.
    Medium,
    /// Explicit status field or a forced failure.
    High,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Confidence::Low => write!(f, "low"),
            Confidence::Medium => write!(f, "medium"),
            Confidence::High => write!(f, "high"),
        }
    }
}

/// How the daemon currently relates to a tracked job.
///
/// Replaces "record is missing" null checks with an explicit signal so a job
/// the daemon has not registered yet is never mistaken for a finished one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Presence {
    /// The daemon has never returned data for this id.
    NeverObserved,
    /// The daemon returned data for this id on this tick.
    Observed,
    /// The job already resolved locally; further signals are stale.
    ObservedTerminal,
    /// Seen earlier with a non-terminal status, now missing from the daemon.
    ObservedThenAbsent,
}

/// Result of running a job through the outcome classifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Classification {
    pub terminal: bool,
    pub succeeded: bool,
    pub confidence: Confidence,
}

impl Classification {
    pub fn still_running() -> Self {
        Self {
            terminal: false,
            succeeded: false,
            confidence: Confidence::Low,
        }
    }

    pub fn succeeded(confidence: Confidence) -> Self {
        Self {
            terminal: true,
            succeeded: true,
            confidence,
        }
    }

    pub fn failed(confidence: Confidence) -> Self {
        Self {
            terminal: true,
            succeeded: false,
            confidence,
        }
    }

    pub fn terminal_status(&self) -> Option<JobStatus> {
        match (self.terminal, self.succeeded) {
            (false, _) => None,
            (true, true) => Some(JobStatus::Completed),
            (true, false) => Some(JobStatus::Failed),
        }
    }
}

// --- Structs ---

/// One tracked install or remove operation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub subject_name: String,
    pub status: JobStatus,
    /// Daemon-authoritative; replaced wholesale on every successful fetch.
    #[serde(default)]
    pub log_lines: Vec<String>,
    /// Consecutive fetch failures since the last successful fetch.
    #[serde(default)]
    pub fail_count: u32,
    /// 404s received before the daemon ever reported this id.
    #[serde(default)]
    pub unregistered_polls: u32,
    /// True once the daemon has returned a non-terminal record for this id.
    #[serde(default)]
    pub observed: bool,
    #[serde(default)]
    pub awaiting_permission: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Job {
    pub fn new(id: &str, kind: JobKind, subject_name: &str) -> Self {
        Self {
            id: id.to_string(),
            kind,
            subject_name: subject_name.to_string(),
            status: JobStatus::Starting,
            log_lines: Vec::new(),
            fail_count: 0,
            unregistered_polls: 0,
            observed: false,
            awaiting_permission: false,
            confidence: None,
            created_at: chrono::Utc::now(),
        }
    }

    pub fn processed_key(&self) -> ProcessedKey {
        ProcessedKey::new(&self.subject_name, self.kind)
    }

    /// The log lines joined as one string for phrase matching.
    pub fn joined_logs(&self) -> String {
        self.log_lines.join("\n")
    }

    /// Last non-empty log line, used as the user-facing failure summary.
    pub fn last_log_line(&self) -> Option<&str> {
        self.log_lines
            .iter()
            .rev()
            .map(|line| line.trim())
            .find(|line| !line.is_empty())
    }
}

/// Partial update applied by the registry. `None` leaves a field untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub log_lines: Option<Vec<String>>,
    pub append_log_line: Option<String>,
    pub fail_count: Option<u32>,
    pub unregistered_polls: Option<u32>,
    pub observed: Option<bool>,
    pub awaiting_permission: Option<bool>,
    pub confidence: Option<Confidence>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn fail_count(count: u32) -> Self {
        Self {
            fail_count: Some(count),
            ..Default::default()
        }
    }
}

/// Dedupe marker for one-time terminal side effects.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessedKey {
    pub subject_name: String,
    pub kind: JobKind,
}

impl ProcessedKey {
    pub fn new(subject_name: &str, kind: JobKind) -> Self {
        Self {
            subject_name: subject_name.to_string(),
            kind,
        }
    }
}

/// An app as the daemon describes it; sent verbatim with install commands.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct AppDescriptor {
    pub name: String,
    #[serde(default = "default_source_kind")]
    pub source_kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

fn default_source_kind() -> String {
    "hf_space".to_string()
}

impl AppDescriptor {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            source_kind: default_source_kind(),
            ..Default::default()
        }
    }
}

/// Status values the daemon reports, tolerant of the spellings it has used.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    #[serde(alias = "pending", alias = "queued")]
    Starting,
    #[serde(alias = "in_progress")]
    Running,
    #[serde(alias = "done", alias = "success", alias = "succeeded")]
    Completed,
    #[serde(alias = "error", alias = "failure")]
    Failed,
    #[serde(other)]
    Unknown,
}

impl RemoteStatus {
    /// Local status for a daemon-reported value. Unknown values read as running.
    pub fn to_job_status(self) -> JobStatus {
        match self {
            RemoteStatus::Starting => JobStatus::Starting,
            RemoteStatus::Running | RemoteStatus::Unknown => JobStatus::Running,
            RemoteStatus::Completed => JobStatus::Completed,
            RemoteStatus::Failed => JobStatus::Failed,
        }
    }
}

/// Body of the daemon's job-status endpoint.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RemoteJob {
    #[serde(default)]
    pub status: Option<RemoteStatus>,
    #[serde(default)]
    pub logs: Vec<String>,
}

impl RemoteJob {
    pub fn new(status: RemoteStatus, logs: &[&str]) -> Self {
        Self {
            status: Some(status),
            logs: logs.iter().map(|l| l.to_string()).collect(),
        }
    }

    /// A record carrying logs but no status field.
    pub fn logs_only(logs: &[&str]) -> Self {
        Self {
            status: None,
            logs: logs.iter().map(|l| l.to_string()).collect(),
        }
    }
}

/// Notifications delivered to subscribers. Outcome events fire at most once per job.
#[derive(Clone, Debug, PartialEq)]
pub enum TrackerEvent {
    Succeeded {
        job_id: JobId,
        subject_name: String,
        kind: JobKind,
        confidence: Confidence,
    },
    Failed {
        job_id: JobId,
        subject_name: String,
        kind: JobKind,
        summary: String,
        confidence: Confidence,
    },
    /// The daemon is waiting on a user authorization prompt; polling continues.
    PermissionRequired {
        job_id: JobId,
        subject_name: String,
        kind: JobKind,
    },
    /// The installed-apps list should be re-pulled.
    RefreshNeeded,
}

impl TrackerEvent {
    pub fn job_id(&self) -> Option<&str> {
        match self {
            TrackerEvent::Succeeded { job_id, .. }
            | TrackerEvent::Failed { job_id, .. }
            | TrackerEvent::PermissionRequired { job_id, .. } => Some(job_id),
            TrackerEvent::RefreshNeeded => None,
        }
    }
}
