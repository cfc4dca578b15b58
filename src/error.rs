use std::time::Duration;

/// Errors talking to the daemon.
///
/// Categories:
/// - Permission: the daemon is waiting on a user prompt; never counted as a failure
/// - Transient: network trouble, worth retrying until the governor gives up
/// - Permanent: the daemon answered but the answer is unusable
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DaemonError {
    // Permission
    #[error("Permission denied by daemon (HTTP {0})")]
    PermissionDenied(u16),

    // Transient
    #[error("Daemon request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Daemon unreachable: {0}")]
    Unreachable(String),

    #[error("Daemon returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    // Permanent
    #[error("Could not decode daemon response: {0}")]
    Decode(String),
}

impl DaemonError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, DaemonError::PermissionDenied(_))
    }

    /// Returns true if the request is worth retrying on the next poll.
    pub fn is_transient(&self) -> bool {
        match self {
            DaemonError::Timeout(_) | DaemonError::Unreachable(_) => true,
            DaemonError::Http { status, .. } => *status >= 500 || *status == 429,
            DaemonError::PermissionDenied(_) | DaemonError::Decode(_) => false,
        }
    }

    /// Maps an HTTP status to the error taxonomy. 401 and 403 are permission prompts.
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 | 403 => DaemonError::PermissionDenied(status),
            _ => DaemonError::Http {
                status,
                body: body.trim().to_string(),
            },
        }
    }
}

impl From<reqwest::Error> for DaemonError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return DaemonError::Decode(err.to_string());
        }
        if let Some(status) = err.status() {
            return DaemonError::from_status(status.as_u16(), &err.to_string());
        }
        if err.is_timeout() {
            // reqwest does not carry the configured duration on the error
            return DaemonError::Timeout(Duration::ZERO);
        }
        DaemonError::Unreachable(err.to_string())
    }
}

/// Errors surfaced to callers of the tracker handle.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Permission required: the daemon refused to {action} '{subject}' until the request is approved")]
    PermissionDenied { action: String, subject: String },

    #[error(transparent)]
    Daemon(#[from] DaemonError),

    #[error("Job {0} is already tracked")]
    DuplicateJob(String),

    #[error("Job tracker shut down")]
    TrackerShutdown,
}

impl TrackerError {
    pub fn is_permission_denied(&self) -> bool {
        match self {
            TrackerError::PermissionDenied { .. } => true,
            TrackerError::Daemon(err) => err.is_permission_denied(),
            _ => false,
        }
    }
}

/// Errors loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {message}")]
    Read { path: String, message: String },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Config validation failed:\n{}", .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    Invalid(Vec<String>),
}
