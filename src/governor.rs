use crate::config::PollingConfig;
use crate::error::DaemonError;
use crate::types::Job;

/// What the poll coordinator should do after a failed status fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GovernorVerdict {
    /// The daemon is blocked on a user prompt. Keep polling; the counter is untouched.
    AwaitPermission,
    /// Still within budget. Record the new count and keep polling.
    Retry { fail_count: u32 },
    /// The daemon has not registered the job yet. Record the new count and
    /// keep polling.
    AwaitRegistration { polls: u32 },
    /// Budget exhausted. Force the job to `Failed` with `log_line` appended.
    GiveUp { fail_count: u32, log_line: String },
}

/// Converts persistent daemon unreachability into a synthetic failure.
///
/// A job survives `max_failures` consecutive failed fetches; the next one
/// fails it. 404s for a job the daemon has never reported draw on a
/// separate `max_registration_polls` budget.
#[derive(Clone, Copy, Debug)]
pub struct RetryGovernor {
    max_failures: u32,
    max_registration_polls: u32,
}

impl RetryGovernor {
    pub fn new(max_failures: u32, max_registration_polls: u32) -> Self {
        Self {
            max_failures,
            max_registration_polls,
        }
    }

    pub fn from_config(polling: &PollingConfig) -> Self {
        Self::new(polling.max_fetch_failures, polling.max_registration_polls)
    }

    pub fn max_failures(&self) -> u32 {
        self.max_failures
    }

    pub fn on_fetch_failure(&self, job: &Job, err: &DaemonError) -> GovernorVerdict {
        if err.is_permission_denied() {
            return GovernorVerdict::AwaitPermission;
        }
        self.count_failure(job, &err.to_string())
    }

    /// The daemon answered 404 for a job it has never reported.
    pub fn on_never_observed(&self, job: &Job) -> GovernorVerdict {
        let polls = job.unregistered_polls.saturating_add(1);
        if polls <= self.max_registration_polls {
            return GovernorVerdict::AwaitRegistration { polls };
        }

        GovernorVerdict::GiveUp {
            fail_count: job.fail_count,
            log_line: format!(
                "Timed out: daemon has not registered {} of '{}' after {} status checks",
                job.kind, job.subject_name, polls
            ),
        }
    }

    fn count_failure(&self, job: &Job, reason: &str) -> GovernorVerdict {
        let fail_count = job.fail_count.saturating_add(1);
        if fail_count <= self.max_failures {
            return GovernorVerdict::Retry { fail_count };
        }

        GovernorVerdict::GiveUp {
            fail_count,
            log_line: format!(
                "Timed out: no status for {} of '{}' after {} consecutive attempts (last error: {})",
                job.kind, job.subject_name, fail_count, reason
            ),
        }
    }
}
