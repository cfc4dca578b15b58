use std::collections::HashSet;
use std::time::Duration;

use crate::config::CleanupConfig;
use crate::types::{Classification, Confidence, Job, JobId, JobKind, Presence, ProcessedKey};

/// The one-time side effects owed for a job that just reached a terminal state.
#[derive(Clone, Debug, PartialEq)]
pub struct Resolution {
    pub job_id: JobId,
    pub subject_name: String,
    pub kind: JobKind,
    pub succeeded: bool,
    pub confidence: Confidence,
    /// Present only for failures.
    pub summary: Option<String>,
    /// When to signal that the installed list should be re-pulled.
    pub refresh_after: Duration,
    /// When to drop the job from the registry.
    pub remove_after: Duration,
}

/// Gate that turns terminal classifications into side effects at most once
/// per `(subject, kind)`.
#[derive(Debug)]
pub struct LifecycleReconciler {
    processed: HashSet<ProcessedKey>,
    success_delay: Duration,
    failure_delay: Duration,
    refresh_delay: Duration,
}

impl LifecycleReconciler {
    pub fn new(cleanup: &CleanupConfig) -> Self {
        Self {
            processed: HashSet::new(),
            success_delay: cleanup.success_delay(),
            failure_delay: cleanup.failure_delay(),
            refresh_delay: cleanup.refresh_delay(),
        }
    }

    /// Classify what "no data this tick" (or data this tick) means for `job`.
    pub fn presence(job: &Job, reported: bool) -> Presence {
        if job.status.is_terminal() {
            Presence::ObservedTerminal
        } else if reported {
            Presence::Observed
        } else if job.observed {
            Presence::ObservedThenAbsent
        } else {
            Presence::NeverObserved
        }
    }

    /// A new job for the same subject and kind starts a fresh lifecycle.
    pub fn begin(&mut self, key: &ProcessedKey) {
        self.processed.remove(key);
    }

    pub fn is_processed(&self, key: &ProcessedKey) -> bool {
        self.processed.contains(key)
    }

    /// How long a terminal job stays in the registry.
    pub fn removal_delay(&self, succeeded: bool) -> Duration {
        if succeeded {
            self.success_delay
        } else {
            self.failure_delay
        }
    }

    /// Returns the side effects to run, or `None` if the classification is not
    /// terminal or this job's outcome was already handled.
    pub fn resolve(
        &mut self,
        job: &Job,
        classification: &Classification,
        summary: Option<String>,
    ) -> Option<Resolution> {
        if !classification.terminal {
            return None;
        }

        if !self.processed.insert(job.processed_key()) {
            return None;
        }

        let summary = if classification.succeeded {
            None
        } else {
            Some(summary.unwrap_or_else(|| crate::classifier::failure_summary(job)))
        };

        Some(Resolution {
            job_id: job.id.clone(),
            subject_name: job.subject_name.clone(),
            kind: job.kind,
            succeeded: classification.succeeded,
            confidence: classification.confidence,
            summary,
            refresh_after: self.refresh_delay,
            remove_after: self.removal_delay(classification.succeeded),
        })
    }
}
