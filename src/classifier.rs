//! Infers a job's outcome from whatever evidence is available.
//!
//! Strategies run in a fixed order and the first conclusive one wins:
//! explicit status, then log phrases, then the vanished-job default.

use crate::config::ClassifierConfig;
use crate::types::{Classification, Confidence, Job, JobKind, JobStatus, Presence};

/// Everything the classifier may look at for one evaluation.
#[derive(Clone, Copy, Debug)]
pub struct Evidence<'a> {
    pub job: &'a Job,
    pub presence: Presence,
    /// Whether the subject appears in the daemon's installed list, when that
    /// was checked.
    pub installed: Option<bool>,
}

impl<'a> Evidence<'a> {
    pub fn observed(job: &'a Job) -> Self {
        Self {
            job,
            presence: Presence::Observed,
            installed: None,
        }
    }

    pub fn absent(job: &'a Job, installed: Option<bool>) -> Self {
        Self {
            job,
            presence: Presence::ObservedThenAbsent,
            installed,
        }
    }
}

/// One link in the classification chain.
pub trait OutcomeStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Some` when this strategy is conclusive, `None` to defer to the next.
    fn evaluate(&self, evidence: &Evidence<'_>) -> Option<Classification>;
}

/// Trusts a terminal status reported by the daemon.
pub struct ExplicitStatus;

impl OutcomeStrategy for ExplicitStatus {
    fn name(&self) -> &'static str {
        "explicit-status"
    }

    fn evaluate(&self, evidence: &Evidence<'_>) -> Option<Classification> {
        match evidence.job.status {
            JobStatus::Completed => Some(Classification::succeeded(Confidence::High)),
            JobStatus::Failed => Some(Classification::failed(Confidence::High)),
            JobStatus::Starting | JobStatus::Running => None,
        }
    }
}

/// Case-insensitive phrase matching over the joined log text.
pub struct LogPhrases {
    success: Vec<String>,
    failure: Vec<String>,
}

impl LogPhrases {
    pub fn new(success: &[String], failure: &[String]) -> Self {
        let lower = |phrases: &[String]| {
            phrases
                .iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect::<Vec<String>>()
        };
        Self {
            success: lower(success),
            failure: lower(failure),
        }
    }

    pub fn matches_failure(&self, text: &str) -> bool {
        self.failure.iter().any(|p| text.contains(p.as_str()))
    }

    pub fn matches_success(&self, text: &str) -> bool {
        self.success.iter().any(|p| text.contains(p.as_str()))
    }
}

impl OutcomeStrategy for LogPhrases {
    fn name(&self) -> &'static str {
        "log-phrases"
    }

    fn evaluate(&self, evidence: &Evidence<'_>) -> Option<Classification> {
        if evidence.job.log_lines.is_empty() {
            return None;
        }
        let text = evidence.job.joined_logs().to_lowercase();

        // Failure wins when both lists match.
        if self.matches_failure(&text) {
            return Some(Classification::failed(Confidence::Medium));
        }
        if self.matches_success(&text) {
            return Some(Classification::succeeded(Confidence::Medium));
        }
        None
    }
}

/// A job that disappeared after being seen is assumed done.
///
/// With an installed-list answer attached the assumption is checked and
/// the confidence rises to Medium either way.
pub struct VanishedDefault;

impl OutcomeStrategy for VanishedDefault {
    fn name(&self) -> &'static str {
        "vanished-default"
    }

    fn evaluate(&self, evidence: &Evidence<'_>) -> Option<Classification> {
        if evidence.presence != Presence::ObservedThenAbsent {
            return None;
        }

        let Some(installed) = evidence.installed else {
            return Some(Classification::succeeded(Confidence::Low));
        };

        let expected = match evidence.job.kind {
            JobKind::Install => true,
            JobKind::Remove => false,
        };
        if installed == expected {
            Some(Classification::succeeded(Confidence::Medium))
        } else {
            Some(Classification::failed(Confidence::Medium))
        }
    }
}

pub struct OutcomeClassifier {
    strategies: Vec<Box<dyn OutcomeStrategy>>,
}

impl OutcomeClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self::with_strategies(vec![
            Box::new(ExplicitStatus),
            Box::new(LogPhrases::new(
                &config.success_phrases,
                &config.failure_phrases,
            )),
            Box::new(VanishedDefault),
        ])
    }

    pub fn with_strategies(strategies: Vec<Box<dyn OutcomeStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn classify(&self, evidence: &Evidence<'_>) -> Classification {
        self.classify_with_source(evidence).0
    }

    /// Like [`classify`](Self::classify), also naming the strategy that decided.
    pub fn classify_with_source(
        &self,
        evidence: &Evidence<'_>,
    ) -> (Classification, Option<&'static str>) {
        for strategy in &self.strategies {
            if let Some(classification) = strategy.evaluate(evidence) {
                return (classification, Some(strategy.name()));
            }
        }
        (Classification::still_running(), None)
    }
}

impl Default for OutcomeClassifier {
    fn default() -> Self {
        Self::new(&ClassifierConfig::default())
    }
}

/// User-facing one-liner for a failed job.
pub fn failure_summary(job: &Job) -> String {
    match job.last_log_line() {
        Some(line) => line.to_string(),
        None => format!("{} of '{}' failed", job.kind, job.subject_name),
    }
}

/// Summary for a vanished job whose installed-list check contradicts success.
pub fn mismatch_summary(job: &Job, installed: bool) -> String {
    let listed = if installed { "still listed" } else { "not listed" };
    format!(
        "{} of '{}' ended without confirmation and the app is {} as installed",
        job.kind, job.subject_name, listed
    )
}
