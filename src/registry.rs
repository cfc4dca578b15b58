use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::TrackerError;
use crate::types::{Job, JobId, JobKind, JobUpdate};

/// Immutable view of every tracked job at one point in time.
///
/// Cloning is cheap. A snapshot never changes after it is taken, even while
/// the registry that produced it keeps mutating.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JobSnapshot {
    jobs: Arc<BTreeMap<JobId, Job>>,
}

impl JobSnapshot {
    pub fn get(&self, id: &str) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.jobs.contains_key(id)
    }

    /// Jobs targeting `subject_name`, oldest first.
    pub fn by_subject(&self, subject_name: &str) -> Vec<&Job> {
        let mut jobs: Vec<&Job> = self
            .jobs
            .values()
            .filter(|job| job.subject_name == subject_name)
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Single-writer store of tracked jobs.
///
/// Mutation is copy-on-write: if any snapshot still shares the map, the map
/// is cloned before the write, so readers never see a half-applied update.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Arc<BTreeMap<JobId, Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a daemon-issued job in the `Starting` state.
    pub fn create(
        &mut self,
        id: &str,
        kind: JobKind,
        subject_name: &str,
    ) -> Result<&Job, TrackerError> {
        if self.jobs.contains_key(id) {
            return Err(TrackerError::DuplicateJob(id.to_string()));
        }

        let jobs = Arc::make_mut(&mut self.jobs);
        Ok(jobs
            .entry(id.to_string())
            .or_insert_with(|| Job::new(id, kind, subject_name)))
    }

    /// Apply a partial update.
    ///
    /// Returns false when the id is unknown (the job may already have been
    /// removed by an earlier tick) or when the update asked to move a job
    /// out of a terminal status. Terminal jobs still accept bookkeeping
    /// fields, but never a new status or replacement daemon logs.
    pub fn update(&mut self, id: &str, update: JobUpdate) -> bool {
        let Some(current) = self.jobs.get(id) else {
            return false;
        };

        let terminal = current.status.is_terminal();
        let status_change = match update.status {
            Some(_) if terminal => {
                if update.status != Some(current.status) {
                    return false;
                }
                None
            }
            // A regression (Running back to Starting) keeps the current status.
            Some(next) if current.status.is_valid_transition(&next) => Some(next),
            _ => None,
        };

        let jobs = Arc::make_mut(&mut self.jobs);
        let Some(job) = jobs.get_mut(id) else {
            return false;
        };

        if let Some(status) = status_change {
            job.status = status;
        }
        if !terminal {
            if let Some(lines) = update.log_lines {
                job.log_lines = lines;
            }
        }
        if let Some(line) = update.append_log_line {
            job.log_lines.push(line);
        }
        if let Some(count) = update.fail_count {
            job.fail_count = count;
        }
        if let Some(polls) = update.unregistered_polls {
            job.unregistered_polls = polls;
        }
        if let Some(observed) = update.observed {
            job.observed = job.observed || observed;
        }
        if let Some(awaiting) = update.awaiting_permission {
            job.awaiting_permission = awaiting;
        }
        if let Some(confidence) = update.confidence {
            job.confidence.get_or_insert(confidence);
        }

        true
    }

    /// Stop tracking a job. Unknown ids are ignored.
    pub fn remove(&mut self, id: &str) -> Option<Job> {
        if !self.jobs.contains_key(id) {
            return None;
        }
        Arc::make_mut(&mut self.jobs).remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            jobs: Arc::clone(&self.jobs),
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
