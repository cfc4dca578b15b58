use std::collections::HashMap;

use tokio::task::AbortHandle;

use crate::types::JobId;

/// What a registered handle is for. Only used for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlePurpose {
    Poll,
    Command,
    Removal,
    Refresh,
}

#[derive(Default)]
struct HandleSet {
    handles: Vec<(HandlePurpose, AbortHandle)>,
}

impl HandleSet {
    fn cancel_all(&mut self) -> usize {
        let mut cancelled = 0;
        for (_, handle) in self.handles.drain(..) {
            if !handle.is_finished() {
                cancelled += 1;
            }
            handle.abort();
        }
        cancelled
    }

    fn prune(&mut self) {
        self.handles.retain(|(_, handle)| !handle.is_finished());
    }
}

/// Owns every timer and delayed action spawned on behalf of a job.
///
/// Stopping a job cancels its whole handle set in one call, so no call site
/// can leak a timer. Handles not tied to any job (list refreshes) live in a
/// tracker-wide set that only `shutdown` cancels.
#[derive(Default)]
pub struct ResourceJanitor {
    jobs: HashMap<JobId, HandleSet>,
    detached: HandleSet,
}

impl ResourceJanitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, job_id: &str, purpose: HandlePurpose, handle: AbortHandle) {
        let set = self.jobs.entry(job_id.to_string()).or_default();
        set.prune();
        set.handles.push((purpose, handle));
    }

    pub fn track_detached(&mut self, purpose: HandlePurpose, handle: AbortHandle) {
        self.detached.prune();
        self.detached.handles.push((purpose, handle));
    }

    /// True while a live poll handle is registered for `job_id`.
    pub fn is_polling(&self, job_id: &str) -> bool {
        self.jobs.get(job_id).is_some_and(|set| {
            set.handles
                .iter()
                .any(|(purpose, handle)| *purpose == HandlePurpose::Poll && !handle.is_finished())
        })
    }

    /// Cancel every handle registered for `job_id` and forget the job.
    /// Returns how many handles were still live.
    pub fn release(&mut self, job_id: &str) -> usize {
        self.jobs
            .remove(job_id)
            .map(|mut set| set.cancel_all())
            .unwrap_or(0)
    }

    /// Cancel every handle for every job, plus detached handles.
    pub fn shutdown(&mut self) -> usize {
        let mut cancelled = self.detached.cancel_all();
        for (_, mut set) in self.jobs.drain() {
            cancelled += set.cancel_all();
        }
        cancelled
    }

    pub fn tracked_jobs(&self) -> usize {
        self.jobs.len()
    }

    pub fn live_handles(&self, job_id: &str) -> usize {
        self.jobs
            .get(job_id)
            .map(|set| {
                set.handles
                    .iter()
                    .filter(|(_, handle)| !handle.is_finished())
                    .count()
            })
            .unwrap_or(0)
    }
}

impl Drop for ResourceJanitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
