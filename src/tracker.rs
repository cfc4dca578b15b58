use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::classifier::{mismatch_summary, Evidence, OutcomeClassifier};
use crate::config::{self, TrackerConfig};
use crate::daemon::DaemonClient;
use crate::error::{ConfigError, DaemonError, TrackerError};
use crate::governor::{GovernorVerdict, RetryGovernor};
use crate::janitor::{HandlePurpose, ResourceJanitor};
use crate::reconciler::{LifecycleReconciler, Resolution};
use crate::registry::{JobRegistry, JobSnapshot};
use crate::types::{
    AppDescriptor, Classification, Confidence, JobId, JobKind, JobStatus, JobUpdate, Presence,
    RemoteJob, TrackerEvent,
};
use crate::{log_debug, log_info, log_warn};

// --- Command enum ---

/// What one status fetch produced.
#[derive(Debug)]
pub(crate) enum FetchOutcome {
    Found(RemoteJob),
    /// The daemon answered 404. `installed` carries the installed-list
    /// cross-check when one was made.
    Absent {
        installed: Option<bool>,
    },
    Failed(DaemonError),
}

pub(crate) enum TrackerCommand {
    Install {
        app: AppDescriptor,
        reply: oneshot::Sender<Result<JobId, TrackerError>>,
    },
    Remove {
        subject_name: String,
        reply: oneshot::Sender<Result<JobId, TrackerError>>,
    },
    Track {
        job_id: JobId,
        kind: JobKind,
        subject_name: String,
        reply: oneshot::Sender<Result<JobId, TrackerError>>,
    },
    GetSnapshot {
        reply: oneshot::Sender<JobSnapshot>,
    },
    Abandon {
        job_id: JobId,
        reply: oneshot::Sender<bool>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
    // Internal: sent by tasks the tracker spawned.
    Register {
        job_id: JobId,
        kind: JobKind,
        subject_name: String,
        reply: oneshot::Sender<Result<JobId, TrackerError>>,
    },
    FetchCompleted {
        job_id: JobId,
        fetch: FetchOutcome,
    },
    RemoveJob {
        job_id: JobId,
    },
}

// --- TrackerHandle ---

#[derive(Clone)]
pub struct TrackerHandle {
    sender: mpsc::Sender<TrackerCommand>,
    events: broadcast::Sender<TrackerEvent>,
    jobs: watch::Receiver<JobSnapshot>,
}

impl TrackerHandle {
    async fn send_command<T>(
        &self,
        command: TrackerCommand,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, TrackerError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| TrackerError::TrackerShutdown)?;
        rx.await.map_err(|_| TrackerError::TrackerShutdown)
    }

    /// Issue an install and start tracking the resulting job.
    pub async fn install(&self, app: AppDescriptor) -> Result<JobId, TrackerError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(TrackerCommand::Install { app, reply }, rx)
            .await?
    }

    /// Issue a removal and start tracking the resulting job.
    pub async fn remove(&self, subject_name: &str) -> Result<JobId, TrackerError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            TrackerCommand::Remove {
                subject_name: subject_name.to_string(),
                reply,
            },
            rx,
        )
        .await?
    }

    /// Track a job that was issued outside this tracker.
    pub async fn track(
        &self,
        job_id: &str,
        kind: JobKind,
        subject_name: &str,
    ) -> Result<JobId, TrackerError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            TrackerCommand::Track {
                job_id: job_id.to_string(),
                kind,
                subject_name: subject_name.to_string(),
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn snapshot(&self) -> Result<JobSnapshot, TrackerError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(TrackerCommand::GetSnapshot { reply }, rx)
            .await
    }

    /// Stop polling a job and forget it without any notification.
    /// Returns false if the job was not tracked.
    pub async fn abandon(&self, job_id: &str) -> Result<bool, TrackerError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            TrackerCommand::Abandon {
                job_id: job_id.to_string(),
                reply,
            },
            rx,
        )
        .await
    }

    /// Cancel every job's timers and stop the tracker.
    pub async fn shutdown(&self) -> Result<(), TrackerError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(TrackerCommand::Shutdown { reply }, rx)
            .await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    /// Latest published job snapshot; `changed()` wakes on every mutation.
    pub fn watch_jobs(&self) -> watch::Receiver<JobSnapshot> {
        self.jobs.clone()
    }
}

// --- Poll task ---

const CHANNEL_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 64;

struct PollContext<D> {
    daemon: Arc<D>,
    job_id: JobId,
    interval: Duration,
    request_timeout: Duration,
    verify_absent: bool,
    jobs: watch::Receiver<JobSnapshot>,
    commands: mpsc::WeakSender<TrackerCommand>,
}

async fn poll_job<D: DaemonClient>(ctx: PollContext<D>) {
    let mut ticker = tokio::time::interval(ctx.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        // The timer may outlive the job briefly; skip until it is cancelled.
        let job = ctx.jobs.borrow().get(&ctx.job_id).cloned();
        let Some(job) = job else {
            continue;
        };
        if job.status.is_terminal() {
            continue;
        }

        let fetch = fetch_once(&ctx, job.observed, &job.subject_name).await;

        let Some(commands) = ctx.commands.upgrade() else {
            break;
        };
        let sent = commands
            .send(TrackerCommand::FetchCompleted {
                job_id: ctx.job_id.clone(),
                fetch,
            })
            .await;
        if sent.is_err() {
            break;
        }
    }
}

async fn fetch_once<D: DaemonClient>(
    ctx: &PollContext<D>,
    observed: bool,
    subject_name: &str,
) -> FetchOutcome {
    let result =
        match tokio::time::timeout(ctx.request_timeout, ctx.daemon.job_status(&ctx.job_id)).await
        {
            Ok(result) => result,
            Err(_) => Err(DaemonError::Timeout(ctx.request_timeout)),
        };

    match result {
        Ok(Some(remote)) => FetchOutcome::Found(remote),
        Ok(None) => {
            let installed = if ctx.verify_absent && observed {
                check_installed(ctx, subject_name).await
            } else {
                None
            };
            FetchOutcome::Absent { installed }
        }
        Err(err) => FetchOutcome::Failed(err),
    }
}

async fn check_installed<D: DaemonClient>(ctx: &PollContext<D>, subject_name: &str) -> Option<bool> {
    match tokio::time::timeout(ctx.request_timeout, ctx.daemon.list_installed()).await {
        Ok(Ok(apps)) => Some(apps.iter().any(|app| app.name == subject_name)),
        Ok(Err(err)) => {
            log_warn!(
                "Could not confirm '{}' against the installed list: {}",
                subject_name,
                err
            );
            None
        }
        Err(_) => {
            log_warn!(
                "Installed list timed out while confirming '{}'",
                subject_name
            );
            None
        }
    }
}

// --- Actor implementation ---

struct TrackerState<D> {
    daemon: Arc<D>,
    config: TrackerConfig,
    registry: JobRegistry,
    classifier: OutcomeClassifier,
    governor: RetryGovernor,
    reconciler: LifecycleReconciler,
    janitor: ResourceJanitor,
    jobs_tx: watch::Sender<JobSnapshot>,
    events: broadcast::Sender<TrackerEvent>,
    commands: mpsc::WeakSender<TrackerCommand>,
}

impl<D: DaemonClient + 'static> TrackerState<D> {
    fn publish(&self) {
        self.jobs_tx.send_replace(self.registry.snapshot());
    }

    fn emit(&self, event: TrackerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn spawn_command(
        &mut self,
        kind: JobKind,
        subject_name: String,
        app: Option<AppDescriptor>,
        reply: oneshot::Sender<Result<JobId, TrackerError>>,
    ) {
        let daemon = Arc::clone(&self.daemon);
        let commands = self.commands.clone();

        let task = tokio::spawn(async move {
            let issued = match &app {
                Some(app) => daemon.install(app).await,
                None => daemon.remove(&subject_name).await,
            };

            match issued {
                Ok(job_id) => {
                    let Some(commands) = commands.upgrade() else {
                        let _ = reply.send(Err(TrackerError::TrackerShutdown));
                        return;
                    };
                    // If the tracker is gone the reply is dropped with it.
                    let _ = commands
                        .send(TrackerCommand::Register {
                            job_id,
                            kind,
                            subject_name,
                            reply,
                        })
                        .await;
                }
                Err(err) if err.is_permission_denied() => {
                    log_warn!(
                        "Daemon requires permission to {} '{}'",
                        kind,
                        subject_name
                    );
                    let _ = reply.send(Err(TrackerError::PermissionDenied {
                        action: kind.to_string(),
                        subject: subject_name,
                    }));
                }
                Err(err) => {
                    log_warn!("Failed to {} '{}': {}", kind, subject_name, err);
                    let _ = reply.send(Err(TrackerError::Daemon(err)));
                }
            }
        });

        self.janitor
            .track_detached(HandlePurpose::Command, task.abort_handle());
    }

    fn register(
        &mut self,
        job_id: &str,
        kind: JobKind,
        subject_name: &str,
    ) -> Result<JobId, TrackerError> {
        let key = self.registry.create(job_id, kind, subject_name)?.processed_key();
        self.reconciler.begin(&key);
        self.publish();
        self.start_polling(job_id);

        log_info!("Tracking {} of '{}' (job {})", kind, subject_name, job_id);
        Ok(job_id.to_string())
    }

    fn start_polling(&mut self, job_id: &str) {
        let ctx = PollContext {
            daemon: Arc::clone(&self.daemon),
            job_id: job_id.to_string(),
            interval: self.config.polling.interval(),
            request_timeout: self.config.daemon.request_timeout(),
            verify_absent: self.config.polling.verify_absent_with_installed,
            jobs: self.jobs_tx.subscribe(),
            commands: self.commands.clone(),
        };
        let task = tokio::spawn(poll_job(ctx));
        self.janitor
            .track(job_id, HandlePurpose::Poll, task.abort_handle());
    }

    fn handle_fetch(&mut self, job_id: &str, fetch: FetchOutcome) {
        // Results for jobs that stopped polling are stale.
        if !self.janitor.is_polling(job_id) {
            log_debug!("Discarding late status for job {}", job_id);
            return;
        }
        let Some(job) = self.registry.get(job_id).cloned() else {
            return;
        };

        match fetch {
            FetchOutcome::Failed(err) => match self.governor.on_fetch_failure(&job, &err) {
                GovernorVerdict::AwaitPermission => self.await_permission(job_id),
                GovernorVerdict::Retry { fail_count } => {
                    if err.is_transient() {
                        log_debug!(
                            "Status fetch for job {} failed ({}/{}): {}",
                            job_id,
                            fail_count,
                            self.governor.max_failures(),
                            err
                        );
                    } else {
                        log_warn!(
                            "Status fetch for job {} returned a non-retryable error ({}/{}): {}",
                            job_id,
                            fail_count,
                            self.governor.max_failures(),
                            err
                        );
                    }
                    self.registry
                        .update(job_id, JobUpdate::fail_count(fail_count));
                    self.publish();
                }
                GovernorVerdict::GiveUp {
                    fail_count,
                    log_line,
                } => self.force_failure(job_id, fail_count, log_line),
                GovernorVerdict::AwaitRegistration { .. } => {}
            },
            FetchOutcome::Found(remote) => self.apply_remote(job_id, remote),
            FetchOutcome::Absent { installed } => {
                match LifecycleReconciler::presence(&job, false) {
                    Presence::NeverObserved => match self.governor.on_never_observed(&job) {
                        GovernorVerdict::GiveUp {
                            fail_count,
                            log_line,
                        } => self.force_failure(job_id, fail_count, log_line),
                        GovernorVerdict::AwaitRegistration { polls } => {
                            log_debug!(
                                "Job {} not registered by the daemon yet ({} checks)",
                                job_id,
                                polls
                            );
                            self.registry.update(
                                job_id,
                                JobUpdate {
                                    unregistered_polls: Some(polls),
                                    ..Default::default()
                                },
                            );
                            self.publish();
                        }
                        GovernorVerdict::Retry { .. } | GovernorVerdict::AwaitPermission => {}
                    },
                    Presence::ObservedThenAbsent => self.resolve_vanished(job_id, installed),
                    Presence::Observed | Presence::ObservedTerminal => {}
                }
            }
        }
    }

    fn await_permission(&mut self, job_id: &str) {
        let Some(job) = self.registry.get(job_id) else {
            return;
        };
        if job.awaiting_permission {
            return;
        }
        let event = TrackerEvent::PermissionRequired {
            job_id: job.id.clone(),
            subject_name: job.subject_name.clone(),
            kind: job.kind,
        };
        log_warn!(
            "Job {} is waiting for permission; polling continues",
            job_id
        );
        self.registry.update(
            job_id,
            JobUpdate {
                awaiting_permission: Some(true),
                ..Default::default()
            },
        );
        self.publish();
        self.emit(event);
    }

    fn apply_remote(&mut self, job_id: &str, remote: RemoteJob) {
        let status = remote
            .status
            .map(|s| s.to_job_status())
            .unwrap_or(JobStatus::Running);

        let applied = self.registry.update(
            job_id,
            JobUpdate {
                status: Some(status),
                log_lines: Some(remote.logs),
                fail_count: Some(0),
                observed: Some(true),
                awaiting_permission: Some(false),
                ..Default::default()
            },
        );
        if !applied {
            return;
        }
        self.publish();

        let Some(job) = self.registry.get(job_id).cloned() else {
            return;
        };
        let (classification, source) = self
            .classifier
            .classify_with_source(&Evidence::observed(&job));
        if classification.terminal {
            log_debug!(
                "Job {} resolved by {} ({} confidence)",
                job_id,
                source.unwrap_or("unknown"),
                classification.confidence
            );
            self.finalize(job_id, classification, None);
        }
    }

    fn resolve_vanished(&mut self, job_id: &str, installed: Option<bool>) {
        self.registry.update(job_id, JobUpdate::fail_count(0));
        let Some(job) = self.registry.get(job_id).cloned() else {
            return;
        };

        let classification = self
            .classifier
            .classify(&Evidence::absent(&job, installed));
        if !classification.terminal {
            return;
        }

        let summary = match installed {
            Some(listed) if !classification.succeeded => Some(mismatch_summary(&job, listed)),
            _ => None,
        };
        self.finalize(job_id, classification, summary);
    }

    fn force_failure(&mut self, job_id: &str, fail_count: u32, log_line: String) {
        log_warn!("Giving up on job {}: {}", job_id, log_line);
        self.registry.update(
            job_id,
            JobUpdate {
                status: Some(JobStatus::Failed),
                fail_count: Some(fail_count),
                append_log_line: Some(log_line.clone()),
                ..Default::default()
            },
        );
        self.finalize(job_id, Classification::failed(Confidence::High), Some(log_line));
    }

    /// Record the terminal status, stop the job's timers, and run the
    /// one-time side effects if this job has not been handled yet.
    fn finalize(&mut self, job_id: &str, classification: Classification, summary: Option<String>) {
        self.registry.update(
            job_id,
            JobUpdate {
                status: classification.terminal_status(),
                confidence: Some(classification.confidence),
                ..Default::default()
            },
        );
        self.janitor.release(job_id);
        self.publish();

        let Some(job) = self.registry.get(job_id).cloned() else {
            return;
        };

        if classification.confidence == Confidence::Low {
            log_warn!(
                "Job {} ({} of '{}') vanished without a final status; assuming it {}",
                job_id,
                job.kind,
                job.subject_name,
                if classification.succeeded {
                    "succeeded"
                } else {
                    "failed"
                }
            );
        }

        match self.reconciler.resolve(&job, &classification, summary) {
            Some(resolution) => self.run_side_effects(resolution),
            None => {
                log_debug!(
                    "Outcome for {} of '{}' already handled",
                    job.kind,
                    job.subject_name
                );
                // Still drop the duplicate from the registry, silently.
                let delay = self.reconciler.removal_delay(classification.succeeded);
                self.schedule_removal(job_id, delay);
            }
        }
    }

    fn run_side_effects(&mut self, resolution: Resolution) {
        let event = if resolution.succeeded {
            log_info!(
                "{} of '{}' completed ({} confidence)",
                resolution.kind,
                resolution.subject_name,
                resolution.confidence
            );
            TrackerEvent::Succeeded {
                job_id: resolution.job_id.clone(),
                subject_name: resolution.subject_name.clone(),
                kind: resolution.kind,
                confidence: resolution.confidence,
            }
        } else {
            let summary = resolution.summary.clone().unwrap_or_default();
            log_warn!(
                "{} of '{}' failed: {}",
                resolution.kind,
                resolution.subject_name,
                summary
            );
            TrackerEvent::Failed {
                job_id: resolution.job_id.clone(),
                subject_name: resolution.subject_name.clone(),
                kind: resolution.kind,
                summary,
                confidence: resolution.confidence,
            }
        };
        self.emit(event);

        let events = self.events.clone();
        let refresh_after = resolution.refresh_after;
        let refresh = tokio::spawn(async move {
            tokio::time::sleep(refresh_after).await;
            let _ = events.send(TrackerEvent::RefreshNeeded);
        });
        self.janitor
            .track_detached(HandlePurpose::Refresh, refresh.abort_handle());

        self.schedule_removal(&resolution.job_id, resolution.remove_after);
    }

    fn schedule_removal(&mut self, job_id: &str, delay: Duration) {
        let commands = self.commands.clone();
        let id = job_id.to_string();
        let removal = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(TrackerCommand::RemoveJob { job_id: id }).await;
            }
        });
        self.janitor
            .track(job_id, HandlePurpose::Removal, removal.abort_handle());
    }

    fn remove_job(&mut self, job_id: &str) {
        self.janitor.release(job_id);
        if self.registry.remove(job_id).is_some() {
            log_debug!("Removed job {} from the registry", job_id);
            self.publish();
        }
    }

    fn abandon(&mut self, job_id: &str) -> bool {
        let cancelled = self.janitor.release(job_id);
        let removed = self.registry.remove(job_id).is_some();
        if removed {
            log_info!(
                "Abandoned job {} ({} pending handle(s) cancelled)",
                job_id,
                cancelled
            );
            self.publish();
        }
        removed
    }

    fn shutdown(&mut self) {
        let cancelled = self.janitor.shutdown();
        log_debug!(
            "Tracker stopped with {} job(s) tracked, {} handle(s) cancelled",
            self.registry.len(),
            cancelled
        );
    }
}

// --- Actor loop ---

async fn run_tracker<D: DaemonClient + 'static>(
    mut rx: mpsc::Receiver<TrackerCommand>,
    mut state: TrackerState<D>,
    cancel: CancellationToken,
) {
    loop {
        let cmd = tokio::select! {
            cmd = rx.recv() => cmd,
            _ = cancel.cancelled() => None,
        };
        let Some(cmd) = cmd else {
            break;
        };

        match cmd {
            TrackerCommand::Install { app, reply } => {
                let subject_name = app.name.clone();
                state.spawn_command(JobKind::Install, subject_name, Some(app), reply);
            }
            TrackerCommand::Remove {
                subject_name,
                reply,
            } => {
                state.spawn_command(JobKind::Remove, subject_name, None, reply);
            }
            TrackerCommand::Track {
                job_id,
                kind,
                subject_name,
                reply,
            }
            | TrackerCommand::Register {
                job_id,
                kind,
                subject_name,
                reply,
            } => {
                let result = state.register(&job_id, kind, &subject_name);
                let _ = reply.send(result);
            }
            TrackerCommand::GetSnapshot { reply } => {
                let _ = reply.send(state.registry.snapshot());
            }
            TrackerCommand::Abandon { job_id, reply } => {
                let removed = state.abandon(&job_id);
                let _ = reply.send(removed);
            }
            TrackerCommand::Shutdown { reply } => {
                state.shutdown();
                let _ = reply.send(());
                return;
            }
            TrackerCommand::FetchCompleted { job_id, fetch } => {
                state.handle_fetch(&job_id, fetch);
            }
            TrackerCommand::RemoveJob { job_id } => {
                state.remove_job(&job_id);
            }
        }
    }

    state.shutdown();
}

// --- Spawn ---

/// Start the tracker actor. Nothing is spawned if `config` does not validate.
pub fn spawn_tracker<D: DaemonClient + 'static>(
    daemon: Arc<D>,
    config: TrackerConfig,
    cancel: CancellationToken,
) -> Result<(TrackerHandle, tokio::task::JoinHandle<()>), ConfigError> {
    config::validate(&config).map_err(ConfigError::Invalid)?;

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    let (jobs_tx, jobs_rx) = watch::channel(JobSnapshot::default());

    let state = TrackerState {
        daemon,
        registry: JobRegistry::new(),
        classifier: OutcomeClassifier::new(&config.classifier),
        governor: RetryGovernor::from_config(&config.polling),
        reconciler: LifecycleReconciler::new(&config.cleanup),
        janitor: ResourceJanitor::new(),
        jobs_tx,
        events: events.clone(),
        commands: tx.downgrade(),
        config,
    };

    let task_handle = tokio::spawn(run_tracker(rx, state, cancel));

    Ok((
        TrackerHandle {
            sender: tx,
            events,
            jobs: jobs_rx,
        },
        task_handle,
    ))
}
