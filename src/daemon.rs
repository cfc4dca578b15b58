use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use serde::Deserialize;

use crate::config::DaemonConfig;
use crate::error::DaemonError;
use crate::log_debug;
use crate::types::{AppDescriptor, JobId, RemoteJob};

/// Trait for talking to the app daemon. Enables mocking in tracker tests.
pub trait DaemonClient: Send + Sync {
    /// Ask the daemon to install an app. Returns the daemon's job id.
    fn install(
        &self,
        app: &AppDescriptor,
    ) -> impl std::future::Future<Output = Result<JobId, DaemonError>> + Send;

    /// Ask the daemon to remove an installed app. Returns the daemon's job id.
    fn remove(
        &self,
        subject_name: &str,
    ) -> impl std::future::Future<Output = Result<JobId, DaemonError>> + Send;

    /// Current record for a job, or `None` when the daemon does not know the id.
    fn job_status(
        &self,
        job_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<RemoteJob>, DaemonError>> + Send;

    /// Apps the daemon currently reports as installed.
    fn list_installed(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<AppDescriptor>, DaemonError>> + Send;
}

#[derive(Deserialize)]
struct JobAccepted {
    job_id: String,
}

/// HTTP implementation against the daemon's REST API.
pub struct HttpDaemonClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpDaemonClient {
    pub fn new(config: &DaemonConfig) -> Result<Self, DaemonError> {
        let timeout = config.request_timeout();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DaemonError::Unreachable(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim().to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build `{base_url}/seg/seg/...`, percent-encoding each segment.
    pub fn endpoint(&self, segments: &[&str]) -> Result<reqwest::Url, DaemonError> {
        let mut url = reqwest::Url::parse(&self.base_url).map_err(|e| {
            DaemonError::Unreachable(format!("Invalid daemon URL '{}': {}", self.base_url, e))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                DaemonError::Unreachable(format!(
                    "Daemon URL '{}' cannot carry a path",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn map_request_error(&self, err: reqwest::Error) -> DaemonError {
        if err.is_timeout() {
            DaemonError::Timeout(self.timeout)
        } else {
            DaemonError::from(err)
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, DaemonError> {
        let response = request
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;
        Ok(response)
    }

    async fn accepted_job(&self, response: reqwest::Response) -> Result<JobId, DaemonError> {
        let response = error_for_status(response).await?;
        let accepted: JobAccepted = response
            .json()
            .await
            .map_err(|e| DaemonError::Decode(e.to_string()))?;
        Ok(accepted.job_id)
    }
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, DaemonError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(DaemonError::from_status(status.as_u16(), &body))
}

impl DaemonClient for HttpDaemonClient {
    async fn install(&self, app: &AppDescriptor) -> Result<JobId, DaemonError> {
        let url = self.endpoint(&["api", "apps", "install"])?;
        log_debug!("POST {} ({})", url, app.name);
        let response = self.send(self.client.post(url).json(app)).await?;
        self.accepted_job(response).await
    }

    async fn remove(&self, subject_name: &str) -> Result<JobId, DaemonError> {
        let url = self.endpoint(&["api", "apps", "remove", subject_name])?;
        log_debug!("POST {}", url);
        let response = self.send(self.client.post(url)).await?;
        self.accepted_job(response).await
    }

    async fn job_status(&self, job_id: &str) -> Result<Option<RemoteJob>, DaemonError> {
        let url = self.endpoint(&["api", "apps", "job-status", job_id])?;
        let response = self.send(self.client.get(url)).await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = error_for_status(response).await?;
        let job: RemoteJob = response
            .json()
            .await
            .map_err(|e| DaemonError::Decode(e.to_string()))?;
        Ok(Some(job))
    }

    async fn list_installed(&self) -> Result<Vec<AppDescriptor>, DaemonError> {
        let url = self.endpoint(&["api", "apps", "list-available", "installed"])?;
        let response = self.send(self.client.get(url)).await?;
        let response = error_for_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| DaemonError::Decode(e.to_string()))
    }
}

/// One scripted answer from [`MockDaemonClient::job_status`].
#[derive(Clone, Debug)]
pub enum MockStatus {
    Reply(Result<Option<RemoteJob>, DaemonError>),
    /// Never answers; exercises the fetch timeout.
    Hang,
}

impl MockStatus {
    pub fn found(job: RemoteJob) -> Self {
        MockStatus::Reply(Ok(Some(job)))
    }

    pub fn not_found() -> Self {
        MockStatus::Reply(Ok(None))
    }

    pub fn error(err: DaemonError) -> Self {
        MockStatus::Reply(Err(err))
    }
}

#[derive(Default)]
struct MockState {
    commands: VecDeque<Result<JobId, DaemonError>>,
    statuses: HashMap<JobId, VecDeque<MockStatus>>,
    status_calls: HashMap<JobId, usize>,
    installed: Option<Result<Vec<AppDescriptor>, DaemonError>>,
    installed_calls: usize,
}

/// Mock daemon for tracker tests.
///
/// Install/remove calls pop the next scripted command result. Status calls pop
/// per-job scripted answers; the last answer for a job repeats forever.
#[derive(Default)]
pub struct MockDaemonClient {
    state: tokio::sync::Mutex<MockState>,
}

impl MockDaemonClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_command(&self, result: Result<JobId, DaemonError>) {
        self.state.lock().await.commands.push_back(result);
    }

    pub async fn script_status(&self, job_id: &str, answers: Vec<MockStatus>) {
        self.state
            .lock()
            .await
            .statuses
            .insert(job_id.to_string(), answers.into());
    }

    pub async fn set_installed(&self, result: Result<Vec<AppDescriptor>, DaemonError>) {
        self.state.lock().await.installed = Some(result);
    }

    pub async fn status_calls(&self, job_id: &str) -> usize {
        self.state
            .lock()
            .await
            .status_calls
            .get(job_id)
            .copied()
            .unwrap_or(0)
    }

    pub async fn installed_calls(&self) -> usize {
        self.state.lock().await.installed_calls
    }

    async fn next_command(&self) -> Result<JobId, DaemonError> {
        self.state.lock().await.commands.pop_front().unwrap_or_else(|| {
            Err(DaemonError::Decode(
                "MockDaemonClient: no more command results".to_string(),
            ))
        })
    }
}

impl DaemonClient for MockDaemonClient {
    async fn install(&self, _app: &AppDescriptor) -> Result<JobId, DaemonError> {
        self.next_command().await
    }

    async fn remove(&self, _subject_name: &str) -> Result<JobId, DaemonError> {
        self.next_command().await
    }

    async fn job_status(&self, job_id: &str) -> Result<Option<RemoteJob>, DaemonError> {
        let answer = {
            let mut state = self.state.lock().await;
            *state.status_calls.entry(job_id.to_string()).or_insert(0) += 1;
            match state.statuses.get_mut(job_id) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match answer {
            Some(MockStatus::Reply(result)) => result,
            Some(MockStatus::Hang) => std::future::pending().await,
            None => Ok(None),
        }
    }

    async fn list_installed(&self) -> Result<Vec<AppDescriptor>, DaemonError> {
        let mut state = self.state.lock().await;
        state.installed_calls += 1;
        state
            .installed
            .clone()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}
