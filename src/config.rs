use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

pub const CONFIG_FILE_NAME: &str = "app-job-tracker.toml";

#[derive(Default, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    pub daemon: DaemonConfig,
    pub polling: PollingConfig,
    pub cleanup: CleanupConfig,
    pub classifier: ClassifierConfig,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    pub base_url: String,
    /// Upper bound on a single status fetch.
    pub request_timeout_ms: u64,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_ms: u64,
    /// Consecutive fetch failures tolerated before a job is forced to fail.
    pub max_fetch_failures: u32,
    /// 404s tolerated for a job the daemon has not reported yet. Kept apart
    /// from `max_fetch_failures` so a slow daemon start is not a failure.
    pub max_registration_polls: u32,
    /// Confirm a vanished job against the installed-apps list before
    /// announcing success.
    pub verify_absent_with_installed: bool,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct CleanupConfig {
    pub success_delay_ms: u64,
    /// Failed jobs stay visible this long so the error can be read.
    pub failure_delay_ms: u64,
    pub refresh_delay_ms: u64,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ClassifierConfig {
    pub success_phrases: Vec<String>,
    pub failure_phrases: Vec<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            request_timeout_ms: 5_000,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            max_fetch_failures: 5,
            max_registration_polls: 20,
            verify_absent_with_installed: false,
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            success_delay_ms: 100,
            failure_delay_ms: 8_000,
            refresh_delay_ms: 500,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            success_phrases: default_success_phrases(),
            failure_phrases: default_failure_phrases(),
        }
    }
}

pub fn default_success_phrases() -> Vec<String> {
    [
        "completed successfully",
        "successfully installed",
        "successfully uninstalled",
        "successfully removed",
        "job 'install' completed",
        "job 'remove' completed",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub fn default_failure_phrases() -> Vec<String> {
    ["failed", "error:", "exception", "traceback"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl DaemonConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl CleanupConfig {
    pub fn success_delay(&self) -> Duration {
        Duration::from_millis(self.success_delay_ms)
    }

    pub fn failure_delay(&self) -> Duration {
        Duration::from_millis(self.failure_delay_ms)
    }

    pub fn refresh_delay(&self) -> Duration {
        Duration::from_millis(self.refresh_delay_ms)
    }
}

pub fn validate(config: &TrackerConfig) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    let base_url = config.daemon.base_url.trim();
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        errors.push(format!(
            "daemon.base_url must start with http:// or https:// (got '{}')",
            config.daemon.base_url
        ));
    }

    if config.daemon.request_timeout_ms == 0 {
        errors.push("daemon.request_timeout_ms must be >= 1".to_string());
    }

    if config.polling.interval_ms == 0 {
        errors.push("polling.interval_ms must be >= 1".to_string());
    }

    if config.cleanup.failure_delay_ms < config.cleanup.success_delay_ms {
        errors.push(format!(
            "cleanup.failure_delay_ms ({}) must not be shorter than cleanup.success_delay_ms ({})",
            config.cleanup.failure_delay_ms, config.cleanup.success_delay_ms
        ));
    }

    for (list_name, phrases) in [
        ("success_phrases", &config.classifier.success_phrases),
        ("failure_phrases", &config.classifier.failure_phrases),
    ] {
        for (index, phrase) in phrases.iter().enumerate() {
            if phrase.trim().is_empty() {
                errors.push(format!(
                    "classifier.{}[{}] must not be empty",
                    list_name, index
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Load `app-job-tracker.toml` from `dir`, falling back to defaults when absent.
pub fn load_config(dir: &Path) -> Result<TrackerConfig, ConfigError> {
    let config_path = dir.join(CONFIG_FILE_NAME);

    if !config_path.exists() {
        return Ok(TrackerConfig::default());
    }

    load_config_from(&config_path)
}

/// Load and validate an explicit config file. A missing file is an error here.
pub fn load_config_from(config_path: &Path) -> Result<TrackerConfig, ConfigError> {
    let contents = std::fs::read_to_string(config_path).map_err(|e| ConfigError::Read {
        path: config_path.display().to_string(),
        message: e.to_string(),
    })?;

    let config: TrackerConfig = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: config_path.display().to_string(),
        message: e.to_string(),
    })?;

    validate(&config).map_err(ConfigError::Invalid)?;

    Ok(config)
}
