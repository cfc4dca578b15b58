use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use app_job_tracker::config::{self, TrackerConfig};
use app_job_tracker::daemon::{DaemonClient, HttpDaemonClient};
use app_job_tracker::log::parse_log_level;
use app_job_tracker::tracker::{spawn_tracker, TrackerHandle};
use app_job_tracker::types::{parse_job_kind, AppDescriptor, JobId, JobKind, TrackerEvent};
use app_job_tracker::{log_debug, log_info, log_warn};

const SHUTDOWN_POLL_INTERVAL_MS: u64 = 100;

#[derive(Parser)]
#[command(
    name = "app-job-tracker",
    about = "Install and remove robot apps, following each daemon job to completion"
)]
struct Cli {
    /// Directory holding app-job-tracker.toml (defaults to current directory)
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Path to config file (defaults to {root}/app-job-tracker.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Daemon base URL, overriding the config file
    #[arg(long)]
    daemon_url: Option<String>,

    /// Log verbosity level (error, warn, info, debug)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install an app and wait for the daemon to finish
    Install {
        /// App name as known to the daemon
        name: String,
        /// Where the daemon should fetch the app from
        #[arg(long, default_value = "hf_space")]
        source_kind: String,
        /// Source URL, when the source kind needs one
        #[arg(long)]
        url: Option<String>,
    },
    /// Remove an installed app and wait for the daemon to finish
    Remove {
        /// App name as known to the daemon
        name: String,
    },
    /// Follow a job that was started elsewhere
    Watch {
        /// Job id returned by the daemon
        job_id: String,
        /// Job kind (install or remove)
        #[arg(long, default_value = "install")]
        kind: String,
        /// App the job targets
        #[arg(long)]
        app: String,
    },
    /// List apps the daemon reports as installed
    Installed,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match parse_log_level(&cli.log_level) {
        Ok(level) => app_job_tracker::log::set_log_level(level),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }

    let result = run(cli).await;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let mut config = load_config(&cli.root, cli.config.as_deref())?;
    if let Some(url) = cli.daemon_url {
        config.daemon.base_url = url;
        config::validate(&config).map_err(|errors| errors.join("; "))?;
    }

    let daemon = Arc::new(HttpDaemonClient::new(&config.daemon).map_err(|e| e.to_string())?);
    log_debug!("Using daemon at {}", daemon.base_url());

    match cli.command {
        Commands::Install {
            name,
            source_kind,
            url,
        } => {
            let app = AppDescriptor {
                name,
                source_kind,
                url,
                ..Default::default()
            };
            follow(daemon, config, Request::Install(app)).await
        }
        Commands::Remove { name } => follow(daemon, config, Request::Remove(name)).await,
        Commands::Watch { job_id, kind, app } => {
            let kind = parse_job_kind(&kind)?;
            follow(daemon, config, Request::Watch { job_id, kind, app }).await
        }
        Commands::Installed => handle_installed(daemon.as_ref()).await,
    }
}

fn load_config(root: &Path, config_path: Option<&Path>) -> Result<TrackerConfig, String> {
    let config = match config_path {
        Some(path) => config::load_config_from(path),
        None => config::load_config(root),
    };
    config.map_err(|e| e.to_string())
}

enum Request {
    Install(AppDescriptor),
    Remove(String),
    Watch {
        job_id: JobId,
        kind: JobKind,
        app: String,
    },
}

async fn issue(handle: &TrackerHandle, request: Request) -> Result<JobId, String> {
    let issued = match request {
        Request::Install(app) => handle.install(app).await,
        Request::Remove(name) => handle.remove(&name).await,
        Request::Watch { job_id, kind, app } => handle.track(&job_id, kind, &app).await,
    };
    issued.map_err(|e| {
        if e.is_permission_denied() {
            format!("{}. Approve the request on the robot and retry.", e)
        } else {
            e.to_string()
        }
    })
}

/// Run the tracker until the issued job resolves or a signal arrives.
async fn follow(
    daemon: Arc<HttpDaemonClient>,
    config: TrackerConfig,
    request: Request,
) -> Result<(), String> {
    let shutdown = install_signal_handlers()?;

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                cancel_clone.cancel();
                break;
            }
            tokio::time::sleep(Duration::from_millis(SHUTDOWN_POLL_INTERVAL_MS)).await;
        }
    });

    let (handle, tracker_task) =
        spawn_tracker(daemon, config, cancel.clone()).map_err(|e| e.to_string())?;
    let mut events = handle.subscribe();

    let job_id = issue(&handle, request).await?;
    log_info!("Job {} accepted by the daemon", job_id);

    let outcome = tokio::select! {
        outcome = wait_for_outcome(&mut events, &job_id) => outcome,
        _ = cancel.cancelled() => Err(format!("Interrupted; job {} may still be running on the daemon", job_id)),
    };

    let _ = handle.shutdown().await;
    if let Err(err) = tracker_task.await {
        log_warn!("Tracker task panicked: {:?}", err);
    }

    outcome
}

async fn wait_for_outcome(
    events: &mut broadcast::Receiver<TrackerEvent>,
    job_id: &str,
) -> Result<(), String> {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log_warn!("Missed {} tracker event(s)", skipped);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => {
                return Err("Tracker stopped before the job resolved".to_string());
            }
        };

        if event.job_id() != Some(job_id) {
            continue;
        }

        match event {
            TrackerEvent::Succeeded {
                subject_name,
                kind,
                confidence,
                ..
            } => {
                println!("{} of '{}' succeeded ({} confidence)", kind, subject_name, confidence);
                return Ok(());
            }
            TrackerEvent::Failed {
                subject_name,
                kind,
                summary,
                ..
            } => {
                return Err(format!("{} of '{}' failed: {}", kind, subject_name, summary));
            }
            TrackerEvent::PermissionRequired { subject_name, .. } => {
                println!(
                    "Waiting for permission on the robot to continue with '{}'...",
                    subject_name
                );
            }
            TrackerEvent::RefreshNeeded => {}
        }
    }
}

async fn handle_installed<D: DaemonClient>(daemon: &D) -> Result<(), String> {
    let apps = daemon.list_installed().await.map_err(|e| e.to_string())?;
    if apps.is_empty() {
        println!("No apps installed.");
        return Ok(());
    }
    for app in apps {
        match app.description {
            Some(description) => println!("{}  {}", app.name, description),
            None => println!("{}", app.name),
        }
    }
    Ok(())
}

/// Register SIGTERM and SIGINT handlers that raise the returned flag.
fn install_signal_handlers() -> Result<Arc<AtomicBool>, String> {
    let flag = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&flag))
        .map_err(|e| format!("Failed to register SIGTERM handler: {}", e))?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&flag))
        .map_err(|e| format!("Failed to register SIGINT handler: {}", e))?;
    Ok(flag)
}
