//! Single-slot job orchestrator for the automation worker.
//!
//! [`Executor`] is the public face: `start`, `stop`, `status`, `history`.
//! At most one worker runs at a time. Each run gets a materialized
//! configuration snapshot, a worker process started with an environment
//! handshake, and a supervisor task that finalizes the job when the worker
//! exits. Status polls, stop requests, and the supervisor all go through the
//! same registry lock, so whichever observes the end of a job first records
//! it and the rest see the finished result.

pub mod job;
pub mod launcher;
pub mod registry;
pub mod supervisor;
pub mod terminate;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{ConfigError, Materializer};
use crate::settings::Settings;

pub use self::job::{HistoryEntry, JobState, StatusReport};
use self::job::JobRecord;
use self::launcher::Launcher;
use self::registry::{Registry, Snapshot, StopClaim};

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("a job is already running (execution id {execution_id})")]
    AlreadyRunning { execution_id: String },

    #[error("worker entry point not found at {path}")]
    WorkerUnavailable { path: PathBuf },

    #[error("failed to launch worker with {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("runtime configuration unavailable: {0}")]
    ConfigUnavailable(#[source] ConfigError),

    #[error("failed to materialize runtime configuration: {0}")]
    Materialize(#[source] ConfigError),
}

impl From<ConfigError> for ExecutorError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Unavailable { .. } => ExecutorError::ConfigUnavailable(err),
            ConfigError::Write { .. } => ExecutorError::Materialize(err),
        }
    }
}

impl ExecutorError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            ExecutorError::AlreadyRunning { .. } => "already_running",
            ExecutorError::WorkerUnavailable { .. } | ExecutorError::Spawn { .. } => {
                "worker_unavailable"
            }
            ExecutorError::ConfigUnavailable(_) => "config_unavailable",
            ExecutorError::Materialize(_) => "materialize_failed",
        }
    }
}

/// Cheaply cloneable handle to the orchestrator.
#[derive(Clone)]
pub struct Executor {
    registry: Arc<Mutex<Registry>>,
    materializer: Materializer,
    launcher: Arc<Launcher>,
    poll_interval: Duration,
    graceful_timeout: Duration,
    default_history_limit: usize,
}

impl Executor {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let materializer = Materializer::new(
            settings.paths.base_config.clone(),
            settings.paths.temp_config_dir.clone(),
            settings.paths.temp_config_prefix.clone(),
        );
        materializer.ensure_dir().with_context(|| {
            format!(
                "failed to create runtime config directory: {}",
                materializer.temp_dir().display()
            )
        })?;

        let launcher = Launcher::new(&settings.worker);
        info!(
            script = %launcher.entry_point().display(),
            base_config = %materializer.base_config().display(),
            temp_dir = %materializer.temp_dir().display(),
            "executor initialized"
        );

        Ok(Self {
            registry: Arc::new(Mutex::new(Registry::new())),
            materializer,
            launcher: Arc::new(launcher),
            poll_interval: settings.supervisor.poll_interval(),
            graceful_timeout: settings.supervisor.graceful_timeout(),
            default_history_limit: settings.history.default_limit,
        })
    }

    pub fn materializer(&self) -> &Materializer {
        &self.materializer
    }

    pub fn default_history_limit(&self) -> usize {
        self.default_history_limit
    }

    /// Launch a new run with `overlay` merged onto the base configuration.
    ///
    /// Returns as soon as the worker is spawned. The slot stays locked for
    /// the whole launch, so two concurrent starts cannot both succeed.
    pub async fn start(&self, overlay: Value) -> Result<String, ExecutorError> {
        let mut registry = self.registry.lock().await;

        if let Err(execution_id) = registry.admit() {
            warn!(%execution_id, "start rejected, job already running");
            return Err(ExecutorError::AlreadyRunning { execution_id });
        }
        self.launcher.check_available()?;

        let execution_id = Uuid::new_v4().to_string();
        let runtime = self
            .materializer
            .materialize(&overlay, &execution_id)
            .await?;

        let child = match self.launcher.spawn(&runtime.path, &execution_id) {
            Ok(child) => child,
            Err(e) => {
                self.materializer.cleanup(&execution_id).await;
                return Err(e);
            }
        };

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let mut record = JobRecord::new(execution_id.clone(), Some(child), runtime.merged);
        record.supervisor_cancel = Some(cancel_tx);
        registry.insert(record, overlay);
        drop(registry);

        supervisor::spawn(
            Arc::clone(&self.registry),
            self.materializer.clone(),
            execution_id.clone(),
            self.poll_interval,
            cancel_rx,
        );

        info!(%execution_id, "job started");
        Ok(execution_id)
    }

    /// Stop the running worker.
    ///
    /// Graceful stops send SIGTERM and escalate to SIGKILL after the
    /// configured timeout; `force` kills at once. Returns `false` when there
    /// is nothing to stop.
    ///
    /// The stop runs on its own task. Dropping this future (a client that
    /// disconnects, a caller-side timeout) does not interrupt it, so the
    /// worker is always either finalized as stopped or handed back.
    pub async fn stop(&self, force: bool) -> bool {
        let task = tokio::spawn(stop_job(
            Arc::clone(&self.registry),
            self.materializer.clone(),
            force,
            self.graceful_timeout,
        ));
        match task.await {
            Ok(stopped) => stopped,
            Err(e) => {
                error!(error = %e, "stop task failed");
                false
            }
        }
    }

    /// Current job, if any. See [`Snapshot`] for the one-shot stop result.
    pub async fn status(&self) -> Option<StatusReport> {
        let snapshot = self.registry.lock().await.status(Utc::now());
        if let Snapshot::Reaped(report) = &snapshot {
            self.materializer.cleanup(&report.execution_id).await;
        }
        snapshot.into_report()
    }

    /// The last `limit` runs in launch order.
    pub async fn history(&self, limit: usize) -> Vec<HistoryEntry> {
        self.registry.lock().await.history(limit)
    }
}

/// Claim the worker, terminate it, and record the outcome.
async fn stop_job(
    registry: Arc<Mutex<Registry>>,
    materializer: Materializer,
    force: bool,
    graceful_timeout: Duration,
) -> bool {
    let claim = registry.lock().await.claim_for_stop(Utc::now());

    let (execution_id, mut child) = match claim {
        StopClaim::Empty | StopClaim::NotRunning => return false,
        StopClaim::AlreadyExited(report) => {
            info!(
                execution_id = %report.execution_id,
                status = %report.status,
                "worker had already exited, nothing to stop"
            );
            materializer.cleanup(&report.execution_id).await;
            return false;
        }
        StopClaim::Claimed {
            execution_id,
            child,
        } => (execution_id, child),
    };

    info!(%execution_id, force, pid = ?child.id(), "stopping job");
    match terminate::terminate(&mut child, force, graceful_timeout).await {
        Ok(outcome) => {
            info!(%execution_id, ?outcome, "worker terminated");
            let finished = registry
                .lock()
                .await
                .finish_stop(&execution_id, Utc::now());
            materializer.cleanup(&execution_id).await;
            finished.is_some()
        }
        Err(e) => {
            error!(%execution_id, error = %e, "failed to stop worker");
            registry.lock().await.abandon_stop(&execution_id, child);
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
