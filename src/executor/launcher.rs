//! Worker process launch and the environment handshake.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::info;

use super::ExecutorError;
use crate::settings::WorkerSettings;

/// Path of the materialized configuration the worker should read.
pub const CONFIG_FILE_PATH_ENV: &str = "CONFIG_FILE_PATH";
/// Identifier of the run, echoed into the worker's own artifacts.
pub const EXECUTION_ID_ENV: &str = "EXECUTION_ID";
/// Distinguishes orchestrated runs from standalone invocations.
pub const EXECUTION_MODE_ENV: &str = "EXECUTION_MODE";

/// Starts the automation worker as `program script args...`.
#[derive(Debug, Clone)]
pub struct Launcher {
    program: String,
    script: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    execution_mode: String,
}

impl Launcher {
    pub fn new(settings: &WorkerSettings) -> Self {
        Self {
            program: settings.program.clone(),
            script: settings.script.clone(),
            args: settings.args.clone(),
            working_dir: settings.working_dir.clone(),
            execution_mode: settings.execution_mode.clone(),
        }
    }

    pub fn entry_point(&self) -> &Path {
        &self.script
    }

    /// Fails with `WorkerUnavailable` when the entry point is missing.
    pub fn check_available(&self) -> Result<(), ExecutorError> {
        if self.script.is_file() {
            Ok(())
        } else {
            Err(ExecutorError::WorkerUnavailable {
                path: self.script.clone(),
            })
        }
    }

    fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref().or_else(|| {
            self.script
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
        })
    }

    /// Build the worker command. Run context travels through the
    /// environment only, never through arguments.
    pub fn command(&self, config_path: &Path, execution_id: &str) -> Command {
        // The working directory may differ from ours, so hand the worker
        // absolute paths.
        let script = absolute(&self.script);
        let config_path = absolute(config_path);

        let mut cmd = Command::new(&self.program);
        cmd.arg(script)
            .args(&self.args)
            .env(CONFIG_FILE_PATH_ENV, config_path)
            .env(EXECUTION_ID_ENV, execution_id)
            .env(EXECUTION_MODE_ENV, &self.execution_mode)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = self.working_dir() {
            cmd.current_dir(dir);
        }
        cmd
    }

    /// Check the entry point and spawn the worker.
    pub fn spawn(&self, config_path: &Path, execution_id: &str) -> Result<Child, ExecutorError> {
        self.check_available()?;
        let child = self
            .command(config_path, execution_id)
            .spawn()
            .map_err(|source| ExecutorError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        info!(
            execution_id,
            pid = ?child.id(),
            program = %self.program,
            script = %self.script.display(),
            config = %config_path.display(),
            "worker started"
        );
        Ok(child)
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
