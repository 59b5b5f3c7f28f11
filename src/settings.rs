//! TOML settings for the confirmd orchestrator.
//!
//! Layered model: compiled-in defaults, overridden by a TOML file whose path
//! comes from the command line, the `CONFIRMD_CONFIG` environment variable,
//! or `./confirmd.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Environment variable naming the settings file.
pub const SETTINGS_ENV: &str = "CONFIRMD_CONFIG";

// ---------------------------------------------------------------------------
// Top-level settings
// ---------------------------------------------------------------------------

/// Root settings for the orchestrator process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub worker: WorkerSettings,
    #[serde(default)]
    pub paths: PathSettings,
    #[serde(default)]
    pub supervisor: SupervisorSettings,
    #[serde(default)]
    pub history: HistorySettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Settings {
    /// Load settings from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file: {}", path.display()))?;
        let settings: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse settings file: {}", path.display()))?;
        info!(path = %path.display(), "loaded confirmd settings");
        Ok(settings)
    }

    /// Resolve settings from, in order:
    /// 1. An explicit path (fails hard if it cannot be loaded).
    /// 2. The path in `CONFIRMD_CONFIG`.
    /// 3. `./confirmd.toml`.
    /// 4. Compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(SETTINGS_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(settings) => return Ok(settings),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "CONFIRMD_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new("confirmd.toml");
        if local.exists() {
            return Self::load(local);
        }

        debug!("no settings file found, using compiled-in defaults");
        Ok(Self::default())
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// HTTP control surface settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Listen address for the control API.
    pub bind: String,
    /// Directory holding `index.html` and other static frontend assets.
    pub frontend_dir: PathBuf,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8001".to_string(),
            frontend_dir: PathBuf::from("frontend"),
        }
    }
}

impl ServerSettings {
    /// Bind address after applying the `HOST` / `PORT` environment overrides.
    pub fn effective_bind(&self) -> String {
        let (default_host, default_port) = match self.bind.rsplit_once(':') {
            Some((host, port)) => (host.to_string(), port.to_string()),
            None => (self.bind.clone(), "8001".to_string()),
        };
        let host = std::env::var("HOST").unwrap_or(default_host);
        let port = std::env::var("PORT").unwrap_or(default_port);
        format!("{}:{}", host, port)
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// How the automation worker is launched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Interpreter or executable used to run the worker.
    pub program: String,
    /// Worker entry point, passed as the first argument to `program`.
    pub script: PathBuf,
    /// Extra arguments appended after the script.
    pub args: Vec<String>,
    /// Working directory; defaults to the script's parent directory.
    pub working_dir: Option<PathBuf>,
    /// Value of `EXECUTION_MODE` for orchestrated runs.
    pub execution_mode: String,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            program: "python".to_string(),
            script: PathBuf::from("admin_confirm_rpa_v2.0.py"),
            args: Vec::new(),
            working_dir: None,
            execution_mode: "web_interface".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Locations of the persisted base configuration and ephemeral snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub base_config: PathBuf,
    pub temp_config_dir: PathBuf,
    /// File name prefix for materialized snapshots: `{prefix}_{id}.json`.
    pub temp_config_prefix: String,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            base_config: PathBuf::from("admin_confirm_config.json"),
            temp_config_dir: PathBuf::from("temp_configs"),
            temp_config_prefix: "admin_confirm".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    /// Interval between exit-code polls of the running worker.
    pub poll_interval_ms: u64,
    /// How long a graceful stop waits before escalating to a kill.
    pub graceful_timeout_secs: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            graceful_timeout_secs: 10,
        }
    }
}

impl SupervisorSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn graceful_timeout(&self) -> Duration {
        Duration::from_secs(self.graceful_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    /// Number of entries returned when a caller does not pass a limit.
    pub default_limit: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self { default_limit: 10 }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Minimum tracing level when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON log lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
