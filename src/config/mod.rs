//! Worker configuration: deep merge, persisted base file, and per-run
//! snapshots.
//!
//! Configuration is treated as a loosely-typed JSON tree. A run's snapshot is
//! the base file with the request override merged on top, written to
//! `{temp_dir}/{prefix}_{execution_id}.json` so the worker can read it.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("base configuration unavailable at {path}: {reason}")]
    Unavailable { path: PathBuf, reason: String },

    #[error("failed to write runtime configuration {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Merge `overlay` on top of `base`, returning a new tree.
///
/// Objects present on both sides merge key by key; any other combination
/// takes the overlay value as-is.
pub fn merge(base: &Value, overlay: &Value) -> Value {
    let mut merged = base.clone();
    merge_into(&mut merged, overlay);
    merged
}

/// In-place variant of [`merge`].
pub fn merge_into(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                let nested = value.is_object() && base_map.get(key).is_some_and(Value::is_object);
                if !nested {
                    base_map.insert(key.clone(), value.clone());
                } else if let Some(existing) = base_map.get_mut(key) {
                    merge_into(existing, value);
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Read and parse a JSON configuration file.
pub async fn load_base(path: &Path) -> Result<Value, ConfigError> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| ConfigError::Unavailable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&content).map_err(|e| ConfigError::Unavailable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Merge `update` into the persisted base configuration and write it back.
///
/// A missing or unparsable base file is treated as an empty object. Returns
/// the saved tree.
pub async fn save_base(path: &Path, update: &Value) -> anyhow::Result<Value> {
    let mut existing = match load_base(path).await {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "starting from an empty base configuration");
            Value::Object(Map::new())
        }
    };
    merge_into(&mut existing, update);

    let rendered = serde_json::to_string_pretty(&existing)?;
    tokio::fs::write(path, rendered)
        .await
        .with_context(|| format!("failed to save base configuration: {}", path.display()))?;
    info!(path = %path.display(), "base configuration saved");
    Ok(existing)
}

// ---------------------------------------------------------------------------
// Materializer
// ---------------------------------------------------------------------------

/// A snapshot written for one run.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub path: PathBuf,
    pub merged: Value,
}

/// Produces per-run configuration snapshots in a dedicated directory.
#[derive(Debug, Clone)]
pub struct Materializer {
    base_config: PathBuf,
    temp_dir: PathBuf,
    prefix: String,
}

impl Materializer {
    pub fn new(base_config: PathBuf, temp_dir: PathBuf, prefix: String) -> Self {
        Self {
            base_config,
            temp_dir,
            prefix,
        }
    }

    pub fn base_config(&self) -> &Path {
        &self.base_config
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Location of the snapshot for `execution_id`.
    pub fn snapshot_path(&self, execution_id: &str) -> PathBuf {
        self.temp_dir
            .join(format!("{}_{}.json", self.prefix, execution_id))
    }

    /// Create the snapshot directory if it does not exist yet. Used once at
    /// startup, before the runtime serves requests.
    pub fn ensure_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.temp_dir)
    }

    /// Merge `overlay` onto the base file and write the result for
    /// `execution_id`. The base file is only read.
    pub async fn materialize(
        &self,
        overlay: &Value,
        execution_id: &str,
    ) -> Result<RuntimeConfig, ConfigError> {
        let base = load_base(&self.base_config).await?;
        let merged = merge(&base, overlay);

        let path = self.snapshot_path(execution_id);
        let write_err = |source| ConfigError::Write {
            path: path.clone(),
            source,
        };

        tokio::fs::create_dir_all(&self.temp_dir)
            .await
            .map_err(write_err)?;
        let rendered = serde_json::to_string_pretty(&merged)
            .map_err(|e| write_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        tokio::fs::write(&path, rendered).await.map_err(write_err)?;

        debug!(execution_id, path = %path.display(), "runtime configuration written");
        Ok(RuntimeConfig { path, merged })
    }

    /// Remove the snapshot for `execution_id`. Failures are logged only.
    pub async fn cleanup(&self, execution_id: &str) {
        let path = self.snapshot_path(execution_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(execution_id, path = %path.display(), "runtime configuration removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                execution_id,
                path = %path.display(),
                error = %e,
                "failed to remove runtime configuration"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
