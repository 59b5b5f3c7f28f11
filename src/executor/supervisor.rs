//! Per-job background watcher.
//!
//! Polls the worker's exit status at a fixed interval and finalizes the job
//! when it exits. The task ends early when its cancel channel closes, which
//! happens as soon as any other flow finalizes the job.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::registry::Registry;
use crate::config::Materializer;

pub fn spawn(
    registry: Arc<Mutex<Registry>>,
    materializer: Materializer,
    execution_id: String,
    poll_interval: Duration,
    cancel: oneshot::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(supervise(
        registry,
        materializer,
        execution_id,
        poll_interval,
        cancel,
    ))
}

async fn supervise(
    registry: Arc<Mutex<Registry>>,
    materializer: Materializer,
    execution_id: String,
    poll_interval: Duration,
    mut cancel: oneshot::Receiver<()>,
) {
    debug!(%execution_id, "supervisor started");
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = &mut cancel => {
                debug!(%execution_id, "supervisor released");
                return;
            }

            _ = interval.tick() => {
                let mut registry = registry.lock().await;
                if let Some(report) = registry.reap(&execution_id, Utc::now()) {
                    drop(registry);
                    info!(
                        %execution_id,
                        status = %report.status,
                        exit_code = ?report.exit_code,
                        "supervisor observed worker exit"
                    );
                    materializer.cleanup(&execution_id).await;
                    return;
                }
                if !registry.is_watching(&execution_id) {
                    debug!(%execution_id, "job no longer in slot, supervisor exiting");
                    return;
                }
            }
        }
    }
}
