//! The job slot and execution history.
//!
//! `Registry` is plain data; the executor keeps it behind one mutex and every
//! flow (start, status poll, stop, supervisor) mutates it only while holding
//! that lock. Each method below is therefore one critical section, which is
//! what makes terminal bookkeeping happen exactly once per job.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::process::Child;
use tracing::{debug, info, warn};

use super::job::{HistoryEntry, JobRecord, JobState, StatusReport};
use super::terminate::poll_child;

/// Result of a status query.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    /// Slot is empty.
    Idle,
    /// Worker still running.
    Live(StatusReport),
    /// This query observed the worker's exit and finalized the job. The
    /// caller owns cleanup of the run's ephemeral files.
    Reaped(StatusReport),
    /// A stop result, handed out once; the slot is now empty.
    Stopped(StatusReport),
}

impl Snapshot {
    pub fn into_report(self) -> Option<StatusReport> {
        match self {
            Snapshot::Idle => None,
            Snapshot::Live(r) | Snapshot::Reaped(r) | Snapshot::Stopped(r) => Some(r),
        }
    }
}

/// Outcome of claiming the worker for a stop request.
#[derive(Debug)]
pub enum StopClaim {
    /// Nothing in the slot.
    Empty,
    /// The occupant is already terminal or another stop holds the worker.
    NotRunning,
    /// The worker had exited before the stop arrived; the job was finalized
    /// from its exit code instead.
    AlreadyExited(StatusReport),
    /// The caller now owns the worker handle and must call
    /// [`Registry::finish_stop`] or [`Registry::abandon_stop`].
    Claimed { execution_id: String, child: Child },
}

#[derive(Debug, Default)]
pub struct Registry {
    slot: Option<JobRecord>,
    history: Vec<HistoryEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&JobRecord> {
        self.slot.as_ref()
    }

    /// Execution id of the job blocking a new start, if any.
    ///
    /// A stopped record does not block; it is discarded here so the slot is
    /// ready for the next job.
    pub fn admit(&mut self) -> Result<(), String> {
        match &self.slot {
            Some(record) if record.state == JobState::Stopped => {
                debug!(
                    execution_id = %record.execution_id,
                    "discarding unreported stop result for new job"
                );
                self.slot = None;
                Ok(())
            }
            Some(record) => Err(record.execution_id.clone()),
            None => Ok(()),
        }
    }

    /// Place a freshly launched job in the slot and open its history entry.
    ///
    /// Callers must have passed [`Registry::admit`] under the same lock.
    pub fn insert(&mut self, record: JobRecord, request: Value) {
        debug_assert!(self.slot.is_none(), "slot must be free before insert");
        self.history.push(HistoryEntry::launched(&record, request));
        self.slot = Some(record);
    }

    /// Whether the slot still holds `execution_id` as a live job.
    pub fn is_watching(&self, execution_id: &str) -> bool {
        self.slot
            .as_ref()
            .is_some_and(|r| r.execution_id == execution_id && r.state == JobState::Running)
    }

    /// Poll the worker of `execution_id` and finalize the job if it exited.
    ///
    /// Returns the terminal report only when this call made the transition.
    /// A job whose worker is held by a stop request is left alone.
    pub fn reap(&mut self, execution_id: &str, now: DateTime<Utc>) -> Option<StatusReport> {
        let record = self
            .slot
            .as_mut()
            .filter(|r| r.execution_id == execution_id && r.state == JobState::Running)?;
        let code = poll_child(record.child.as_mut()?)?;
        self.finalize(JobState::from_exit_code(code), Some(code), now)
    }

    /// Status query: reports the live job, or finalizes and releases it.
    pub fn status(&mut self, now: DateTime<Utc>) -> Snapshot {
        let (execution_id, state) = match &self.slot {
            None => return Snapshot::Idle,
            Some(record) => (record.execution_id.clone(), record.state),
        };

        match state {
            JobState::Running => match self.reap(&execution_id, now) {
                Some(report) => Snapshot::Reaped(report),
                None => match &self.slot {
                    Some(record) => Snapshot::Live(record.report(now)),
                    None => Snapshot::Idle,
                },
            },
            JobState::Stopped => match self.slot.take() {
                Some(record) => {
                    debug!(%execution_id, "stop result reported, slot released");
                    Snapshot::Stopped(record.report(now))
                }
                None => Snapshot::Idle,
            },
            // `finalize` frees the slot for these states. A record found here
            // anyway is released as an exited job, with cleanup left to the
            // caller.
            JobState::Completed | JobState::Failed => match self.slot.take() {
                Some(record) => {
                    warn!(%execution_id, state = %state, "releasing finished job left in slot");
                    Snapshot::Reaped(record.report(now))
                }
                None => Snapshot::Idle,
            },
        }
    }

    /// Take the worker out of the slot so it can be terminated without
    /// holding the lock.
    pub fn claim_for_stop(&mut self, now: DateTime<Utc>) -> StopClaim {
        let Some(record) = self.slot.as_mut() else {
            return StopClaim::Empty;
        };
        if record.state != JobState::Running {
            return StopClaim::NotRunning;
        }
        let Some(child) = record.child.as_mut() else {
            return StopClaim::NotRunning;
        };

        if let Some(code) = poll_child(child) {
            return match self.finalize(JobState::from_exit_code(code), Some(code), now) {
                Some(report) => StopClaim::AlreadyExited(report),
                None => StopClaim::Empty,
            };
        }

        match record.child.take() {
            Some(child) => StopClaim::Claimed {
                execution_id: record.execution_id.clone(),
                child,
            },
            None => StopClaim::NotRunning,
        }
    }

    /// Record a successful stop. The stopped record stays in the slot until
    /// the next status query picks it up.
    pub fn finish_stop(&mut self, execution_id: &str, now: DateTime<Utc>) -> Option<StatusReport> {
        if !self.is_watching(execution_id) {
            return None;
        }
        self.finalize(JobState::Stopped, None, now)
    }

    /// Give the worker back after a failed termination attempt.
    pub fn abandon_stop(&mut self, execution_id: &str, child: Child) {
        if let Some(record) = self
            .slot
            .as_mut()
            .filter(|r| r.execution_id == execution_id && r.child.is_none())
        {
            record.child = Some(child);
        }
    }

    /// Most recent `limit` history entries in launch order.
    pub fn history(&self, limit: usize) -> Vec<HistoryEntry> {
        let start = self.history.len().saturating_sub(limit);
        self.history[start..].to_vec()
    }

    /// Terminal bookkeeping for the slot occupant: state, end time, exit
    /// code, history entry, and release of the slot. A stopped job keeps its
    /// record in the slot for one status read.
    fn finalize(
        &mut self,
        state: JobState,
        exit_code: Option<i32>,
        now: DateTime<Utc>,
    ) -> Option<StatusReport> {
        debug_assert!(state.is_terminal());
        let record = self.slot.as_mut()?;

        record.state = state;
        record.ended_at = Some(now);
        record.exit_code = exit_code;
        record.child = None;
        record.supervisor_cancel = None;
        let report = record.report(now);

        if let Some(entry) = self
            .history
            .iter_mut()
            .rev()
            .find(|e| e.execution_id == report.execution_id && e.status == JobState::Running)
        {
            entry.status = state;
            entry.end_time = Some(now);
            entry.exit_code = exit_code;
            entry.duration = Some(report.duration.clone());
        }

        info!(
            execution_id = %report.execution_id,
            status = %state,
            exit_code = ?exit_code,
            duration = %report.duration,
            "job finished"
        );

        if state != JobState::Stopped {
            self.slot = None;
        }
        Some(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn launch(registry: &mut Registry, id: &str) {
        registry.admit().unwrap();
        registry.insert(JobRecord::new(id.into(), None, json!({})), json!({"run": id}));
    }

    #[test]
    fn test_admit_rejects_running_job() {
        let mut registry = Registry::new();
        launch(&mut registry, "job-1");
        assert_eq!(registry.admit(), Err("job-1".to_string()));
        assert_eq!(registry.current().unwrap().state, JobState::Running);
    }

    #[test]
    fn test_stop_result_is_reported_once() {
        let mut registry = Registry::new();
        launch(&mut registry, "job-1");
        let now = Utc::now();

        let report = registry.finish_stop("job-1", now).unwrap();
        assert_eq!(report.status, JobState::Stopped);
        assert_eq!(report.exit_code, None);

        match registry.status(now) {
            Snapshot::Stopped(r) => {
                assert_eq!(r.execution_id, "job-1");
                assert_eq!(r.end_time, Some(now));
            }
            other => panic!("expected stopped snapshot, got {:?}", other),
        }
        assert_eq!(registry.status(now), Snapshot::Idle);
        assert!(registry.current().is_none());
    }

    #[test]
    fn test_stopped_record_does_not_block_start() {
        let mut registry = Registry::new();
        launch(&mut registry, "job-1");
        registry.finish_stop("job-1", Utc::now()).unwrap();

        launch(&mut registry, "job-2");
        assert_eq!(registry.current().unwrap().execution_id, "job-2");

        let history = registry.history(10);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, JobState::Stopped);
        assert_eq!(history[1].status, JobState::Running);
    }

    #[test]
    fn test_finish_stop_is_noop_for_other_jobs() {
        let mut registry = Registry::new();
        launch(&mut registry, "job-1");
        assert!(registry.finish_stop("job-0", Utc::now()).is_none());
        assert!(registry.finish_stop("job-1", Utc::now()).is_some());
        // Already terminal: a second stop does not rewrite the record.
        assert!(registry.finish_stop("job-1", Utc::now()).is_none());
    }

    #[test]
    fn test_history_suffix() {
        let mut registry = Registry::new();
        for i in 0..5 {
            let id = format!("job-{}", i);
            launch(&mut registry, &id);
            registry.finish_stop(&id, Utc::now()).unwrap();
        }

        let ids: Vec<_> = registry
            .history(3)
            .into_iter()
            .map(|e| e.execution_id)
            .collect();
        assert_eq!(ids, vec!["job-2", "job-3", "job-4"]);
        assert_eq!(registry.history(50).len(), 5);
        assert!(registry.history(0).is_empty());
        assert_eq!(registry.history(1)[0].config, json!({"run": "job-4"}));
    }

    #[test]
    fn test_live_job_without_worker_reports_running() {
        // A record whose worker is held by an in-flight stop.
        let mut registry = Registry::new();
        launch(&mut registry, "job-1");
        assert!(registry.current().unwrap().is_stopping());
        assert!(matches!(registry.claim_for_stop(Utc::now()), StopClaim::NotRunning));

        match registry.status(Utc::now()) {
            Snapshot::Live(r) => assert_eq!(r.status, JobState::Running),
            other => panic!("expected live snapshot, got {:?}", other),
        }
        assert!(registry.reap("job-1", Utc::now()).is_none());
        assert!(registry.is_watching("job-1"));
    }

    #[test]
    fn test_finished_record_in_slot_is_released_as_reaped() {
        let mut registry = Registry::new();
        let mut record = JobRecord::new("job-1".into(), None, json!({}));
        record.state = JobState::Failed;
        record.exit_code = Some(2);
        registry.slot = Some(record);

        match registry.status(Utc::now()) {
            Snapshot::Reaped(r) => {
                assert_eq!(r.status, JobState::Failed);
                assert_eq!(r.exit_code, Some(2));
            }
            other => panic!("expected reaped snapshot, got {:?}", other),
        }
        assert!(registry.current().is_none());
    }

    #[test]
    fn test_claim_on_empty_slot() {
        let mut registry = Registry::new();
        assert!(matches!(registry.claim_for_stop(Utc::now()), StopClaim::Empty));
    }
}
