//! Job slot records, history entries, and the status payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::process::Child;
use tokio::sync::oneshot;

/// Exit code recorded when the exit status itself could not be observed.
pub const UNOBSERVED_EXIT_CODE: i32 = -1;

/// Lifecycle of a job. `Running` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Running,
    Stopped,
    Completed,
    Failed,
}

impl JobState {
    /// Classify a worker exit code.
    pub fn from_exit_code(code: i32) -> Self {
        if code == 0 {
            JobState::Completed
        } else {
            JobState::Failed
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, JobState::Running)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Running => write!(f, "running"),
            JobState::Stopped => write!(f, "stopped"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

/// The occupant of the job slot.
pub struct JobRecord {
    pub execution_id: String,
    /// Worker handle. `None` once terminal, or while a stop request owns it.
    pub child: Option<Child>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub state: JobState,
    pub exit_code: Option<i32>,
    /// Merged configuration the worker was started with.
    pub config: Value,
    /// Dropping this sender wakes and ends the job's supervisor.
    pub(crate) supervisor_cancel: Option<oneshot::Sender<()>>,
}

impl JobRecord {
    pub fn new(execution_id: String, child: Option<Child>, config: Value) -> Self {
        Self {
            execution_id,
            child,
            started_at: Utc::now(),
            ended_at: None,
            state: JobState::Running,
            exit_code: None,
            config,
            supervisor_cancel: None,
        }
    }

    /// Whether a stop request currently holds the worker handle.
    pub fn is_stopping(&self) -> bool {
        self.state == JobState::Running && self.child.is_none()
    }

    /// Status payload as of `now`.
    pub fn report(&self, now: DateTime<Utc>) -> StatusReport {
        let until = self.ended_at.unwrap_or(now);
        StatusReport {
            execution_id: self.execution_id.clone(),
            start_time: self.started_at,
            end_time: self.ended_at,
            status: self.state,
            duration: format_duration(until - self.started_at),
            exit_code: self.exit_code,
        }
    }
}

impl std::fmt::Debug for JobRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRecord")
            .field("execution_id", &self.execution_id)
            .field("pid", &self.child.as_ref().and_then(|c| c.id()))
            .field("started_at", &self.started_at)
            .field("ended_at", &self.ended_at)
            .field("state", &self.state)
            .field("exit_code", &self.exit_code)
            .finish()
    }
}

/// What `status` hands back to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub execution_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub status: JobState,
    pub duration: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// One run in the execution history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub execution_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: JobState,
    pub duration: Option<String>,
    pub exit_code: Option<i32>,
    /// Override configuration submitted with the start request.
    pub config: Value,
}

impl HistoryEntry {
    pub fn launched(record: &JobRecord, config: Value) -> Self {
        Self {
            execution_id: record.execution_id.clone(),
            start_time: record.started_at,
            end_time: None,
            status: JobState::Running,
            duration: None,
            exit_code: None,
            config,
        }
    }
}

/// Render a duration as `H:MM:SS`, dropping fractional seconds.
pub fn format_duration(d: chrono::Duration) -> String {
    let secs = d.num_seconds().max(0);
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
