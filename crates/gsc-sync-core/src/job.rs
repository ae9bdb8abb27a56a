//! Job and task-run types for the persisted progress state machine.
//!
//! # State machines
//!
//! ```text
//! Job:      pending → running → success
//!                        ↓
//!                      error
//!
//! TaskRun:  running → success | empty | error
//! ```
//!
//! Terminal states are immutable. A task whose range is already covered never
//! gets a task run at all; it is reported as [`TaskOutcome::UpToDate`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::SearchType;

// =============================================================================
// Job Status
// =============================================================================

/// Status of a sync job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created by a trigger, worker not yet started.
    Pending,
    /// Worker is iterating over tasks.
    Running,
    /// Every task finished without error.
    Success,
    /// A task failed, the worker crashed, or the job timed out.
    Error,
}

impl JobStatus {
    /// Returns the string representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Error => "error",
        }
    }

    /// Returns true if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Error)
    }
}

/// Error type for parsing a status from a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError(String);

impl std::fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid status: {}", self.0)
    }
}

impl std::error::Error for ParseStatusError {}

impl std::str::FromStr for JobStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "success" => Ok(JobStatus::Success),
            "error" => Ok(JobStatus::Error),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Task Status
// =============================================================================

/// Status of a persisted task run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Success,
    /// No chunk returned any row. Does not raise the resumption floor.
    Empty,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Empty => "empty",
            TaskStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Running)
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(TaskStatus::Running),
            "success" => Ok(TaskStatus::Success),
            "empty" => Ok(TaskStatus::Empty),
            "error" => Ok(TaskStatus::Error),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a task ended from the worker's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Success,
    Empty,
    Error,
    /// Nothing owed; no task run was created.
    UpToDate,
}

impl TaskOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskOutcome::Success => "success",
            TaskOutcome::Empty => "empty",
            TaskOutcome::Error => "error",
            TaskOutcome::UpToDate => "up_to_date",
        }
    }

    /// Label printed in the worker summary.
    pub fn label(&self) -> &'static str {
        match self {
            TaskOutcome::Success => "OK",
            TaskOutcome::Empty => "EMPTY",
            TaskOutcome::Error => "ERROR",
            TaskOutcome::UpToDate => "UP TO DATE",
        }
    }
}

// =============================================================================
// Job
// =============================================================================

/// A sync job: one worker invocation over a set of tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    /// Target site, or `None` for every active site.
    pub site_id: Option<i64>,
    pub status: JobStatus,
    pub total_tasks: i32,
    pub completed_tasks: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// OS process id of the owning worker, once it attached.
    pub pid: Option<i32>,
    /// Captured-output location of the owning worker.
    pub log_file: Option<PathBuf>,
}

impl Job {
    /// Minutes elapsed since the job started.
    pub fn elapsed_minutes(&self, now: DateTime<Utc>) -> f64 {
        (now - self.started_at).num_milliseconds() as f64 / 60_000.0
    }
}

// =============================================================================
// Task Run
// =============================================================================

/// One persisted (site, result-type) ingestion attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRun {
    pub id: i64,
    pub job_id: Option<i64>,
    pub site_id: i64,
    /// Joined from the site table for display.
    pub site_url: String,
    pub search_type: SearchType,
    pub date_from: NaiveDate,
    /// Nominal end while running; effective end once successful.
    pub date_to: NaiveDate,
    pub status: TaskStatus,
    pub total_chunks: i32,
    pub done_chunks: i32,
    pub rows_fetched: i64,
    pub rows_inserted: i64,
    pub rows_new: i64,
    pub rows_updated: i64,
    pub duration_sec: f64,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Parameters for creating a running task run.
#[derive(Debug, Clone)]
pub struct NewTaskRun {
    pub job_id: Option<i64>,
    pub site_id: i64,
    pub search_type: SearchType,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
}

/// Final counters of a successful task run.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskCompletion {
    pub rows_fetched: i64,
    pub rows_new: i64,
    pub rows_updated: i64,
    pub duration_sec: f64,
    /// Narrowed high-water mark when trailing chunks held no data.
    pub effective_date_to: Option<NaiveDate>,
}

impl TaskCompletion {
    pub fn rows_inserted(&self) -> i64 {
        self.rows_new + self.rows_updated
    }
}

// =============================================================================
// Tests
// =============================================================================
