//! Job domain types: the top-level unit of reconciliation work.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::lock::LockObjectReference;
use crate::task::TaskStatus;

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Submitted, no task has started yet.
    #[default]
    Queued,
    /// At least one task has started.
    Running,
    /// Every task of the (possibly grown) graph is completed.
    Completed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a job. `Unknown` until the job completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Unknown,
    Passed,
    Failed,
    Aborted,
}

impl JobStatus {
    /// Roll task statuses up into a job status.
    ///
    /// A failed task wins over an aborted one; anything else passes.
    pub fn aggregate<'a>(statuses: impl IntoIterator<Item = &'a TaskStatus>) -> Self {
        let mut aborted = false;
        for status in statuses {
            match status {
                TaskStatus::Failed => return JobStatus::Failed,
                TaskStatus::Aborted => aborted = true,
                _ => {}
            }
        }
        if aborted {
            JobStatus::Aborted
        } else {
            JobStatus::Passed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Unknown => "unknown",
            JobStatus::Passed => "passed",
            JobStatus::Failed => "failed",
            JobStatus::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted representation of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique identifier for this job.
    #[serde(rename = "job_id")]
    pub id: JobId,
    /// Human readable name shown to operators.
    pub name: String,
    pub state: JobState,
    pub status: JobStatus,
    pub queued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Reason surfaced verbatim when the job did not pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub submitted_by: String,
    /// Entities this job claims exclusive interest in.
    #[serde(default)]
    pub locked_objects: BTreeSet<LockObjectReference>,
}

impl JobRecord {
    /// Create a new queued job record.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: JobId::new(),
            name: name.into(),
            state: JobState::Queued,
            status: JobStatus::Unknown,
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            failure_reason: None,
            submitted_by: "system".to_string(),
            locked_objects: BTreeSet::new(),
        }
    }

    /// Set the submitter of this job.
    pub fn with_submitted_by(mut self, submitted_by: impl Into<String>) -> Self {
        self.submitted_by = submitted_by.into();
        self
    }

    /// Set the objects locked by this job.
    pub fn with_locked_objects(mut self, objects: BTreeSet<LockObjectReference>) -> Self {
        self.locked_objects = objects;
        self
    }

    pub fn is_completed(&self) -> bool {
        self.state == JobState::Completed
    }

    /// Mark the job as started if it has not been already.
    ///
    /// Returns true when the state changed.
    pub fn mark_running(&mut self, at: DateTime<Utc>) -> bool {
        if self.state != JobState::Queued {
            return false;
        }
        self.state = JobState::Running;
        self.started_at = Some(at);
        true
    }

    /// Mark the job as completed with the given status.
    pub fn mark_completed(&mut self, status: JobStatus, reason: Option<String>, at: DateTime<Utc>) {
        self.state = JobState::Completed;
        self.status = status;
        self.completed_at = Some(at);
        if reason.is_some() {
            self.failure_reason = reason;
        }
    }

    /// Short `state/status` summary for logs and events.
    pub fn summary(&self) -> String {
        format!("{}/{}", self.state, self.status)
    }
}
