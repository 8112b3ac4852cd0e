//! Change events emitted for every committed job or task transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{JobId, JobRecord};
use crate::task::TaskRecord;

/// Kind of entity that changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Job,
    Task,
}

/// What happened to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// A committed change to a job or task record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub entity_id: String,
    pub entity_type: EntityType,
    pub kind: ChangeKind,
    /// Job the entity belongs to (the job itself for job events).
    pub job_id: JobId,
    /// `state/status` of the entity after the change.
    pub summary: String,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn job(kind: ChangeKind, job: &JobRecord) -> Self {
        Self {
            entity_id: job.id.to_string(),
            entity_type: EntityType::Job,
            kind,
            job_id: job.id,
            summary: job.summary(),
            timestamp: Utc::now(),
        }
    }

    pub fn task(kind: ChangeKind, task: &TaskRecord) -> Self {
        Self {
            entity_id: task.id.to_string(),
            entity_type: EntityType::Task,
            kind,
            job_id: task.job_id,
            summary: task.summary(),
            timestamp: Utc::now(),
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        let entity = match self.entity_type {
            EntityType::Job => "Job",
            EntityType::Task => "Task",
        };
        match self.kind {
            ChangeKind::Created => format!("{} {} created ({})", entity, self.entity_id, self.summary),
            ChangeKind::Updated => format!("{} {} -> {}", entity, self.entity_id, self.summary),
            ChangeKind::Deleted => format!("{} {} deleted", entity, self.entity_id),
        }
    }
}
