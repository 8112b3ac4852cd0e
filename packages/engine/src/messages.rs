//! Message types for actor communication.

use chrono::{DateTime, Utc};
use job_core::{
    JobId, JobRecord, NodeIndex, TaskBody, TaskError, TaskGraph, TaskId, TaskRecord,
};
use ractor::RpcReplyPort;

use crate::engine::JobRequest;

/// Messages for the coordinator actor.
#[derive(Debug)]
pub enum EngineMessage {
    /// Persist and schedule a new job.
    Submit {
        request: Box<JobRequest>,
        reply: RpcReplyPort<Result<JobId, EngineError>>,
    },

    /// Abort a job's remaining work.
    AbortJob {
        job_id: JobId,
        reason: String,
        reply: RpcReplyPort<Result<(), EngineError>>,
    },

    /// Reply once the job has completed.
    AwaitCompletion {
        job_id: JobId,
        reply: RpcReplyPort<Result<JobRecord, EngineError>>,
    },

    /// Whether the job is still owned by the coordinator.
    IsActive {
        job_id: JobId,
        reply: RpcReplyPort<bool>,
    },

    /// A worker committed the task as running.
    TaskStarted {
        job_id: JobId,
        node: NodeIndex,
        started_at: DateTime<Utc>,
    },

    /// A worker finished running a task body.
    TaskFinished {
        worker: usize,
        job_id: JobId,
        node: NodeIndex,
        outcome: Result<Option<TaskGraph>, TaskError>,
    },

    /// Stop accepting work and reply once running tasks have drained.
    Shutdown { reply: RpcReplyPort<()> },

    /// Periodic re-evaluation of waiting and blocked work.
    Tick,
}

/// A task handed to a worker.
#[derive(Debug)]
pub struct Assignment {
    pub job_id: JobId,
    pub node: NodeIndex,
    pub task: TaskRecord,
    pub body: TaskBody,
}

/// Messages for the worker actors.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Run a task body.
    Execute(Box<Assignment>),

    /// Stop the worker.
    Shutdown,
}

/// Error type for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Cannot process job, job engine is shutting down.")]
    ShuttingDown,

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Job {0} is still active")]
    JobActive(JobId),

    #[error("Database error: {0}")]
    Database(#[from] db::DbError),

    #[error("Actor error: {0}")]
    Actor(String),
}
