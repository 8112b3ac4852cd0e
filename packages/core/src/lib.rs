//! Core domain types for the job engine.
//!
//! This crate contains shared types used across all packages:
//! - Job and Task records with their states and statuses
//! - TaskGraph, the arena the engine schedules from
//! - Task and MetaTask bodies
//! - Lock object references and change events

mod error;
mod events;
mod graph;
mod job;
mod lock;
mod task;

pub use error::{GraphError, TaskError};
pub use events::{ChangeEvent, ChangeKind, EntityType};
pub use graph::{NodeIndex, TaskGraph, TaskNode};
pub use job::{JobId, JobRecord, JobState, JobStatus};
pub use lock::{LockObjectReference, ObjectType};
pub use task::{
    Eligibility, FnMetaTask, FnTask, MetaTask, Task, TaskBody, TaskFuture, TaskGuard, TaskId,
    TaskRecord, TaskState, TaskStatus,
};
