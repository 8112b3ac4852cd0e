//! Repository implementations for database operations.

mod job_repo;
mod task_repo;

pub use job_repo::{JobFilter, JobRepository};
pub use task_repo::{TaskFilter, TaskRepository};
