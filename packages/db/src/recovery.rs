//! Startup sweep over work interrupted by a restart.

use chrono::Utc;
use job_core::{JobRecord, JobStatus, TaskRecord, TaskStatus};

use crate::repositories::{JobRepository, TaskRepository};
use crate::{DbError, Transaction};

/// Rows changed by [`abort_uncompleted`].
#[derive(Debug, Default, Clone)]
pub struct RecoveryReport {
    pub jobs: Vec<JobRecord>,
    pub tasks: Vec<TaskRecord>,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty() && self.tasks.is_empty()
    }
}

/// Mark every uncompleted task and job as completed and aborted.
///
/// All rows are updated in one transaction. Returns the rows as written.
pub async fn abort_uncompleted(reason: &str) -> Result<RecoveryReport, DbError> {
    let mut tasks = TaskRepository::list_uncompleted().await?;
    let mut jobs = JobRepository::list_uncompleted().await?;
    if tasks.is_empty() && jobs.is_empty() {
        return Ok(RecoveryReport::default());
    }

    let now = Utc::now();
    let mut tx = Transaction::begin();

    for task in &mut tasks {
        task.complete(TaskStatus::Aborted, Some(reason.to_string()), now);
        tx.save_task(task)?;
    }

    for job in &mut jobs {
        job.mark_completed(JobStatus::Aborted, Some(reason.to_string()), now);
        tx.save_job(job)?;
    }

    tx.commit().await?;

    tracing::info!(
        jobs = jobs.len(),
        tasks = tasks.len(),
        "Aborted work left over from a previous run"
    );

    Ok(RecoveryReport { jobs, tasks })
}
