//! Task repository for ordered reads.

use job_core::{JobId, TaskId, TaskRecord, TaskState, TaskStatus};

use crate::{DbError, get_db};

/// Repository for task persistence operations.
pub struct TaskRepository;

/// Filter options for listing tasks.
#[derive(Debug, Default, Clone)]
pub struct TaskFilter {
    pub job_id: Option<JobId>,
    pub state: Option<TaskState>,
    pub status: Option<TaskStatus>,
}

impl TaskFilter {
    pub fn for_job(job_id: JobId) -> Self {
        Self {
            job_id: Some(job_id),
            ..Default::default()
        }
    }

    pub fn with_state(mut self, state: TaskState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }
}

impl TaskRepository {
    /// Get a task by ID.
    pub async fn get(id: TaskId) -> Result<TaskRecord, DbError> {
        let db = get_db()?;

        let mut result = db
            .query("SELECT * OMIT id FROM task WHERE task_id = $task_id LIMIT 1")
            .bind(("task_id", id.to_string()))
            .await?;

        let mut records: Vec<TaskRecord> = result.take(0)?;
        records
            .pop()
            .ok_or_else(|| DbError::NotFound(format!("Task not found: {}", id)))
    }

    /// Tasks of a job in dependency order.
    pub async fn list_for_job(job_id: JobId) -> Result<Vec<TaskRecord>, DbError> {
        Self::list(TaskFilter::for_job(job_id)).await
    }

    /// List tasks ordered by job, then dependency order.
    pub async fn list(filter: TaskFilter) -> Result<Vec<TaskRecord>, DbError> {
        let db = get_db()?;

        let mut conditions = Vec::new();
        let mut bindings: Vec<(&str, String)> = Vec::new();

        if let Some(job_id) = &filter.job_id {
            conditions.push("job_id = $job_id");
            bindings.push(("job_id", job_id.to_string()));
        }

        if let Some(state) = &filter.state {
            conditions.push("state = $state");
            bindings.push(("state", state.as_str().to_string()));
        }

        if let Some(status) = &filter.status {
            conditions.push("status = $status");
            bindings.push(("status", status.as_str().to_string()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let query = format!(
            "SELECT * OMIT id FROM task {} ORDER BY job_id ASC, dependency_order ASC",
            where_clause
        );

        let mut result = db.query(&query);

        for (name, value) in bindings {
            result = result.bind((name, value));
        }

        let mut response = result.await?;
        let records: Vec<TaskRecord> = response.take(0)?;

        Ok(records)
    }

    /// Tasks that never reached the completed state.
    pub async fn list_uncompleted() -> Result<Vec<TaskRecord>, DbError> {
        let db = get_db()?;

        let mut result = db
            .query(
                "SELECT * OMIT id FROM task WHERE state != $completed \
                 ORDER BY job_id ASC, dependency_order ASC",
            )
            .bind(("completed", TaskState::Completed.as_str()))
            .await?;

        let records: Vec<TaskRecord> = result.take(0)?;
        Ok(records)
    }
}
