//! Job repository for reads and deletes.
//!
//! Writes go through [`crate::Transaction`] so that job and task changes
//! commit together.

use job_core::{JobId, JobRecord, JobState, JobStatus};

use crate::{DbError, Transaction, get_db};

/// Repository for job persistence operations.
pub struct JobRepository;

/// Filter options for listing jobs.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub state: Option<JobState>,
    pub status: Option<JobStatus>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl JobFilter {
    pub fn with_state(mut self, state: JobState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl JobRepository {
    /// Get a job by ID.
    pub async fn get(id: JobId) -> Result<JobRecord, DbError> {
        Self::find(id)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {}", id)))
    }

    /// Get a job by ID, if it exists.
    pub async fn find(id: JobId) -> Result<Option<JobRecord>, DbError> {
        let db = get_db()?;

        let mut result = db
            .query("SELECT * OMIT id FROM job WHERE job_id = $job_id LIMIT 1")
            .bind(("job_id", id.to_string()))
            .await?;

        let mut records: Vec<JobRecord> = result.take(0)?;
        Ok(records.pop())
    }

    /// List jobs with optional filtering, oldest first.
    pub async fn list(filter: JobFilter) -> Result<Vec<JobRecord>, DbError> {
        let db = get_db()?;

        let mut conditions = Vec::new();
        let mut bindings: Vec<(&str, String)> = Vec::new();

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

        let limit_clause = filter
            .limit
            .map(|l| format!("LIMIT {}", l))
            .unwrap_or_default();

        let offset_clause = filter
            .offset
            .map(|o| format!("START {}", o))
            .unwrap_or_default();

        let query = format!(
            "SELECT * OMIT id FROM job {} ORDER BY job_id ASC {} {}",
            where_clause, limit_clause, offset_clause
        );

        let mut result = db.query(&query);

        for (name, value) in bindings {
            result = result.bind((name, value));
        }

        let mut response = result.await?;
        let records: Vec<JobRecord> = response.take(0)?;

        Ok(records)
    }

    /// Jobs that never reached the completed state.
    pub async fn list_uncompleted() -> Result<Vec<JobRecord>, DbError> {
        let db = get_db()?;

        let mut result = db
            .query("SELECT * OMIT id FROM job WHERE state != $completed ORDER BY job_id ASC")
            .bind(("completed", JobState::Completed.as_str()))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;
        Ok(records)
    }

    /// Delete a job and all of its tasks.
    pub async fn delete(id: JobId) -> Result<(), DbError> {
        let mut tx = Transaction::begin();
        tx.delete_job(id);
        tx.commit().await
    }
}
