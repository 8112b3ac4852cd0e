//! Atomic multi-record writes.

use job_core::{JobId, JobRecord, TaskId, TaskRecord};
use serde::Serialize;

use crate::{DbError, get_db};

/// A batch of writes committed atomically.
///
/// Statements are collected in memory and sent as a single
/// `BEGIN TRANSACTION ... COMMIT TRANSACTION` block. Dropping a transaction
/// without committing it discards every write.
#[derive(Debug, Default)]
pub struct Transaction {
    statements: Vec<String>,
    bindings: Vec<(String, serde_json::Value)>,
}

impl Transaction {
    pub fn begin() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Insert or replace a job record.
    pub fn save_job(&mut self, job: &JobRecord) -> Result<&mut Self, DbError> {
        self.upsert("job", job.id.to_string(), job)
    }

    /// Insert or replace a task record.
    pub fn save_task(&mut self, task: &TaskRecord) -> Result<&mut Self, DbError> {
        self.upsert("task", task.id.to_string(), task)
    }

    pub fn save_tasks<'a>(
        &mut self,
        tasks: impl IntoIterator<Item = &'a TaskRecord>,
    ) -> Result<&mut Self, DbError> {
        for task in tasks {
            self.save_task(task)?;
        }
        Ok(self)
    }

    /// Merge `patch` into an existing task record.
    pub fn merge_task(
        &mut self,
        id: TaskId,
        patch: serde_json::Value,
    ) -> &mut Self {
        let key = self.bind(serde_json::Value::String(id.to_string()));
        let content = self.bind(patch);
        self.statements.push(format!(
            "UPDATE type::thing('task', ${key}) MERGE ${content} RETURN NONE;"
        ));
        self
    }

    /// Delete a job together with its tasks.
    pub fn delete_job(&mut self, id: JobId) -> &mut Self {
        let key = self.bind(serde_json::Value::String(id.to_string()));
        self.statements
            .push(format!("DELETE task WHERE job_id = ${key} RETURN NONE;"));
        self.statements
            .push(format!("DELETE type::thing('job', ${key}) RETURN NONE;"));
        self
    }

    /// Commit every collected write, or none of them.
    pub async fn commit(self) -> Result<(), DbError> {
        if self.statements.is_empty() {
            return Ok(());
        }

        let db = get_db()?;
        let query = format!(
            "BEGIN TRANSACTION;\n{}\nCOMMIT TRANSACTION;",
            self.statements.join("\n")
        );

        let mut request = db.query(query);
        for binding in self.bindings {
            request = request.bind(binding);
        }
        request.await?.check()?;

        Ok(())
    }

    /// Discard every collected write.
    pub fn rollback(self) {
        tracing::debug!(statements = self.statements.len(), "Transaction rolled back");
    }

    fn upsert<T: Serialize>(
        &mut self,
        table: &str,
        id: String,
        record: &T,
    ) -> Result<&mut Self, DbError> {
        let content = serde_json::to_value(record)?;
        let key = self.bind(serde_json::Value::String(id));
        let content = self.bind(content);
        self.statements.push(format!(
            "UPSERT type::thing('{table}', ${key}) CONTENT ${content} RETURN NONE;"
        ));
        Ok(self)
    }

    fn bind(&mut self, value: serde_json::Value) -> String {
        let name = format!("p{}", self.bindings.len());
        self.bindings.push((name.clone(), value));
        name
    }
}
