//! Database schema definitions using SurrealQL.

use crate::{DbError, get_db};

/// Initialize the database schema.
///
/// This creates the job and task tables and their indexes.
pub async fn init_schema() -> Result<(), DbError> {
    let db = get_db()?;

    tracing::info!("Initializing database schema...");

    db.query(JOB_SCHEMA).await?.check()?;
    db.query(TASK_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Job table schema. Only the queried fields are typed.
const JOB_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job SCHEMALESS;

DEFINE FIELD IF NOT EXISTS job_id ON job TYPE string;
DEFINE FIELD IF NOT EXISTS name ON job TYPE string;
DEFINE FIELD IF NOT EXISTS state ON job TYPE string;
DEFINE FIELD IF NOT EXISTS status ON job TYPE string;

DEFINE INDEX IF NOT EXISTS job_key ON job FIELDS job_id UNIQUE;
DEFINE INDEX IF NOT EXISTS job_state ON job FIELDS state;
DEFINE INDEX IF NOT EXISTS job_status ON job FIELDS status;
"#;

/// Task table schema.
const TASK_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS task SCHEMALESS;

DEFINE FIELD IF NOT EXISTS task_id ON task TYPE string;
DEFINE FIELD IF NOT EXISTS job_id ON task TYPE string;
DEFINE FIELD IF NOT EXISTS name ON task TYPE string;
DEFINE FIELD IF NOT EXISTS state ON task TYPE string;
DEFINE FIELD IF NOT EXISTS status ON task TYPE string;
DEFINE FIELD IF NOT EXISTS dependency_order ON task TYPE int;

DEFINE INDEX IF NOT EXISTS task_key ON task FIELDS task_id UNIQUE;
DEFINE INDEX IF NOT EXISTS task_job ON task FIELDS job_id;
DEFINE INDEX IF NOT EXISTS task_state ON task FIELDS state;

-- Ordered listing of a job's tasks
DEFINE INDEX IF NOT EXISTS task_job_order ON task FIELDS job_id, dependency_order;
"#;
