//! Connection to the job store.
//!
//! The engine keeps one SurrealDB handle for the whole process. It is opened
//! by [`init_db`] and shared by every repository and [`crate::Transaction`].

use std::sync::LazyLock;

use surrealdb::Surreal;
use surrealdb::engine::any::{Any, connect};
use surrealdb::opt::auth::Root;
use thiserror::Error;
use tokio::sync::OnceCell;

static DB: LazyLock<OnceCell<Surreal<Any>>> = LazyLock::new(OnceCell::new);

/// Handle to the job store.
pub type Database = Surreal<Any>;

/// Root user the engine signs in as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Where jobs and tasks are stored.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// `mem://`, `file://<path>` or `rocksdb://<path>`.
    pub endpoint: String,
    pub namespace: String,
    pub database: String,
    pub credentials: Option<Credentials>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            endpoint: "mem://".to_string(),
            namespace: "jobengine".to_string(),
            database: "main".to_string(),
            credentials: None,
        }
    }
}

impl DbConfig {
    /// Volatile store, lost when the process exits. Crash recovery has
    /// nothing to recover with this one.
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self::at("file", path.into())
    }

    /// Needs surrealdb's `kv-rocksdb` engine to be compiled in.
    pub fn rocksdb(path: impl Into<String>) -> Self {
        Self::at("rocksdb", path.into())
    }

    fn at(scheme: &str, path: String) -> Self {
        Self {
            endpoint: format!("{}://{}", scheme, path),
            ..Self::default()
        }
    }

    /// Read `JOB_DB_ENDPOINT`, `JOB_DB_NAMESPACE`, `JOB_DB_DATABASE` and
    /// `JOB_DB_USER`/`JOB_DB_PASSWORD`. Unset values keep their default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let credentials = match (lookup("JOB_DB_USER"), lookup("JOB_DB_PASSWORD")) {
            (Some(username), Some(password)) => Some(Credentials { username, password }),
            _ => None,
        };

        Self {
            endpoint: lookup("JOB_DB_ENDPOINT").unwrap_or(defaults.endpoint),
            namespace: lookup("JOB_DB_NAMESPACE").unwrap_or(defaults.namespace),
            database: lookup("JOB_DB_DATABASE").unwrap_or(defaults.database),
            credentials,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }
}

/// Failures of the job store.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Job store not initialized, call db::init first")]
    NotInitialized,
    #[error("Job store error: {0}")]
    Connection(#[from] surrealdb::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    /// A record could not be turned into query bindings.
    #[error("Failed to encode record: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Open the job store.
///
/// The first successful call wins; later calls hand back the same handle and
/// ignore their `config`.
pub async fn init_db(config: DbConfig) -> Result<&'static Database, DbError> {
    DB.get_or_try_init(|| open(config)).await
}

async fn open(config: DbConfig) -> Result<Database, DbError> {
    tracing::info!(endpoint = %config.endpoint, "Opening job store");
    let db = connect(&config.endpoint).await?;

    if let Some(Credentials { username, password }) = &config.credentials {
        db.signin(Root { username, password }).await?;
    }
    db.use_ns(&config.namespace)
        .use_db(&config.database)
        .await?;

    tracing::info!(
        namespace = %config.namespace,
        database = %config.database,
        "Job store ready"
    );
    Ok(db)
}

/// Handle opened by [`init_db`].
pub fn get_db() -> Result<&'static Database, DbError> {
    DB.get().ok_or(DbError::NotInitialized)
}
