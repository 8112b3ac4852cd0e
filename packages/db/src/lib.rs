//! SurrealDB persistence for jobs and tasks.
//!
//! This crate provides the database connection, the repositories the engine
//! reads from, and the [`Transaction`] it writes through.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage

mod connection;
mod schema;
mod transaction;
pub mod recovery;
pub mod repositories;

pub use connection::{Credentials, Database, DbConfig, DbError, get_db, init_db};
pub use schema::init_schema;
pub use transaction::Transaction;

/// Initialize the database with the given configuration.
///
/// This should be called once at application startup.
pub async fn init(config: DbConfig) -> Result<(), DbError> {
    init_db(config).await?;
    init_schema().await?;
    Ok(())
}
