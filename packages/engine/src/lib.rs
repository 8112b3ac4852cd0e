//! Job engine built on ractor actors.
//!
//! A single coordinator actor owns the graphs of all active jobs, evaluates
//! task guards and hands ready tasks to a fixed pool of worker actors.
//! Every transition is committed to the database before it is observed.
//!
//! # Architecture
//!
//! - `Coordinator` - Owns active jobs, splices meta task output, takes locks
//! - `WorkerActor` - Commits a task as running, runs its body, reports back
//! - `JobEngine` - Public handle wrapping the coordinator
//!
//! # Usage
//!
//! ```ignore
//! use engine::{EngineConfig, JobEngine, JobRequest, LockRegistry};
//!
//! db::init(db::DbConfig::memory()).await?;
//! let engine = JobEngine::start(EngineConfig::from_env(), Arc::new(LockRegistry::new())).await?;
//! let job_id = engine.submit(JobRequest::new("Sync", graph).with_objects(objects)).await?;
//! ```

mod config;
mod coordinator;
mod engine;
mod events;
mod locks;
mod logging;
mod messages;
mod schedule;
mod worker;

pub use config::EngineConfig;
pub use coordinator::SHUTDOWN_REASON;
pub use engine::{JobEngine, JobRequest, RESTART_REASON};
pub use events::EventSink;
pub use locks::LockRegistry;
pub use logging::{LoggingError, init_logging, try_init_logging};
pub use messages::EngineError;

pub use db::repositories::{JobFilter, TaskFilter};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef};
