//! Public handle to a running job engine.

use std::collections::BTreeSet;
use std::sync::Arc;

use db::DbError;
use db::recovery;
use db::repositories::{JobFilter, JobRepository, TaskRepository};
use job_core::{
    ChangeEvent, ChangeKind, JobId, JobRecord, LockObjectReference, TaskGraph, TaskId, TaskRecord,
};
use ractor::rpc::CallResult;
use ractor::{Actor, ActorRef, RpcReplyPort};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::coordinator::{Coordinator, CoordinatorArgs};
use crate::events::EventSink;
use crate::locks::LockRegistry;
use crate::messages::{EngineError, EngineMessage};

/// Reason recorded on work found unfinished at startup.
pub const RESTART_REASON: &str = "aborted due to restart";

/// A job waiting to be submitted.
#[derive(Debug)]
pub struct JobRequest {
    pub name: String,
    pub graph: TaskGraph,
    /// Entities the job needs exclusive access to while it runs.
    pub objects: BTreeSet<LockObjectReference>,
    pub submitted_by: String,
}

impl JobRequest {
    pub fn new(name: impl Into<String>, graph: TaskGraph) -> Self {
        Self {
            name: name.into(),
            graph,
            objects: BTreeSet::new(),
            submitted_by: "system".to_string(),
        }
    }

    pub fn with_objects(mut self, objects: BTreeSet<LockObjectReference>) -> Self {
        self.objects = objects;
        self
    }

    pub fn with_submitted_by(mut self, submitted_by: impl Into<String>) -> Self {
        self.submitted_by = submitted_by.into();
        self
    }
}

/// Runs jobs made of task graphs.
///
/// The database must be initialized with [`db::init`] before the engine is
/// started.
///
/// # Usage
///
/// ```ignore
/// use engine::{EngineConfig, JobEngine, JobRequest, LockRegistry};
///
/// let engine = JobEngine::start(EngineConfig::default(), Arc::new(LockRegistry::new())).await?;
/// let job_id = engine.submit(JobRequest::new("Sync security group", graph)).await?;
/// let job = engine.wait_for_completion(job_id).await?;
/// engine.shutdown().await?;
/// ```
pub struct JobEngine {
    coordinator: ActorRef<EngineMessage>,
    handle: Mutex<Option<JoinHandle<()>>>,
    events: EventSink,
    locks: Arc<LockRegistry>,
}

impl JobEngine {
    /// Recover from a previous run and start the coordinator and workers.
    pub async fn start(config: EngineConfig, locks: Arc<LockRegistry>) -> Result<Self, EngineError> {
        let events = EventSink::new(config.event_capacity);
        Self::start_with_events(config, locks, events).await
    }

    /// Like [`JobEngine::start`], publishing to an existing sink so that
    /// recovery events can be observed.
    pub async fn start_with_events(
        config: EngineConfig,
        locks: Arc<LockRegistry>,
        events: EventSink,
    ) -> Result<Self, EngineError> {
        let report = recovery::abort_uncompleted(RESTART_REASON).await?;
        events.emit_all(
            report
                .tasks
                .iter()
                .map(|task| ChangeEvent::task(ChangeKind::Updated, task)),
        );
        events.emit_all(
            report
                .jobs
                .iter()
                .map(|job| ChangeEvent::job(ChangeKind::Updated, job)),
        );

        let args = CoordinatorArgs {
            config,
            locks: locks.clone(),
            events: events.clone(),
        };
        let (coordinator, handle) = Actor::spawn(None, Coordinator, args)
            .await
            .map_err(|e| EngineError::Actor(format!("Failed to spawn coordinator: {}", e)))?;

        Ok(Self {
            coordinator,
            handle: Mutex::new(Some(handle)),
            events,
            locks,
        })
    }

    /// Persist a job and schedule it. Returns once its first tasks are queued.
    pub async fn submit(&self, request: JobRequest) -> Result<JobId, EngineError> {
        self.call(|reply| EngineMessage::Submit {
            request: Box::new(request),
            reply,
        })
        .await?
    }

    /// Abort the job's remaining work. Running tasks finish first.
    pub async fn abort_job(&self, job_id: JobId, reason: impl Into<String>) -> Result<(), EngineError> {
        let reason = reason.into();
        self.call(|reply| EngineMessage::AbortJob {
            job_id,
            reason,
            reply,
        })
        .await?
    }

    /// Wait until the job completes and return its final record.
    pub async fn wait_for_completion(&self, job_id: JobId) -> Result<JobRecord, EngineError> {
        self.call(|reply| EngineMessage::AwaitCompletion { job_id, reply })
            .await?
    }

    pub async fn is_active(&self, job_id: JobId) -> Result<bool, EngineError> {
        self.call(|reply| EngineMessage::IsActive { job_id, reply })
            .await
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<JobRecord, EngineError> {
        JobRepository::find(job_id)
            .await?
            .ok_or(EngineError::JobNotFound(job_id))
    }

    /// Job owning the given task.
    pub async fn find_job_by_task(&self, task_id: TaskId) -> Result<JobRecord, EngineError> {
        let task = match TaskRepository::get(task_id).await {
            Ok(task) => task,
            Err(DbError::NotFound(_)) => return Err(EngineError::TaskNotFound(task_id)),
            Err(e) => return Err(e.into()),
        };
        self.get_job(task.job_id).await
    }

    pub async fn list_jobs(&self, filter: JobFilter) -> Result<Vec<JobRecord>, EngineError> {
        Ok(JobRepository::list(filter).await?)
    }

    /// Tasks of a job in dependency order.
    pub async fn list_tasks(&self, job_id: JobId) -> Result<Vec<TaskRecord>, EngineError> {
        Ok(TaskRepository::list_for_job(job_id).await?)
    }

    /// Remove a completed job and its tasks.
    pub async fn delete_job(&self, job_id: JobId) -> Result<(), EngineError> {
        let job = self.get_job(job_id).await?;
        if !job.is_completed() || self.is_active(job_id).await? {
            return Err(EngineError::JobActive(job_id));
        }

        let tasks = TaskRepository::list_for_job(job_id).await?;
        JobRepository::delete(job_id).await?;

        tracing::info!(job_id = %job_id, tasks = tasks.len(), "Job deleted");
        self.events.emit_all(
            tasks
                .iter()
                .map(|task| ChangeEvent::task(ChangeKind::Deleted, task)),
        );
        self.events.emit(ChangeEvent::job(ChangeKind::Deleted, &job));
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    pub fn locks(&self) -> &Arc<LockRegistry> {
        &self.locks
    }

    /// Stop accepting jobs, abort work that has not started and wait for
    /// running tasks to drain.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        let Some(handle) = self.handle.lock().await.take() else {
            return Ok(());
        };

        self.call(|reply| EngineMessage::Shutdown { reply }).await?;
        handle
            .await
            .map_err(|e| EngineError::Actor(format!("Coordinator did not stop cleanly: {}", e)))
    }

    async fn call<T, F>(&self, build: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce(RpcReplyPort<T>) -> EngineMessage,
    {
        match ractor::rpc::call(&self.coordinator, build, None).await {
            Ok(CallResult::Success(value)) => Ok(value),
            Ok(CallResult::Timeout) => Err(EngineError::Actor("Coordinator call timed out".into())),
            Ok(CallResult::SenderError) => {
                Err(EngineError::Actor("Coordinator dropped the request".into()))
            }
            // the coordinator only stops after a shutdown
            Err(_) => Err(EngineError::ShuttingDown),
        }
    }
}
