//! Coordinator actor owning every active job.
//!
//! The coordinator is the only writer of job records and of terminal task
//! transitions. Each step is computed on a copy of the job's schedule,
//! committed in one transaction and only then swapped into memory, so the
//! in-memory graph never runs ahead of the store.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use db::Transaction;
use db::repositories::JobRepository;
use job_core::{
    ChangeEvent, ChangeKind, JobId, JobRecord, LockObjectReference, NodeIndex, TaskError,
};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort, SupervisionEvent};

use crate::config::{EngineConfig, MIN_TICK_INTERVAL};
use crate::engine::JobRequest;
use crate::events::EventSink;
use crate::locks::LockRegistry;
use crate::messages::{Assignment, EngineError, EngineMessage, WorkerMessage};
use crate::schedule::{Changes, JobSchedule, structure_patch};
use crate::worker::{WorkerActor, WorkerArgs};

/// Reason recorded on work that never ran because the engine stopped.
pub const SHUTDOWN_REASON: &str = "Job engine is shutting down";

/// Coordinator actor arguments.
pub struct CoordinatorArgs {
    pub config: EngineConfig,
    pub locks: Arc<LockRegistry>,
    pub events: EventSink,
}

/// A job that has not completed yet.
struct ActiveJob {
    schedule: JobSchedule,
    /// Tasks handed to a worker whose outcome has not come back.
    in_flight: BTreeSet<NodeIndex>,
    /// Finished tasks whose failure could not be persisted yet, with the
    /// reason to record on the next attempt. They stay in flight meanwhile.
    unsettled: BTreeMap<NodeIndex, String>,
    abort_reason: Option<String>,
    holds_lock: bool,
    waiters: Vec<RpcReplyPort<Result<JobRecord, EngineError>>>,
}

/// State for the coordinator actor.
pub struct CoordinatorState {
    locks: Arc<LockRegistry>,
    events: EventSink,
    jobs: HashMap<JobId, ActiveJob>,
    /// Active jobs, oldest first.
    submission_order: Vec<JobId>,
    workers: Vec<ActorRef<WorkerMessage>>,
    idle: VecDeque<usize>,
    shutting_down: bool,
    shutdown_waiters: Vec<RpcReplyPort<()>>,
}

/// Coordinator actor that schedules the tasks of every active job.
pub struct Coordinator;

impl Actor for Coordinator {
    type Msg = EngineMessage;
    type State = CoordinatorState;
    type Arguments = CoordinatorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(workers = args.config.workers, "Starting job engine coordinator");

        let mut workers = Vec::with_capacity(args.config.workers);
        for worker in 0..args.config.workers {
            let worker_args = WorkerArgs {
                worker,
                coordinator: myself.clone(),
                events: args.events.clone(),
                task_timeout: args.config.task_timeout,
            };
            let (actor, _handle) =
                Actor::spawn_linked(None, WorkerActor, worker_args, myself.get_cell())
                    .await
                    .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn worker: {}", e)))?;
            workers.push(actor);
        }

        // Start periodic tick
        let myself_clone = myself.clone();
        let tick_interval = args.config.tick_interval.max(MIN_TICK_INTERVAL);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_interval);
            loop {
                interval.tick().await;
                if myself_clone.send_message(EngineMessage::Tick).is_err() {
                    break;
                }
            }
        });

        Ok(CoordinatorState {
            locks: args.locks,
            events: args.events,
            jobs: HashMap::new(),
            submission_order: Vec::new(),
            idle: (0..workers.len()).collect(),
            workers,
            shutting_down: false,
            shutdown_waiters: Vec::new(),
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            EngineMessage::Submit { request, reply } => {
                if state.shutting_down {
                    let _ = reply.send(Err(EngineError::ShuttingDown));
                    return Ok(());
                }

                let job_id = match submit(state, *request).await {
                    Ok(job_id) => job_id,
                    Err(e) => {
                        let _ = reply.send(Err(e));
                        return Ok(());
                    }
                };

                schedule(&myself, state).await;
                let _ = reply.send(Ok(job_id));
            }

            EngineMessage::AbortJob {
                job_id,
                reason,
                reply,
            } => {
                if let Some(active) = state.jobs.get_mut(&job_id) {
                    if active.abort_reason.is_none() {
                        tracing::info!(job_id = %job_id, reason = %reason, "Aborting job");
                        active.abort_reason = Some(reason);
                    }
                    schedule(&myself, state).await;
                    let _ = reply.send(Ok(()));
                    return Ok(());
                }

                // Aborting a completed job has no effect.
                let result = match JobRepository::find(job_id).await {
                    Ok(Some(_)) => Ok(()),
                    Ok(None) => Err(EngineError::JobNotFound(job_id)),
                    Err(e) => Err(e.into()),
                };
                let _ = reply.send(result);
            }

            EngineMessage::AwaitCompletion { job_id, reply } => {
                if let Some(active) = state.jobs.get_mut(&job_id) {
                    active.waiters.push(reply);
                    return Ok(());
                }

                let result = match JobRepository::find(job_id).await {
                    Ok(Some(job)) => Ok(job),
                    Ok(None) => Err(EngineError::JobNotFound(job_id)),
                    Err(e) => Err(e.into()),
                };
                let _ = reply.send(result);
            }

            EngineMessage::IsActive { job_id, reply } => {
                let _ = reply.send(state.jobs.contains_key(&job_id));
            }

            EngineMessage::TaskStarted {
                job_id,
                node,
                started_at,
            } => {
                if let Some(active) = state.jobs.get_mut(&job_id) {
                    let mut next = active.schedule.clone();
                    let changes = next.start(node, started_at);
                    apply(active, next, changes, &state.events).await;
                }
            }

            EngineMessage::TaskFinished {
                worker,
                job_id,
                node,
                outcome,
            } => {
                state.idle.push_back(worker);
                if let Some(active) = state.jobs.get_mut(&job_id) {
                    active.in_flight.remove(&node);
                    if let Err(reason) = finish_task(active, node, outcome, &state.events).await {
                        active.in_flight.insert(node);
                        active.unsettled.insert(node, reason);
                    }
                }
                schedule(&myself, state).await;
            }

            EngineMessage::Shutdown { reply } => {
                if !state.shutting_down {
                    tracing::info!(active_jobs = state.jobs.len(), "Shutting down job engine");
                    state.shutting_down = true;
                    for active in state.jobs.values_mut() {
                        if active.abort_reason.is_none() {
                            active.abort_reason = Some(SHUTDOWN_REASON.to_string());
                        }
                    }
                }
                state.shutdown_waiters.push(reply);
                schedule(&myself, state).await;
            }

            EngineMessage::Tick => {
                schedule(&myself, state).await;
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorTerminated(cell, _, reason) if !state.shutting_down => {
                tracing::warn!(
                    "Worker {} terminated: {:?}",
                    cell.get_id(),
                    reason
                );
            }
            SupervisionEvent::ActorFailed(cell, error) => {
                tracing::error!("Worker {} failed: {}", cell.get_id(), error);
            }
            _ => {}
        }
        Ok(())
    }
}

/// Persist a new job with its initial tasks and start tracking it.
async fn submit(state: &mut CoordinatorState, request: JobRequest) -> Result<JobId, EngineError> {
    let JobRequest {
        name,
        graph,
        objects,
        submitted_by,
    } = request;

    let job = JobRecord::new(name)
        .with_submitted_by(submitted_by)
        .with_locked_objects(objects);
    let schedule = JobSchedule::new(job, graph);
    let job_id = schedule.job.id;

    let mut tx = Transaction::begin();
    tx.save_job(&schedule.job)?;
    tx.save_tasks(schedule.tasks())?;
    tx.commit().await?;

    state
        .events
        .emit(ChangeEvent::job(ChangeKind::Created, &schedule.job));
    state.events.emit_all(
        schedule
            .tasks()
            .iter()
            .map(|task| ChangeEvent::task(ChangeKind::Created, task)),
    );

    tracing::info!(
        job_id = %job_id,
        name = %schedule.job.name,
        tasks = schedule.tasks().len(),
        "Job submitted"
    );

    state.jobs.insert(
        job_id,
        ActiveJob {
            schedule,
            in_flight: BTreeSet::new(),
            unsettled: BTreeMap::new(),
            abort_reason: None,
            holds_lock: false,
            waiters: Vec::new(),
        },
    );
    state.submission_order.push(job_id);

    Ok(job_id)
}

/// Advance every active job, complete the finished ones and hand queued
/// tasks to idle workers.
async fn schedule(myself: &ActorRef<EngineMessage>, state: &mut CoordinatorState) {
    let now = Utc::now();

    for job_id in state.submission_order.clone() {
        let Some(active) = state.jobs.get_mut(&job_id) else {
            continue;
        };

        settle(active, &state.events).await;

        let mut next = active.schedule.clone();
        let changes = match &active.abort_reason {
            Some(reason) => next.abort(reason, &active.in_flight, now),
            None => next.advance(now),
        };
        if !changes.is_empty() {
            apply(active, next, changes, &state.events).await;
        }

        if !active.in_flight.is_empty() || !active.schedule.is_finished() {
            continue;
        }

        let mut next = active.schedule.clone();
        let changes = next.complete_job(active.abort_reason.as_deref(), now);
        if !apply(active, next, changes, &state.events).await {
            // retried on the next tick
            continue;
        }

        if active.holds_lock {
            state.locks.release(job_id);
        }
        let job = active.schedule.job.clone();
        let waiters = std::mem::take(&mut active.waiters);
        state.jobs.remove(&job_id);
        state.submission_order.retain(|id| *id != job_id);

        tracing::info!(job_id = %job_id, status = %job.status, "Job completed");
        for waiter in waiters {
            let _ = waiter.send(Ok(job.clone()));
        }
    }

    if state.shutting_down {
        if state.jobs.is_empty() {
            finish_shutdown(myself, state);
        }
        return;
    }

    dispatch(state);
}

/// Hand queued tasks to idle workers, oldest job first.
///
/// Objects wanted by a job still waiting for its locks are reserved for it,
/// so younger jobs cannot claim them ahead of it.
fn dispatch(state: &mut CoordinatorState) {
    let mut reserved: BTreeSet<LockObjectReference> = BTreeSet::new();

    for job_id in state.submission_order.clone() {
        if state.idle.is_empty() {
            break;
        }
        let Some(active) = state.jobs.get_mut(&job_id) else {
            continue;
        };
        if active.abort_reason.is_some() {
            continue;
        }

        let ready: Vec<NodeIndex> = active
            .schedule
            .queued()
            .filter(|node| !active.in_flight.contains(node))
            .collect();
        if ready.is_empty() {
            continue;
        }

        if !active.holds_lock {
            let objects = &active.schedule.job.locked_objects;
            if !objects.is_disjoint(&reserved) {
                tracing::debug!(job_id = %job_id, "Job waiting behind an older blocked job");
                reserved.extend(objects.iter().cloned());
                continue;
            }
            if !state.locks.try_acquire(job_id, objects) {
                tracing::debug!(job_id = %job_id, "Job blocked by locked objects");
                reserved.extend(objects.iter().cloned());
                continue;
            }
            active.holds_lock = true;
        }

        for node in ready {
            let Some(body) = active.schedule.body(node) else {
                continue;
            };
            let Some(worker) = state.idle.pop_front() else {
                break;
            };

            let assignment = Assignment {
                job_id,
                node,
                task: active.schedule.task(node).clone(),
                body,
            };
            match state.workers[worker].send_message(WorkerMessage::Execute(Box::new(assignment))) {
                Ok(()) => {
                    active.in_flight.insert(node);
                }
                Err(e) => {
                    tracing::error!(worker, "Failed to dispatch task: {}", e);
                }
            }
        }
    }
}

fn finish_shutdown(myself: &ActorRef<EngineMessage>, state: &mut CoordinatorState) {
    for worker in &state.workers {
        let _ = worker.send_message(WorkerMessage::Shutdown);
    }
    for reply in state.shutdown_waiters.drain(..) {
        let _ = reply.send(());
    }
    tracing::info!("Job engine stopped");
    myself.stop(None);
}

/// Retry recording the failure of tasks whose outcome was never persisted.
async fn settle(active: &mut ActiveJob, events: &EventSink) {
    for (node, reason) in std::mem::take(&mut active.unsettled) {
        match finish_task(active, node, Err(TaskError::Store(reason)), events).await {
            Ok(()) => {
                active.in_flight.remove(&node);
            }
            Err(reason) => {
                active.unsettled.insert(node, reason);
            }
        }
    }
}

/// Apply a task outcome.
///
/// When the outcome cannot be committed the task is failed with the
/// persistence error instead, so the job still makes progress. If even that
/// fails the schedule is left untouched and the failure reason is returned.
async fn finish_task(
    active: &mut ActiveJob,
    node: NodeIndex,
    outcome: Result<Option<job_core::TaskGraph>, TaskError>,
    events: &EventSink,
) -> Result<(), String> {
    let now = Utc::now();
    let mut next = active.schedule.clone();

    let failure = match next.finish(node, outcome, active.abort_reason.as_deref(), now) {
        Ok(changes) => match commit(&next, &changes).await {
            Ok(()) => {
                announce(&next, &changes, events);
                active.schedule = next;
                return Ok(());
            }
            Err(e) => format!("Failed to persist task outcome: {}", e),
        },
        Err(e) => format!("Failed to insert subgraph: {}", e),
    };

    let job_id = active.schedule.job.id;
    tracing::error!(job_id = %job_id, "{}", failure);

    let mut fallback = active.schedule.clone();
    let changes = fallback
        .finish(node, Err(TaskError::Store(failure.clone())), None, now)
        .map_err(|e| format!("Failed to fail task: {}", e))?;
    match commit(&fallback, &changes).await {
        Ok(()) => {
            announce(&fallback, &changes, events);
            active.schedule = fallback;
            Ok(())
        }
        Err(e) => {
            tracing::error!(job_id = %job_id, "Failed to persist task failure: {}", e);
            Err(failure)
        }
    }
}

/// Commit `changes` and swap `next` in. Returns false, leaving the job
/// untouched, if the commit failed.
async fn apply(
    active: &mut ActiveJob,
    next: JobSchedule,
    changes: Changes,
    events: &EventSink,
) -> bool {
    if let Err(e) = commit(&next, &changes).await {
        tracing::error!(job_id = %next.job.id, "Failed to commit job changes: {}", e);
        return false;
    }
    announce(&next, &changes, events);
    active.schedule = next;
    true
}

async fn commit(schedule: &JobSchedule, changes: &Changes) -> Result<(), db::DbError> {
    let mut tx = Transaction::begin();
    if changes.job {
        tx.save_job(&schedule.job)?;
    }
    for node in changes.saved() {
        tx.save_task(schedule.task(node))?;
    }
    for node in changes.reshaped_only() {
        let task = schedule.task(node);
        tx.merge_task(task.id, structure_patch(task));
    }
    tx.commit().await
}

fn announce(schedule: &JobSchedule, changes: &Changes, events: &EventSink) {
    for node in &changes.created {
        events.emit(ChangeEvent::task(ChangeKind::Created, schedule.task(*node)));
    }
    for node in changes.updated.difference(&changes.created) {
        events.emit(ChangeEvent::task(ChangeKind::Updated, schedule.task(*node)));
    }
    for node in changes.reshaped_only() {
        events.emit(ChangeEvent::task(ChangeKind::Updated, schedule.task(node)));
    }
    if changes.job {
        events.emit(ChangeEvent::job(ChangeKind::Updated, &schedule.job));
    }
}
