//! Worker actor for running task bodies.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use chrono::Utc;
use db::Transaction;
use futures_util::FutureExt;
use job_core::{ChangeEvent, ChangeKind, TaskBody, TaskError, TaskGraph, TaskState};
use ractor::{Actor, ActorProcessingErr, ActorRef};

use crate::events::EventSink;
use crate::messages::{Assignment, EngineMessage, WorkerMessage};

/// State for the worker actor.
pub struct WorkerState {
    /// Position of this worker in the coordinator's pool.
    pub worker: usize,
    pub coordinator: ActorRef<EngineMessage>,
    pub events: EventSink,
    pub task_timeout: Option<Duration>,
}

/// Worker actor arguments.
pub struct WorkerArgs {
    pub worker: usize,
    pub coordinator: ActorRef<EngineMessage>,
    pub events: EventSink,
    pub task_timeout: Option<Duration>,
}

/// Worker actor that runs one task body at a time.
///
/// The task is committed as running before its body starts; the outcome is
/// reported back to the coordinator, which owns every other transition.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::debug!(worker = args.worker, "Starting worker");

        Ok(WorkerState {
            worker: args.worker,
            coordinator: args.coordinator,
            events: args.events,
            task_timeout: args.task_timeout,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Execute(assignment) => {
                let Assignment {
                    job_id,
                    node,
                    mut task,
                    body,
                } = *assignment;

                let started_at = Utc::now();
                let mut tx = Transaction::begin();
                tx.merge_task(
                    task.id,
                    serde_json::json!({
                        "state": TaskState::Running.as_str(),
                        "started_at": started_at,
                    }),
                );

                let outcome = match tx.commit().await {
                    Ok(()) => {
                        task.state = TaskState::Running;
                        task.started_at = Some(started_at);
                        state.events.emit(ChangeEvent::task(ChangeKind::Updated, &task));
                        state.coordinator.send_message(EngineMessage::TaskStarted {
                            job_id,
                            node,
                            started_at,
                        })?;

                        tracing::info!(job_id = %job_id, task = %task.name, "Running task");
                        run_body(&body, state.task_timeout).await
                    }
                    Err(e) => {
                        tracing::warn!(task = %task.name, "Failed to mark task running: {}", e);
                        Err(TaskError::Store(format!("Failed to mark task running: {}", e)))
                    }
                };

                if let Err(e) = &outcome {
                    tracing::info!(job_id = %job_id, task = %task.name, "Task failed: {}", e);
                }

                state.coordinator.send_message(EngineMessage::TaskFinished {
                    worker: state.worker,
                    job_id,
                    node,
                    outcome,
                })?;
            }

            WorkerMessage::Shutdown => {
                tracing::debug!(worker = state.worker, "Shutting down worker");
                myself.stop(None);
            }
        }

        Ok(())
    }
}

/// Run a task body, turning panics and timeouts into task failures.
pub(crate) async fn run_body(
    body: &TaskBody,
    timeout: Option<Duration>,
) -> Result<Option<TaskGraph>, TaskError> {
    let guarded = AssertUnwindSafe(body.run()).catch_unwind();

    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, guarded).await {
            Ok(result) => result,
            Err(_) => return Err(TaskError::Timeout(limit.as_secs())),
        },
        None => guarded.await,
    };

    result.unwrap_or_else(|panic| Err(TaskError::Panicked(panic_message(panic.as_ref()))))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
