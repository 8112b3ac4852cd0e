//! Task domain types: records, guards and executable task bodies.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::TaskError;
use crate::graph::TaskGraph;
use crate::job::JobId;
use crate::lock::LockObjectReference;

/// Unique identifier for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Ulid);

impl TaskId {
    /// Create a new unique task ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a task ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a task. Transitions are driven by the engine only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Part of the graph, guard not evaluated yet.
    #[default]
    NotRunning,
    /// Guard evaluated but predecessors are still outstanding.
    Pending,
    /// Guard satisfied, waiting for a worker (and for the job's locks).
    Queued,
    /// A worker is executing the body.
    Running,
    Completed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::NotRunning => "not_running",
            TaskState::Pending => "pending",
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
        }
    }

    /// States in which the guard still has to be evaluated.
    pub fn is_waiting(&self) -> bool {
        matches!(self, TaskState::NotRunning | TaskState::Pending)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a task, set when it reaches [`TaskState::Completed`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Unknown,
    Passed,
    Failed,
    Skipped,
    Aborted,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Unknown => "unknown",
            TaskStatus::Passed => "passed",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy deciding whether a task runs once its predecessors are done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskGuard {
    /// Run once every direct predecessor completed, whatever its status.
    AllPredecessorsCompleted,
    /// Run only if every direct predecessor passed, otherwise skip.
    #[default]
    AllPredecessorsSucceeded,
    /// Run only if every transitive ancestor passed, otherwise skip.
    AllAncestorsSucceeded,
}

/// Result of evaluating a [`TaskGuard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Ready,
    Skip,
    Wait,
}

impl TaskGuard {
    /// Evaluate the guard against `(state, status)` pairs of the direct
    /// predecessors. `ancestors` is only consulted by
    /// [`TaskGuard::AllAncestorsSucceeded`].
    pub fn evaluate<F>(&self, predecessors: &[(TaskState, TaskStatus)], ancestors: F) -> Eligibility
    where
        F: FnOnce() -> Vec<(TaskState, TaskStatus)>,
    {
        if predecessors
            .iter()
            .any(|(state, _)| *state != TaskState::Completed)
        {
            return Eligibility::Wait;
        }

        match self {
            TaskGuard::AllPredecessorsCompleted => Eligibility::Ready,
            TaskGuard::AllPredecessorsSucceeded => {
                if predecessors
                    .iter()
                    .all(|(_, status)| *status == TaskStatus::Passed)
                {
                    Eligibility::Ready
                } else {
                    Eligibility::Skip
                }
            }
            TaskGuard::AllAncestorsSucceeded => {
                let ancestors = ancestors();
                if ancestors
                    .iter()
                    .any(|(state, _)| *state != TaskState::Completed)
                {
                    Eligibility::Wait
                } else if ancestors
                    .iter()
                    .all(|(_, status)| *status == TaskStatus::Passed)
                {
                    Eligibility::Ready
                } else {
                    Eligibility::Skip
                }
            }
        }
    }
}

/// Persisted representation of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    #[serde(rename = "task_id")]
    pub id: TaskId,
    pub job_id: JobId,
    pub name: String,
    pub state: TaskState,
    pub status: TaskStatus,
    pub guard: TaskGuard,
    /// Position in a topological order of the job's graph, starting at 1.
    pub dependency_order: u32,
    #[serde(default)]
    pub predecessors: BTreeSet<TaskId>,
    #[serde(default)]
    pub successors: BTreeSet<TaskId>,
    /// Tasks spliced in by this task when it is a meta task.
    #[serde(default)]
    pub children: BTreeSet<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_reason: Option<String>,
    #[serde(default)]
    pub objects: BTreeSet<LockObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn new(id: TaskId, job_id: JobId, name: impl Into<String>, guard: TaskGuard) -> Self {
        Self {
            id,
            job_id,
            name: name.into(),
            state: TaskState::NotRunning,
            status: TaskStatus::Unknown,
            guard,
            dependency_order: 0,
            predecessors: BTreeSet::new(),
            successors: BTreeSet::new(),
            children: BTreeSet::new(),
            parent: None,
            fail_reason: None,
            objects: BTreeSet::new(),
            queued_at: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == TaskState::Completed
    }

    /// Move the task to its terminal state.
    pub fn complete(&mut self, status: TaskStatus, reason: Option<String>, at: DateTime<Utc>) {
        self.state = TaskState::Completed;
        self.status = status;
        self.completed_at = Some(at);
        if reason.is_some() {
            self.fail_reason = reason;
        }
    }

    /// Short `state/status` summary for logs and events.
    pub fn summary(&self) -> String {
        format!("{}/{}", self.state, self.status)
    }
}

/// Future returned by task bodies.
pub type TaskFuture<'a, T> = BoxFuture<'a, Result<T, TaskError>>;

/// A unit of concrete work.
pub trait Task: Send + Sync + 'static {
    /// Name shown to operators and used for graph comparison.
    fn name(&self) -> String;

    /// Entities this task touches.
    fn objects(&self) -> BTreeSet<LockObjectReference> {
        BTreeSet::new()
    }

    fn execute(&self) -> TaskFuture<'_, ()>;
}

/// A task whose execution computes more work.
///
/// The returned graph is spliced in under the meta task's node. An empty
/// graph means nothing needs to be done.
pub trait MetaTask: Send + Sync + 'static {
    fn name(&self) -> String;

    fn objects(&self) -> BTreeSet<LockObjectReference> {
        BTreeSet::new()
    }

    fn expand(&self) -> TaskFuture<'_, TaskGraph>;
}

/// Executable body of a graph node.
#[derive(Clone)]
pub enum TaskBody {
    Plain(Arc<dyn Task>),
    Meta(Arc<dyn MetaTask>),
}

impl TaskBody {
    pub fn plain(task: impl Task) -> Self {
        TaskBody::Plain(Arc::new(task))
    }

    pub fn meta(task: impl MetaTask) -> Self {
        TaskBody::Meta(Arc::new(task))
    }

    pub fn name(&self) -> String {
        match self {
            TaskBody::Plain(task) => task.name(),
            TaskBody::Meta(task) => task.name(),
        }
    }

    pub fn objects(&self) -> BTreeSet<LockObjectReference> {
        match self {
            TaskBody::Plain(task) => task.objects(),
            TaskBody::Meta(task) => task.objects(),
        }
    }

    pub fn is_meta(&self) -> bool {
        matches!(self, TaskBody::Meta(_))
    }

    /// Run the body. Meta tasks yield the graph to splice in.
    pub async fn run(&self) -> Result<Option<TaskGraph>, TaskError> {
        match self {
            TaskBody::Plain(task) => task.execute().await.map(|()| None),
            TaskBody::Meta(task) => task.expand().await.map(Some),
        }
    }
}

impl std::fmt::Debug for TaskBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskBody::Plain(task) => f.debug_tuple("Plain").field(&task.name()).finish(),
            TaskBody::Meta(task) => f.debug_tuple("Meta").field(&task.name()).finish(),
        }
    }
}

/// A simple closure-based task.
pub struct FnTask<F>
where
    F: Fn() -> TaskFuture<'static, ()> + Send + Sync + 'static,
{
    name: String,
    objects: BTreeSet<LockObjectReference>,
    run: F,
}

impl<F> FnTask<F>
where
    F: Fn() -> TaskFuture<'static, ()> + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, run: F) -> Self {
        Self {
            name: name.into(),
            objects: BTreeSet::new(),
            run,
        }
    }

    pub fn with_objects(mut self, objects: BTreeSet<LockObjectReference>) -> Self {
        self.objects = objects;
        self
    }
}

impl<F> Task for FnTask<F>
where
    F: Fn() -> TaskFuture<'static, ()> + Send + Sync + 'static,
{
    fn name(&self) -> String {
        self.name.clone()
    }

    fn objects(&self) -> BTreeSet<LockObjectReference> {
        self.objects.clone()
    }

    fn execute(&self) -> TaskFuture<'_, ()> {
        (self.run)()
    }
}

/// A closure-based meta task.
pub struct FnMetaTask<F>
where
    F: Fn() -> TaskFuture<'static, TaskGraph> + Send + Sync + 'static,
{
    name: String,
    run: F,
}

impl<F> FnMetaTask<F>
where
    F: Fn() -> TaskFuture<'static, TaskGraph> + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, run: F) -> Self {
        Self {
            name: name.into(),
            run,
        }
    }
}

impl<F> MetaTask for FnMetaTask<F>
where
    F: Fn() -> TaskFuture<'static, TaskGraph> + Send + Sync + 'static,
{
    fn name(&self) -> String {
        self.name.clone()
    }

    fn expand(&self) -> TaskFuture<'_, TaskGraph> {
        (self.run)()
    }
}
