#![allow(dead_code)]

use std::error::Error;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::sync::{Mutex, MutexGuard, Semaphore};

use db::{DbConfig, DbError};
use engine::{EngineConfig, EngineError, JobEngine, LockRegistry};
use job_core::{
    FnMetaTask, FnTask, JobId, TaskBody, TaskError, TaskGraph, TaskRecord, TaskState,
};

static TEST_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

// The database handle is process-wide and its background task lives on the
// runtime that opened it, so every test shares one runtime.
static RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build test runtime")
});

pub fn run<F>(test: F) -> Result<(), Box<dyn Error>>
where
    F: Future<Output = Result<(), Box<dyn Error>>>,
{
    RUNTIME.block_on(test)
}

pub async fn setup_db() -> Result<MutexGuard<'static, ()>, DbError> {
    let guard = TEST_LOCK.lock().await;
    engine::try_init_logging();
    db::init(DbConfig::memory()).await?;
    let db_conn = db::get_db()?;
    db_conn.query("DELETE task; DELETE job;").await?.check()?;
    Ok(guard)
}

pub fn test_config() -> EngineConfig {
    EngineConfig::default()
        .with_workers(4)
        .with_tick_interval(Duration::from_millis(50))
}

pub async fn start_engine() -> Result<JobEngine, EngineError> {
    JobEngine::start(test_config(), Arc::new(LockRegistry::new())).await
}

/// Records the order in which task bodies ran.
#[derive(Clone, Default)]
pub struct RunLog(Arc<std::sync::Mutex<Vec<String>>>);

impl RunLog {
    pub fn push(&self, name: &str) {
        self.0.lock().unwrap().push(name.to_string());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Holds task bodies until opened.
#[derive(Clone)]
pub struct Gate(Arc<Semaphore>);

impl Gate {
    pub fn new() -> Self {
        Self(Arc::new(Semaphore::new(0)))
    }

    pub fn open(&self) {
        self.0.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    async fn pass(&self) {
        let _ = self.0.acquire().await;
    }
}

pub fn ok_task(name: &str, log: &RunLog) -> TaskBody {
    let log = log.clone();
    let task_name = name.to_string();
    TaskBody::plain(FnTask::new(name, move || {
        let log = log.clone();
        let task_name = task_name.clone();
        Box::pin(async move {
            log.push(&task_name);
            Ok(())
        })
    }))
}

pub fn failing_task(name: &str, reason: &str, log: &RunLog) -> TaskBody {
    let log = log.clone();
    let task_name = name.to_string();
    let reason = reason.to_string();
    TaskBody::plain(FnTask::new(name, move || {
        let log = log.clone();
        let task_name = task_name.clone();
        let reason = reason.clone();
        Box::pin(async move {
            log.push(&task_name);
            Err(TaskError::validation(reason))
        })
    }))
}

pub fn gated_task(name: &str, gate: &Gate, log: &RunLog) -> TaskBody {
    let gate = gate.clone();
    let log = log.clone();
    let task_name = name.to_string();
    TaskBody::plain(FnTask::new(name, move || {
        let gate = gate.clone();
        let log = log.clone();
        let task_name = task_name.clone();
        Box::pin(async move {
            gate.pass().await;
            log.push(&task_name);
            Ok(())
        })
    }))
}

/// Meta task that waits for `gate` (if any) and then returns `build()`.
pub fn meta_task<B>(name: &str, gate: Option<Gate>, build: B) -> TaskBody
where
    B: Fn() -> TaskGraph + Send + Sync + 'static,
{
    let build = Arc::new(build);
    TaskBody::meta(FnMetaTask::new(name, move || {
        let gate = gate.clone();
        let build = build.clone();
        Box::pin(async move {
            if let Some(gate) = gate {
                gate.pass().await;
            }
            Ok(build())
        })
    }))
}

pub fn task_named<'a>(tasks: &'a [TaskRecord], name: &str) -> &'a TaskRecord {
    tasks
        .iter()
        .find(|t| t.name == name)
        .unwrap_or_else(|| panic!("no task named {}", name))
}

/// Poll until the named task reaches `state`.
pub async fn wait_for_task(
    engine: &JobEngine,
    job_id: JobId,
    name: &str,
    state: TaskState,
) -> Result<TaskRecord, Box<dyn Error>> {
    for _ in 0..500 {
        let tasks = engine.list_tasks(job_id).await?;
        if let Some(task) = tasks.iter().find(|t| t.name == name && t.state == state) {
            return Ok(task.clone());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Err(format!("task {} never reached {}", name, state).into())
}
