#![allow(clippy::disallowed_methods)]

mod common;

use std::collections::BTreeSet;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{
    Gate, RunLog, failing_task, gated_task, meta_task, ok_task, start_engine, task_named,
    test_config, wait_for_task,
};
use db::Transaction;
use engine::{
    EngineError, EventSink, JobEngine, JobFilter, JobRequest, LockRegistry, RESTART_REASON,
    SHUTDOWN_REASON,
};
use job_core::{
    ChangeKind, EntityType, FnTask, JobId, JobRecord, JobState, JobStatus, LockObjectReference,
    ObjectType, TaskBody, TaskError, TaskGraph, TaskGuard, TaskId, TaskRecord, TaskState,
    TaskStatus,
};

fn objects(refs: &[(u64, ObjectType)]) -> BTreeSet<LockObjectReference> {
    refs.iter()
        .map(|(id, object_type)| LockObjectReference::new(*id, *object_type, format!("obj-{}", id)))
        .collect()
}

#[test]
fn test_failure_skips_successors() -> Result<(), Box<dyn Error>> {
    common::run(async {
        let _guard = common::setup_db().await?;
        let engine = start_engine().await?;
        let log = RunLog::default();

        let mut graph = TaskGraph::new();
        graph.append_task(failing_task("validate", "Security group has no members", &log));
        graph.append_task(ok_task("register", &log));
        graph.append_task(ok_task("bind", &log));
        graph.append_task_with_guard(
            ok_task("cleanup", &log),
            TaskGuard::AllPredecessorsCompleted,
        );

        let job_id = engine.submit(JobRequest::new("skip chain", graph)).await?;
        let job = engine.wait_for_completion(job_id).await?;

        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.failure_reason.as_deref(),
            Some("Security group has no members")
        );
        assert!(job.started_at.is_some());

        let tasks = engine.list_tasks(job_id).await?;
        let names: Vec<&str> = tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["validate", "register", "bind", "cleanup"]);

        let validate = task_named(&tasks, "validate");
        assert_eq!(validate.status, TaskStatus::Failed);
        assert_eq!(
            validate.fail_reason.as_deref(),
            Some("Security group has no members")
        );
        assert_eq!(task_named(&tasks, "register").status, TaskStatus::Skipped);
        assert_eq!(task_named(&tasks, "bind").status, TaskStatus::Skipped);
        assert!(task_named(&tasks, "bind").started_at.is_none());
        assert_eq!(task_named(&tasks, "cleanup").status, TaskStatus::Passed);
        assert!(tasks.iter().all(|t| t.state == TaskState::Completed));

        assert_eq!(log.entries(), vec!["validate", "cleanup"]);

        engine.shutdown().await?;
        Ok(())
    })
}

#[test]
fn test_meta_task_children_run_in_order() -> Result<(), Box<dyn Error>> {
    common::run(async {
        let _guard = common::setup_db().await?;
        let engine = start_engine().await?;
        let log = RunLog::default();

        let child_log = log.clone();
        let mut graph = TaskGraph::new();
        graph.append_task(meta_task("check", None, move || {
            let mut sub = TaskGraph::new();
            sub.append_task(ok_task("allocate", &child_log));
            sub.append_task(ok_task("create hook", &child_log));
            sub
        }));
        graph.append_task(ok_task("report", &log));

        let job_id = engine.submit(JobRequest::new("expand", graph)).await?;
        let job = engine.wait_for_completion(job_id).await?;
        assert_eq!(job.status, JobStatus::Passed);
        assert!(job.failure_reason.is_none());

        let tasks = engine.list_tasks(job_id).await?;
        let names: Vec<&str> = tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["check", "allocate", "create hook", "report"]);
        let orders: Vec<u32> = tasks.iter().map(|t| t.dependency_order).collect();
        assert_eq!(orders, vec![1, 2, 3, 4]);
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Passed));

        let check = task_named(&tasks, "check");
        let allocate = task_named(&tasks, "allocate");
        let create = task_named(&tasks, "create hook");
        let report = task_named(&tasks, "report");
        assert_eq!(check.children, [allocate.id, create.id].into_iter().collect());
        assert_eq!(allocate.parent, Some(check.id));
        assert_eq!(create.parent, Some(check.id));
        assert!(allocate.predecessors.contains(&check.id));
        assert_eq!(report.predecessors, [create.id].into_iter().collect());
        assert!(report.started_at >= create.completed_at);

        assert_eq!(log.entries(), vec!["allocate", "create hook", "report"]);

        engine.shutdown().await?;
        Ok(())
    })
}

#[test]
fn test_ancestors_guard_sees_earlier_failure() -> Result<(), Box<dyn Error>> {
    common::run(async {
        let _guard = common::setup_db().await?;
        let engine = start_engine().await?;
        let log = RunLog::default();

        let mut graph = TaskGraph::new();
        graph.append_task(failing_task("remove hook", "Controller refused", &log));
        graph.append_task_with_guard(
            ok_task("deallocate", &log),
            TaskGuard::AllPredecessorsCompleted,
        );
        graph.append_task_with_guard(
            ok_task("delete group", &log),
            TaskGuard::AllAncestorsSucceeded,
        );

        let job_id = engine.submit(JobRequest::new("ancestors", graph)).await?;
        let job = engine.wait_for_completion(job_id).await?;
        assert_eq!(job.status, JobStatus::Failed);

        let tasks = engine.list_tasks(job_id).await?;
        assert_eq!(task_named(&tasks, "deallocate").status, TaskStatus::Passed);
        assert_eq!(task_named(&tasks, "delete group").status, TaskStatus::Skipped);
        assert_eq!(log.entries(), vec!["remove hook", "deallocate"]);

        engine.shutdown().await?;
        Ok(())
    })
}

#[test]
fn test_empty_graph_passes() -> Result<(), Box<dyn Error>> {
    common::run(async {
        let _guard = common::setup_db().await?;
        let engine = start_engine().await?;

        let job_id = engine.submit(JobRequest::new("nothing to do", TaskGraph::new())).await?;
        let job = engine.wait_for_completion(job_id).await?;

        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.status, JobStatus::Passed);
        assert!(engine.list_tasks(job_id).await?.is_empty());
        assert!(!engine.is_active(job_id).await?);

        engine.shutdown().await?;
        Ok(())
    })
}

#[test]
fn test_abort_job() -> Result<(), Box<dyn Error>> {
    common::run(async {
        let _guard = common::setup_db().await?;
        let engine = start_engine().await?;
        let log = RunLog::default();
        let gate = Gate::new();

        let mut graph = TaskGraph::new();
        graph.append_task(gated_task("slow", &gate, &log));
        graph.append_task(ok_task("after", &log));

        let job_id = engine.submit(JobRequest::new("abortable", graph)).await?;
        wait_for_task(&engine, job_id, "slow", TaskState::Running).await?;

        engine.abort_job(job_id, "Aborted by admin").await?;
        let tasks = engine.list_tasks(job_id).await?;
        assert_eq!(task_named(&tasks, "after").status, TaskStatus::Aborted);
        assert_eq!(task_named(&tasks, "slow").state, TaskState::Running);
        assert!(engine.is_active(job_id).await?);

        gate.open();
        let job = engine.wait_for_completion(job_id).await?;
        assert_eq!(job.status, JobStatus::Aborted);
        assert_eq!(job.failure_reason.as_deref(), Some("Aborted by admin"));

        let tasks = engine.list_tasks(job_id).await?;
        assert_eq!(task_named(&tasks, "slow").status, TaskStatus::Passed);
        let after = task_named(&tasks, "after");
        assert_eq!(after.fail_reason.as_deref(), Some("Aborted by admin"));
        assert!(after.started_at.is_none());
        assert_eq!(log.entries(), vec!["slow"]);

        // completed jobs ignore aborts, unknown ones are reported
        engine.abort_job(job_id, "again").await?;
        assert_eq!(engine.get_job(job_id).await?.failure_reason.as_deref(), Some("Aborted by admin"));
        let missing = engine.abort_job(JobId::new(), "nobody").await;
        assert!(matches!(missing, Err(EngineError::JobNotFound(_))));

        engine.shutdown().await?;
        Ok(())
    })
}

#[test]
fn test_abort_while_meta_task_runs() -> Result<(), Box<dyn Error>> {
    common::run(async {
        let _guard = common::setup_db().await?;
        let engine = start_engine().await?;
        let log = RunLog::default();
        let gate = Gate::new();

        let child_log = log.clone();
        let mut graph = TaskGraph::new();
        graph.append_task(meta_task("check", Some(gate.clone()), move || {
            let mut sub = TaskGraph::new();
            sub.append_task(ok_task("late child", &child_log));
            sub
        }));

        let job_id = engine.submit(JobRequest::new("abort meta", graph)).await?;
        wait_for_task(&engine, job_id, "check", TaskState::Running).await?;
        engine.abort_job(job_id, "Stop now").await?;
        gate.open();

        let job = engine.wait_for_completion(job_id).await?;
        assert_eq!(job.status, JobStatus::Aborted);

        let tasks = engine.list_tasks(job_id).await?;
        assert_eq!(tasks.len(), 2);
        let child = task_named(&tasks, "late child");
        assert_eq!(child.state, TaskState::Completed);
        assert_eq!(child.status, TaskStatus::Aborted);
        assert_eq!(child.fail_reason.as_deref(), Some("Stop now"));
        assert!(log.entries().is_empty());

        engine.shutdown().await?;
        Ok(())
    })
}

#[test]
fn test_overlapping_locks_serialize_jobs() -> Result<(), Box<dyn Error>> {
    common::run(async {
        let _guard = common::setup_db().await?;
        let locks = Arc::new(LockRegistry::new());
        let engine = JobEngine::start(test_config(), locks.clone()).await?;
        let log = RunLog::default();
        let gate = Gate::new();

        let group = objects(&[(5, ObjectType::SecurityGroup)]);
        let mut first = TaskGraph::new();
        first.append_task(gated_task("first", &gate, &log));
        let first_id = engine
            .submit(JobRequest::new("first", first).with_objects(group.clone()))
            .await?;

        let mut second = TaskGraph::new();
        second.append_task(ok_task("second", &log));
        let second_id = engine
            .submit(
                JobRequest::new("second", second).with_objects(objects(&[
                    (5, ObjectType::SecurityGroup),
                    (9, ObjectType::SecurityGroupInterface),
                ])),
            )
            .await?;

        let mut third = TaskGraph::new();
        third.append_task(ok_task("third", &log));
        let third_id = engine
            .submit(
                JobRequest::new("third", third)
                    .with_objects(objects(&[(6, ObjectType::SecurityGroup)])),
            )
            .await?;

        // unrelated objects are not held up
        let third_job = engine.wait_for_completion(third_id).await?;
        assert_eq!(third_job.status, JobStatus::Passed);

        let blocked = engine.list_tasks(second_id).await?;
        assert_eq!(blocked[0].state, TaskState::Queued);
        assert!(blocked[0].started_at.is_none());
        let held = group.iter().next().cloned().ok_or("no object")?;
        assert_eq!(locks.holder_of(&held), Some(first_id));

        gate.open();
        let first_job = engine.wait_for_completion(first_id).await?;
        let second_job = engine.wait_for_completion(second_id).await?;
        assert_eq!(second_job.status, JobStatus::Passed);

        let second_task = &engine.list_tasks(second_id).await?[0];
        assert!(second_task.started_at >= first_job.completed_at);
        assert_eq!(log.entries(), vec!["third", "first", "second"]);
        assert_eq!(locks.holder_of(&held), None);

        engine.shutdown().await?;
        Ok(())
    })
}

#[test]
fn test_blocked_job_keeps_its_place_in_line() -> Result<(), Box<dyn Error>> {
    common::run(async {
        let _guard = common::setup_db().await?;
        let locks = Arc::new(LockRegistry::new());
        let engine = JobEngine::start(test_config(), locks.clone()).await?;
        let log = RunLog::default();
        let gate = Gate::new();

        let mut holder = TaskGraph::new();
        holder.append_task(gated_task("holder", &gate, &log));
        let holder_id = engine
            .submit(
                JobRequest::new("holder", holder)
                    .with_objects(objects(&[(1, ObjectType::SecurityGroup)])),
            )
            .await?;

        let mut older = TaskGraph::new();
        older.append_task(ok_task("older", &log));
        let older_id = engine
            .submit(JobRequest::new("older", older).with_objects(objects(&[
                (1, ObjectType::SecurityGroup),
                (2, ObjectType::SecurityGroup),
            ])))
            .await?;

        let mut younger = TaskGraph::new();
        younger.append_task(ok_task("younger", &log));
        let younger_id = engine
            .submit(
                JobRequest::new("younger", younger)
                    .with_objects(objects(&[(2, ObjectType::SecurityGroup)])),
            )
            .await?;

        let mut unrelated = TaskGraph::new();
        unrelated.append_task(ok_task("unrelated", &log));
        let unrelated_id = engine
            .submit(
                JobRequest::new("unrelated", unrelated)
                    .with_objects(objects(&[(3, ObjectType::SecurityGroup)])),
            )
            .await?;
        engine.wait_for_completion(unrelated_id).await?;

        // the younger job must not take object 2 while the older one waits for it
        let younger_tasks = engine.list_tasks(younger_id).await?;
        assert_eq!(younger_tasks[0].state, TaskState::Queued);
        let wanted = LockObjectReference::new(2, ObjectType::SecurityGroup, "obj-2");
        assert_eq!(locks.holder_of(&wanted), None);

        gate.open();
        engine.wait_for_completion(holder_id).await?;
        assert_eq!(engine.wait_for_completion(older_id).await?.status, JobStatus::Passed);
        assert_eq!(engine.wait_for_completion(younger_id).await?.status, JobStatus::Passed);
        assert_eq!(log.entries(), vec!["unrelated", "holder", "older", "younger"]);

        engine.shutdown().await?;
        Ok(())
    })
}

#[test]
fn test_restart_aborts_interrupted_work() -> Result<(), Box<dyn Error>> {
    common::run(async {
        let _guard = common::setup_db().await?;

        let mut job = JobRecord::new("interrupted");
        job.mark_running(Utc::now());
        let mut running = TaskRecord::new(TaskId::new(), job.id, "running", TaskGuard::default());
        running.state = TaskState::Running;
        running.dependency_order = 1;
        let mut waiting = TaskRecord::new(TaskId::new(), job.id, "waiting", TaskGuard::default());
        waiting.state = TaskState::Pending;
        waiting.dependency_order = 2;

        let mut tx = Transaction::begin();
        tx.save_job(&job)?;
        tx.save_tasks([&running, &waiting])?;
        tx.commit().await?;

        let events = EventSink::new(64);
        let mut rx = events.subscribe();
        let engine =
            JobEngine::start_with_events(test_config(), Arc::new(LockRegistry::new()), events)
                .await?;

        let job = engine.get_job(job.id).await?;
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.status, JobStatus::Aborted);
        assert_eq!(job.failure_reason.as_deref(), Some(RESTART_REASON));

        let tasks = engine.list_tasks(job.id).await?;
        for task in &tasks {
            assert_eq!(task.state, TaskState::Completed);
            assert_eq!(task.status, TaskStatus::Aborted);
            assert_eq!(task.fail_reason.as_deref(), Some("aborted due to restart"));
        }

        let mut updated = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.kind, ChangeKind::Updated);
            updated.push(event.entity_type);
        }
        assert_eq!(
            updated,
            vec![EntityType::Task, EntityType::Task, EntityType::Job]
        );

        engine.shutdown().await?;
        Ok(())
    })
}

#[test]
fn test_shutdown_drains_and_rejects() -> Result<(), Box<dyn Error>> {
    common::run(async {
        let _guard = common::setup_db().await?;
        let engine = start_engine().await?;
        let log = RunLog::default();
        let gate = Gate::new();

        let mut graph = TaskGraph::new();
        graph.append_task(gated_task("running", &gate, &log));
        graph.append_task(ok_task("never", &log));

        let job_id = engine.submit(JobRequest::new("drained", graph)).await?;
        wait_for_task(&engine, job_id, "running", TaskState::Running).await?;

        let (stopped, ()) = tokio::join!(engine.shutdown(), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            gate.open();
        });
        stopped?;

        let job = engine.get_job(job_id).await?;
        assert_eq!(job.status, JobStatus::Aborted);
        assert_eq!(job.failure_reason.as_deref(), Some(SHUTDOWN_REASON));

        let tasks = engine.list_tasks(job_id).await?;
        assert_eq!(task_named(&tasks, "running").status, TaskStatus::Passed);
        assert_eq!(task_named(&tasks, "never").status, TaskStatus::Aborted);
        assert_eq!(log.entries(), vec!["running"]);

        let rejected = engine
            .submit(JobRequest::new("too late", TaskGraph::new()))
            .await;
        match rejected {
            Err(e @ EngineError::ShuttingDown) => assert_eq!(
                e.to_string(),
                "Cannot process job, job engine is shutting down."
            ),
            other => panic!("expected rejection, got {:?}", other),
        }

        // a second shutdown is a no-op
        engine.shutdown().await?;
        Ok(())
    })
}

#[test]
fn test_task_failures_from_panic_and_timeout() -> Result<(), Box<dyn Error>> {
    common::run(async {
        let _guard = common::setup_db().await?;
        let config = test_config().with_task_timeout(Duration::from_secs(1));
        let engine = JobEngine::start(config, Arc::new(LockRegistry::new())).await?;

        let mut graph = TaskGraph::new();
        graph.add_task(TaskBody::plain(FnTask::new("panics", || {
            Box::pin(async {
                let explode = true;
                if explode {
                    panic!("boom");
                }
                Ok(())
            })
        })));
        graph.add_task(TaskBody::plain(FnTask::new("hangs", || {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
        })));
        graph.add_task(TaskBody::plain(FnTask::new("refused", || {
            Box::pin(async { Err(TaskError::Controller("409 Conflict".into())) })
        })));

        let job_id = engine.submit(JobRequest::new("failures", graph)).await?;
        let job = engine.wait_for_completion(job_id).await?;
        assert_eq!(job.status, JobStatus::Failed);

        let tasks = engine.list_tasks(job_id).await?;
        assert_eq!(
            task_named(&tasks, "panics").fail_reason.as_deref(),
            Some("Task panicked: boom")
        );
        assert_eq!(
            task_named(&tasks, "hangs").fail_reason.as_deref(),
            Some("Task timed out after 1s")
        );
        assert_eq!(
            task_named(&tasks, "refused").fail_reason.as_deref(),
            Some("409 Conflict")
        );
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Failed));

        engine.shutdown().await?;
        Ok(())
    })
}

#[test]
fn test_events_follow_transitions() -> Result<(), Box<dyn Error>> {
    common::run(async {
        let _guard = common::setup_db().await?;
        let engine = start_engine().await?;
        let mut rx = engine.subscribe();
        let log = RunLog::default();

        let mut graph = TaskGraph::new();
        graph.append_task(ok_task("only", &log));
        let job_id = engine.submit(JobRequest::new("observed", graph)).await?;
        engine.wait_for_completion(job_id).await?;

        let mut job_events = Vec::new();
        let mut task_events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.job_id, job_id);
            match event.entity_type {
                EntityType::Job => job_events.push((event.kind, event.summary)),
                EntityType::Task => task_events.push((event.kind, event.summary)),
            }
        }

        assert_eq!(
            job_events,
            vec![
                (ChangeKind::Created, "queued/unknown".to_string()),
                (ChangeKind::Updated, "running/unknown".to_string()),
                (ChangeKind::Updated, "completed/passed".to_string()),
            ]
        );
        assert_eq!(task_events.first().map(|e| e.0), Some(ChangeKind::Created));
        let summaries: Vec<&str> = task_events.iter().map(|e| e.1.as_str()).collect();
        assert!(summaries.contains(&"queued/unknown"));
        assert!(summaries.contains(&"running/unknown"));
        assert_eq!(summaries.last(), Some(&"completed/passed"));

        engine.shutdown().await?;
        Ok(())
    })
}

#[test]
fn test_queries_and_delete() -> Result<(), Box<dyn Error>> {
    common::run(async {
        let _guard = common::setup_db().await?;
        let engine = start_engine().await?;
        let mut rx = engine.subscribe();
        let log = RunLog::default();
        let gate = Gate::new();

        let mut graph = TaskGraph::new();
        graph.append_task(ok_task("done", &log));
        let done_id = engine
            .submit(JobRequest::new("done", graph).with_submitted_by("admin"))
            .await?;
        engine.wait_for_completion(done_id).await?;

        let mut graph = TaskGraph::new();
        graph.append_task(gated_task("busy", &gate, &log));
        let busy_id = engine.submit(JobRequest::new("busy", graph)).await?;
        let busy_task = wait_for_task(&engine, busy_id, "busy", TaskState::Running).await?;

        assert_eq!(engine.find_job_by_task(busy_task.id).await?.id, busy_id);
        assert!(matches!(
            engine.find_job_by_task(TaskId::new()).await,
            Err(EngineError::TaskNotFound(_))
        ));
        assert!(matches!(
            engine.get_job(JobId::new()).await,
            Err(EngineError::JobNotFound(_))
        ));

        let completed = engine
            .list_jobs(JobFilter::default().with_state(JobState::Completed))
            .await?;
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].submitted_by, "admin");
        assert_eq!(engine.list_jobs(JobFilter::default()).await?.len(), 2);

        assert!(matches!(
            engine.delete_job(busy_id).await,
            Err(EngineError::JobActive(_))
        ));

        while rx.try_recv().is_ok() {}
        engine.delete_job(done_id).await?;
        assert!(matches!(
            engine.get_job(done_id).await,
            Err(EngineError::JobNotFound(_))
        ));
        assert!(engine.list_tasks(done_id).await?.is_empty());

        let deleted: Vec<(EntityType, ChangeKind)> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| (e.entity_type, e.kind))
            .collect();
        assert_eq!(
            deleted,
            vec![
                (EntityType::Task, ChangeKind::Deleted),
                (EntityType::Job, ChangeKind::Deleted),
            ]
        );

        gate.open();
        engine.wait_for_completion(busy_id).await?;
        engine.shutdown().await?;
        Ok(())
    })
}
