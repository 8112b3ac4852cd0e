//! In-memory scheduling state of one active job.
//!
//! Every mutation returns the set of records it touched so the coordinator
//! can commit them before the new state replaces the old one.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use job_core::{
    Eligibility, GraphError, JobRecord, JobStatus, NodeIndex, TaskBody, TaskError, TaskGraph,
    TaskId, TaskRecord, TaskState, TaskStatus,
};

/// Records touched by one scheduling step.
#[derive(Debug, Default)]
pub(crate) struct Changes {
    /// Tasks inserted by this step.
    pub created: BTreeSet<NodeIndex>,
    /// Tasks whose state or status changed.
    pub updated: BTreeSet<NodeIndex>,
    /// Tasks whose edges or dependency order changed and nothing else.
    pub reshaped: BTreeSet<NodeIndex>,
    pub job: bool,
}

impl Changes {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.reshaped.is_empty() && !self.job
    }

    /// Tasks that must be written in full.
    pub fn saved(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.created.union(&self.updated).copied()
    }

    /// Tasks that only need their structural fields merged.
    pub fn reshaped_only(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.reshaped
            .iter()
            .copied()
            .filter(|i| !self.created.contains(i) && !self.updated.contains(i))
    }
}

/// A job's graph together with the task records aligned to its nodes.
#[derive(Debug, Clone)]
pub(crate) struct JobSchedule {
    pub job: JobRecord,
    graph: TaskGraph,
    tasks: Vec<TaskRecord>,
    order: Vec<NodeIndex>,
}

impl JobSchedule {
    pub fn new(job: JobRecord, graph: TaskGraph) -> Self {
        let mut schedule = Self {
            job,
            graph,
            tasks: Vec::new(),
            order: Vec::new(),
        };
        let indices: Vec<NodeIndex> = schedule.graph.nodes().map(|(i, _)| i).collect();
        for index in indices {
            let record = schedule.new_record(index);
            schedule.tasks.push(record);
        }
        schedule.reshape(&mut Changes::default());
        schedule
    }

    pub fn tasks(&self) -> &[TaskRecord] {
        &self.tasks
    }

    pub fn task(&self, index: NodeIndex) -> &TaskRecord {
        &self.tasks[index.index()]
    }

    pub fn body(&self, index: NodeIndex) -> Option<TaskBody> {
        self.graph.node(index).map(|node| node.body.clone())
    }

    /// Every task has reached its terminal state.
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(TaskRecord::is_completed)
    }

    /// Queued tasks in dependency order.
    pub fn queued(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.order
            .iter()
            .copied()
            .filter(|&i| self.tasks[i.index()].state == TaskState::Queued)
    }

    /// Evaluate the guard of every waiting task.
    ///
    /// Tasks are visited in dependency order so a skip cascades through its
    /// successors within the same step.
    pub fn advance(&mut self, now: DateTime<Utc>) -> Changes {
        let mut changes = Changes::default();

        for position in 0..self.order.len() {
            let index = self.order[position];
            if !self.tasks[index.index()].state.is_waiting() {
                continue;
            }

            let Some(node) = self.graph.node(index) else {
                continue;
            };
            let predecessors: Vec<(TaskState, TaskStatus)> = node
                .predecessors()
                .iter()
                .map(|p| self.progress(*p))
                .collect();
            let eligibility = node.guard.evaluate(&predecessors, || {
                self.graph
                    .ancestors(index)
                    .into_iter()
                    .map(|a| self.progress(a))
                    .collect()
            });

            let task = &mut self.tasks[index.index()];
            match eligibility {
                Eligibility::Ready => {
                    task.state = TaskState::Queued;
                    task.queued_at = Some(now);
                }
                Eligibility::Skip => task.complete(TaskStatus::Skipped, None, now),
                Eligibility::Wait if task.state == TaskState::NotRunning => {
                    task.state = TaskState::Pending;
                }
                Eligibility::Wait => continue,
            }
            changes.updated.insert(index);
        }

        changes
    }

    /// Record that a worker committed the task as running.
    pub fn start(&mut self, index: NodeIndex, at: DateTime<Utc>) -> Changes {
        let mut changes = Changes::default();
        let task = &mut self.tasks[index.index()];
        task.state = TaskState::Running;
        task.started_at = Some(at);
        changes.job = self.job.mark_running(at);
        changes
    }

    /// Apply the outcome of a task body.
    ///
    /// A returned subgraph is spliced in under the task. While the job is
    /// being aborted the new tasks are created already aborted.
    pub fn finish(
        &mut self,
        index: NodeIndex,
        outcome: Result<Option<TaskGraph>, TaskError>,
        aborting: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Changes, GraphError> {
        let mut changes = Changes::default();

        match outcome {
            Ok(Some(sub)) if !sub.is_empty() => {
                let inserted = self.graph.insert_sub_graph(index, sub)?;
                for new_index in inserted {
                    let mut record = self.new_record(new_index);
                    if let Some(reason) = aborting {
                        record.complete(TaskStatus::Aborted, Some(reason.to_string()), now);
                    }
                    self.tasks.push(record);
                    changes.created.insert(new_index);
                }
                self.reshape(&mut changes);
                self.tasks[index.index()].complete(TaskStatus::Passed, None, now);
            }
            Ok(_) => self.tasks[index.index()].complete(TaskStatus::Passed, None, now),
            Err(e) => {
                self.tasks[index.index()].complete(TaskStatus::Failed, Some(e.to_string()), now)
            }
        }

        changes.updated.insert(index);
        Ok(changes)
    }

    /// Abort every task that has not been handed to a worker.
    pub fn abort(
        &mut self,
        reason: &str,
        in_flight: &BTreeSet<NodeIndex>,
        now: DateTime<Utc>,
    ) -> Changes {
        let mut changes = Changes::default();
        for position in 0..self.order.len() {
            let index = self.order[position];
            let task = &mut self.tasks[index.index()];
            if task.is_completed() || task.state == TaskState::Running || in_flight.contains(&index)
            {
                continue;
            }
            task.complete(TaskStatus::Aborted, Some(reason.to_string()), now);
            changes.updated.insert(index);
        }
        changes
    }

    /// Move the job to its terminal state.
    ///
    /// An aborted job always ends ABORTED with the abort reason. Otherwise
    /// the status is aggregated from the tasks and a failed job carries the
    /// reason of its first failed task.
    pub fn complete_job(&mut self, abort_reason: Option<&str>, now: DateTime<Utc>) -> Changes {
        let (status, reason) = match abort_reason {
            Some(reason) => (JobStatus::Aborted, Some(reason.to_string())),
            None => {
                let status = JobStatus::aggregate(self.tasks.iter().map(|t| &t.status));
                let reason = if status == JobStatus::Failed {
                    self.order
                        .iter()
                        .map(|i| &self.tasks[i.index()])
                        .find(|t| t.status == TaskStatus::Failed)
                        .and_then(|t| t.fail_reason.clone())
                } else {
                    None
                };
                (status, reason)
            }
        };

        self.job.mark_completed(status, reason, now);
        Changes {
            job: true,
            ..Default::default()
        }
    }

    fn progress(&self, index: NodeIndex) -> (TaskState, TaskStatus) {
        let task = &self.tasks[index.index()];
        (task.state, task.status)
    }

    fn new_record(&self, index: NodeIndex) -> TaskRecord {
        match self.graph.node(index) {
            Some(node) => {
                let mut record =
                    TaskRecord::new(node.id, self.job.id, node.body.name(), node.guard);
                record.objects = node.body.objects();
                record
            }
            None => TaskRecord::new(TaskId::new(), self.job.id, "", Default::default()),
        }
    }

    /// Recompute the dependency order and the edges of every record.
    fn reshape(&mut self, changes: &mut Changes) {
        self.order = self.graph.dependency_order();

        for (position, &index) in self.order.iter().enumerate() {
            let Some(node) = self.graph.node(index) else {
                continue;
            };
            let id_of = |set: &BTreeSet<NodeIndex>| -> BTreeSet<TaskId> {
                set.iter()
                    .filter_map(|i| self.graph.node(*i).map(|n| n.id))
                    .collect()
            };
            let predecessors = id_of(node.predecessors());
            let successors = id_of(node.successors());
            let children = id_of(node.children());
            let parent = node
                .parent()
                .and_then(|p| self.graph.node(p))
                .map(|n| n.id);
            let dependency_order = position as u32 + 1;

            let task = &mut self.tasks[index.index()];
            if task.dependency_order == dependency_order
                && task.predecessors == predecessors
                && task.successors == successors
                && task.children == children
                && task.parent == parent
            {
                continue;
            }

            task.dependency_order = dependency_order;
            task.predecessors = predecessors;
            task.successors = successors;
            task.children = children;
            task.parent = parent;
            changes.reshaped.insert(index);
        }
    }
}

/// Structural fields of a task, merged into the stored record without
/// touching its state.
pub(crate) fn structure_patch(task: &TaskRecord) -> serde_json::Value {
    serde_json::json!({
        "dependency_order": task.dependency_order,
        "predecessors": task.predecessors,
        "successors": task.successors,
        "children": task.children,
        "parent": task.parent,
    })
}
