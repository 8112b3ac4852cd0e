use std::collections::BTreeSet;

use job_core::{
    LockObjectReference, MetaTask, Task, TaskBody, TaskError, TaskFuture, TaskGraph, TaskGuard,
};

use super::ConformanceContext;
use super::hook::CheckPortGroupHookMetaTask;
use super::port_group::PortGroupCheckMetaTask;
use crate::model::{SecurityGroup, SecurityGroupInterface};

/// Top-level check of a security group and its interfaces.
///
/// A group marked for deletion tears down its hooks, interfaces and port
/// group, then deletes itself once everything before it passed.
pub struct SecurityGroupCheckMetaTask {
    ctx: ConformanceContext,
    sg: LockObjectReference,
    supports_port_group: bool,
}

impl SecurityGroupCheckMetaTask {
    /// `supports_port_group` tells whether the group's SDN controller
    /// redirects traffic through port groups and inspection hooks.
    pub fn new(ctx: ConformanceContext, sg: &SecurityGroup, supports_port_group: bool) -> Self {
        Self {
            ctx,
            sg: sg.reference(),
            supports_port_group,
        }
    }

    async fn compute(&self) -> Result<TaskGraph, TaskError> {
        let sg = self.ctx.inventory.security_group(self.sg.id)?;
        let is_delete = sg.marked_for_deletion;
        if is_delete {
            tracing::info!(sg = %sg.name, "Security group marked for deletion");
        } else {
            tracing::info!(sg = %sg.name, "Checking security group");
        }

        let mut graph = TaskGraph::new();
        if self.supports_port_group {
            graph.append_task_with_guard(
                TaskBody::meta(PortGroupCheckMetaTask::new(self.ctx.clone(), &sg, is_delete)),
                TaskGuard::AllPredecessorsCompleted,
            );
        }

        for sgi in self.ctx.inventory.interfaces_of(sg.id) {
            let mut required = Vec::new();
            if self.supports_port_group {
                required.push(graph.append_task(TaskBody::meta(CheckPortGroupHookMetaTask::new(
                    self.ctx.clone(),
                    &sgi,
                    is_delete,
                ))));
            }

            if sgi.marked_for_deletion || is_delete {
                graph
                    .add_task_after(
                        TaskBody::plain(DeleteSecurityGroupInterfaceTask::new(self.ctx.clone(), &sgi)),
                        TaskGuard::AllPredecessorsSucceeded,
                        &required,
                    )
                    .map_err(|e| TaskError::consistency(e.to_string()))?;
            }
        }

        if is_delete {
            graph.append_task_with_guard(
                TaskBody::plain(DeleteSecurityGroupTask::new(self.ctx.clone(), &sg)),
                TaskGuard::AllAncestorsSucceeded,
            );
        }
        Ok(graph)
    }
}

impl MetaTask for SecurityGroupCheckMetaTask {
    fn name(&self) -> String {
        format!("Checking Security Group '{}' members", self.sg.name)
    }

    fn objects(&self) -> BTreeSet<LockObjectReference> {
        BTreeSet::from([self.sg.clone()])
    }

    fn expand(&self) -> TaskFuture<'_, TaskGraph> {
        Box::pin(self.compute())
    }
}

pub struct DeleteSecurityGroupInterfaceTask {
    ctx: ConformanceContext,
    sgi: LockObjectReference,
}

impl DeleteSecurityGroupInterfaceTask {
    pub fn new(ctx: ConformanceContext, sgi: &SecurityGroupInterface) -> Self {
        Self {
            ctx,
            sgi: sgi.reference(),
        }
    }

    async fn run(&self) -> Result<(), TaskError> {
        self.ctx.inventory.delete_interface(self.sgi.id)?;
        tracing::info!(sgi = %self.sgi.name, "Security group interface deleted");
        Ok(())
    }
}

impl Task for DeleteSecurityGroupInterfaceTask {
    fn name(&self) -> String {
        format!("Delete Security Group Interface '{}'", self.sgi.name)
    }

    fn objects(&self) -> BTreeSet<LockObjectReference> {
        BTreeSet::from([self.sgi.clone()])
    }

    fn execute(&self) -> TaskFuture<'_, ()> {
        Box::pin(self.run())
    }
}

pub struct DeleteSecurityGroupTask {
    ctx: ConformanceContext,
    sg: LockObjectReference,
}

impl DeleteSecurityGroupTask {
    pub fn new(ctx: ConformanceContext, sg: &SecurityGroup) -> Self {
        Self {
            ctx,
            sg: sg.reference(),
        }
    }

    async fn run(&self) -> Result<(), TaskError> {
        self.ctx.inventory.delete_security_group(self.sg.id)?;
        tracing::info!(sg = %self.sg.name, "Security group deleted");
        Ok(())
    }
}

impl Task for DeleteSecurityGroupTask {
    fn name(&self) -> String {
        format!("Delete Security Group '{}'", self.sg.name)
    }

    fn objects(&self) -> BTreeSet<LockObjectReference> {
        BTreeSet::from([self.sg.clone()])
    }

    fn execute(&self) -> TaskFuture<'_, ()> {
        Box::pin(self.run())
    }
}
