//! Ready-to-submit reconciliation jobs.

use std::collections::BTreeSet;

use engine::JobRequest;
use job_core::{TaskBody, TaskGraph};

use crate::inventory::InventoryError;
use crate::model::SecurityGroupInterface;
use crate::tasks::{ConformanceContext, SecurityGroupCheckMetaTask};

/// Job reconciling a security group, or deleting it when it is marked for
/// deletion. The job locks the group and every interface bound to it.
pub fn sync_security_group_job(
    ctx: &ConformanceContext,
    security_group_id: u64,
    supports_port_group: bool,
) -> Result<JobRequest, InventoryError> {
    let sg = ctx.inventory.security_group(security_group_id)?;

    let mut objects = BTreeSet::from([sg.reference()]);
    objects.extend(
        ctx.inventory
            .interfaces_of(sg.id)
            .iter()
            .map(SecurityGroupInterface::reference),
    );

    let mut graph = TaskGraph::new();
    graph.add_task(TaskBody::meta(SecurityGroupCheckMetaTask::new(
        ctx.clone(),
        &sg,
        supports_port_group,
    )));

    let action = if sg.marked_for_deletion { "Delete" } else { "Sync" };
    Ok(JobRequest::new(format!("{} Security Group '{}'", action, sg.name), graph).with_objects(objects))
}
