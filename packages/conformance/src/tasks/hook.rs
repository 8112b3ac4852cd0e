use std::collections::BTreeSet;

use job_core::{LockObjectReference, MetaTask, Task, TaskBody, TaskError, TaskFuture, TaskGraph};

use super::ConformanceContext;
use super::dai::{AllocateDaiTask, DeallocateDaiTask};
use crate::controller::{InspectionHook, InspectionPort};
use crate::model::{
    DistributedApplianceInstance, Port, SecurityGroup, SecurityGroupInterface, SecurityGroupMember,
};

/// Diffs an interface's inspection hook against the controller.
///
/// | hook | assigned DAI | removing | work                                  |
/// |------|--------------|----------|---------------------------------------|
/// | no   | any          | no       | allocate a DAI, create the hook       |
/// | yes  | none         | no       | consistency error                     |
/// | yes  | yes          | no       | update the hook if its ports differ   |
/// | any  | any          | yes      | remove the hook, deallocate the DAI   |
pub struct CheckPortGroupHookMetaTask {
    ctx: ConformanceContext,
    sgi: LockObjectReference,
    is_delete: bool,
}

impl CheckPortGroupHookMetaTask {
    /// `is_delete` removes the hook even if the interface itself is kept,
    /// as when its whole security group is being deleted.
    pub fn new(ctx: ConformanceContext, sgi: &SecurityGroupInterface, is_delete: bool) -> Self {
        Self {
            ctx,
            sgi: sgi.reference(),
            is_delete,
        }
    }

    async fn compute(&self) -> Result<TaskGraph, TaskError> {
        let inventory = &self.ctx.inventory;
        let sgi = inventory.interface(self.sgi.id)?;
        let sg = self.ctx.security_group_of(&sgi)?;

        let protected = sg.any_protected_port();
        let assigned = protected.and_then(|(_, port)| {
            inventory.find_by_virtual_system_and_port(sgi.virtual_system_id, port.id)
        });
        if assigned.is_none() {
            tracing::debug!(sgi = %sgi.name, "No assigned DAI found for the protected port");
        }

        let existing = match &sgi.network_element_id {
            Some(hook_id) => {
                let hook = self.ctx.controller.get_inspection_hook(hook_id.clone()).await?;
                if hook.is_none() {
                    tracing::info!(hook_id = %hook_id, "Inspection hook not found in the controller");
                }
                hook
            }
            None => None,
        };

        let mut graph = TaskGraph::new();
        if !sgi.marked_for_deletion && !self.is_delete {
            match (existing, assigned) {
                (None, assigned) => {
                    let Some((member, port)) = protected else {
                        tracing::info!(sgi = %sgi.name, "Security group has no protected ports");
                        return Ok(graph);
                    };
                    let dai = match assigned {
                        Some(dai) => dai,
                        None => self.deployed_instance(&sg, &sgi, member, port)?,
                    };
                    graph.append_task(TaskBody::plain(AllocateDaiTask::new(
                        self.ctx.clone(),
                        &sgi,
                        &dai,
                    )));
                    graph.append_task(TaskBody::plain(CreatePortGroupHookTask::new(
                        self.ctx.clone(),
                        &sgi,
                        &dai,
                    )));
                }
                (Some(_), None) => {
                    return Err(TaskError::consistency(format!(
                        "An inspection hook was found in the SDN controller but a DAI was not found assigned to the SGI {}.",
                        sgi.name
                    )));
                }
                (Some(hook), Some(dai)) => {
                    if hook.inspection_port != InspectionPort::from(&dai) {
                        graph.append_task(TaskBody::plain(UpdatePortGroupHookTask::new(
                            self.ctx.clone(),
                            &sgi,
                            &dai,
                        )));
                    }
                }
            }
        } else {
            if existing.is_some() {
                graph.append_task(TaskBody::plain(RemovePortGroupHookTask::new(
                    self.ctx.clone(),
                    &sgi,
                )));
            }
            if let Some(dai) = assigned {
                graph.append_task(TaskBody::plain(DeallocateDaiTask::new(
                    self.ctx.clone(),
                    &sgi,
                    &dai,
                )));
            }
        }
        Ok(graph)
    }

    /// A deployed instance of the interface's virtual system in the domain of
    /// the member's networks, on the port's host when it has one.
    fn deployed_instance(
        &self,
        sg: &SecurityGroup,
        sgi: &SecurityGroupInterface,
        member: &SecurityGroupMember,
        port: &Port,
    ) -> Result<DistributedApplianceInstance, TaskError> {
        let Some(domain_id) = member.domain_id() else {
            return Err(TaskError::validation(format!(
                "No router/domain was found attached to any of the networks of the member {} of the security group {}.",
                member.name, sg.name
            )));
        };

        self.ctx
            .inventory
            .instances_of(sgi.virtual_system_id)
            .into_iter()
            .filter(|dai| dai.deployed && dai.domain_id.as_deref() == Some(domain_id))
            .find(|dai| port.host.is_none() || dai.host == port.host)
            .ok_or_else(|| {
                TaskError::validation(format!(
                    "No deployed DAI was found in the domain {} for the security group {}.",
                    domain_id, sg.name
                ))
            })
    }
}

impl MetaTask for CheckPortGroupHookMetaTask {
    fn name(&self) -> String {
        format!(
            "Check the inspection hook for the security group interface {}.",
            self.sgi.name
        )
    }

    fn objects(&self) -> BTreeSet<LockObjectReference> {
        BTreeSet::from([self.sgi.clone()])
    }

    fn expand(&self) -> TaskFuture<'_, TaskGraph> {
        Box::pin(self.compute())
    }
}

/// Port group the hook redirects, read from the interface's security group.
fn inspected_element(sg: &SecurityGroup, sgi: &SecurityGroupInterface) -> Result<String, TaskError> {
    sg.network_element_id.clone().ok_or_else(|| {
        TaskError::validation(format!(
            "The security group {} of the security group interface {} has no port group in the SDN controller.",
            sg.name, sgi.name
        ))
    })
}

pub struct CreatePortGroupHookTask {
    ctx: ConformanceContext,
    sgi: LockObjectReference,
    dai: LockObjectReference,
}

impl CreatePortGroupHookTask {
    pub fn new(
        ctx: ConformanceContext,
        sgi: &SecurityGroupInterface,
        dai: &DistributedApplianceInstance,
    ) -> Self {
        Self {
            ctx,
            sgi: sgi.reference(),
            dai: dai.reference(),
        }
    }

    async fn run(&self) -> Result<(), TaskError> {
        let inventory = &self.ctx.inventory;
        let mut sgi = inventory.interface(self.sgi.id)?;
        let sg = self.ctx.security_group_of(&sgi)?;
        let inspected_element_id = inspected_element(&sg, &sgi)?;
        let dai = inventory.instance(self.dai.id)?;

        let hook = InspectionHook {
            hook_id: None,
            inspected_element_id,
            inspection_port: InspectionPort::from(&dai),
            tag: sgi.tag,
            order: sgi.order,
        };
        let Some(hook_id) = self.ctx.controller.install_inspection_hook(hook).await? else {
            return Err(TaskError::Controller(format!(
                "The creation of the inspection hook for the security group interface {} succeeded but the returned identifier was null.",
                sgi.name
            )));
        };

        tracing::info!(sgi = %sgi.name, hook_id = %hook_id, "Inspection hook created");
        sgi.network_element_id = Some(hook_id);
        inventory.save_interface(sgi);
        Ok(())
    }
}

impl Task for CreatePortGroupHookTask {
    fn name(&self) -> String {
        format!(
            "Create Inspection Hook for SGI '{}' and DAI '{}'",
            self.sgi.name, self.dai.name
        )
    }

    fn objects(&self) -> BTreeSet<LockObjectReference> {
        BTreeSet::from([self.sgi.clone(), self.dai.clone()])
    }

    fn execute(&self) -> TaskFuture<'_, ()> {
        Box::pin(self.run())
    }
}

/// Points an existing hook at the assigned instance's inspection ports.
pub struct UpdatePortGroupHookTask {
    ctx: ConformanceContext,
    sgi: LockObjectReference,
    dai: LockObjectReference,
}

impl UpdatePortGroupHookTask {
    pub fn new(
        ctx: ConformanceContext,
        sgi: &SecurityGroupInterface,
        dai: &DistributedApplianceInstance,
    ) -> Self {
        Self {
            ctx,
            sgi: sgi.reference(),
            dai: dai.reference(),
        }
    }

    async fn run(&self) -> Result<(), TaskError> {
        let inventory = &self.ctx.inventory;
        let sgi = inventory.interface(self.sgi.id)?;
        let Some(hook_id) = sgi.network_element_id.clone() else {
            return Err(TaskError::validation(format!(
                "The security group interface {} has no inspection hook to update.",
                sgi.name
            )));
        };
        let sg = self.ctx.security_group_of(&sgi)?;
        let inspected_element_id = inspected_element(&sg, &sgi)?;
        let dai = inventory.instance(self.dai.id)?;

        let hook = InspectionHook {
            hook_id: Some(hook_id),
            inspected_element_id,
            inspection_port: InspectionPort::from(&dai),
            tag: sgi.tag,
            order: sgi.order,
        };
        self.ctx.controller.update_inspection_hook(hook).await?;
        Ok(())
    }
}

impl Task for UpdatePortGroupHookTask {
    fn name(&self) -> String {
        format!(
            "Update Inspection Hook for SGI '{}' and DAI '{}'",
            self.sgi.name, self.dai.name
        )
    }

    fn objects(&self) -> BTreeSet<LockObjectReference> {
        BTreeSet::from([self.sgi.clone(), self.dai.clone()])
    }

    fn execute(&self) -> TaskFuture<'_, ()> {
        Box::pin(self.run())
    }
}

pub struct RemovePortGroupHookTask {
    ctx: ConformanceContext,
    sgi: LockObjectReference,
}

impl RemovePortGroupHookTask {
    pub fn new(ctx: ConformanceContext, sgi: &SecurityGroupInterface) -> Self {
        Self {
            ctx,
            sgi: sgi.reference(),
        }
    }

    async fn run(&self) -> Result<(), TaskError> {
        let inventory = &self.ctx.inventory;
        let mut sgi = inventory.interface(self.sgi.id)?;
        let Some(hook_id) = sgi.network_element_id.take() else {
            tracing::debug!(sgi = %sgi.name, "No inspection hook to remove");
            return Ok(());
        };

        self.ctx.controller.remove_inspection_hook(hook_id).await?;
        inventory.save_interface(sgi);
        Ok(())
    }
}

impl Task for RemovePortGroupHookTask {
    fn name(&self) -> String {
        format!("Remove Inspection Hook for SGI '{}'", self.sgi.name)
    }

    fn objects(&self) -> BTreeSet<LockObjectReference> {
        BTreeSet::from([self.sgi.clone()])
    }

    fn execute(&self) -> TaskFuture<'_, ()> {
        Box::pin(self.run())
    }
}
