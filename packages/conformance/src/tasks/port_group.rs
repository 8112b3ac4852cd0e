use std::collections::BTreeSet;

use job_core::{LockObjectReference, MetaTask, Task, TaskBody, TaskError, TaskFuture, TaskGraph};

use super::ConformanceContext;
use crate::controller::NetworkElement;
use crate::model::SecurityGroup;

/// Element ids of the group's protected ports.
fn port_ids(sg: &SecurityGroup) -> BTreeSet<String> {
    sg.protected_ports()
        .iter()
        .map(|p| p.element_id.clone())
        .collect()
}

fn port_elements(sg: &SecurityGroup, domain_id: &str) -> Vec<NetworkElement> {
    sg.protected_ports()
        .iter()
        .map(|p| NetworkElement::new(&p.element_id, Some(domain_id.to_string())))
        .collect()
}

/// Diffs a security group's port group against its protected ports.
pub struct PortGroupCheckMetaTask {
    ctx: ConformanceContext,
    sg: LockObjectReference,
    is_delete: bool,
}

impl PortGroupCheckMetaTask {
    pub fn new(ctx: ConformanceContext, sg: &SecurityGroup, is_delete: bool) -> Self {
        Self {
            ctx,
            sg: sg.reference(),
            is_delete,
        }
    }

    async fn compute(&self) -> Result<TaskGraph, TaskError> {
        let sg = self.ctx.inventory.security_group(self.sg.id)?;
        let mut graph = TaskGraph::new();

        if self.is_delete {
            if sg.network_element_id.is_some() {
                graph.append_task(TaskBody::plain(DeletePortGroupTask::new(self.ctx.clone(), &sg)));
            }
            return Ok(graph);
        }

        let ports = port_ids(&sg);
        match &sg.network_element_id {
            None if !ports.is_empty() => {
                graph.append_task(TaskBody::plain(CreatePortGroupTask::new(self.ctx.clone(), &sg)));
            }
            Some(_) if ports != sg.synced_ports => {
                graph.append_task(TaskBody::plain(UpdatePortGroupTask::new(self.ctx.clone(), &sg)));
            }
            _ => {}
        }
        Ok(graph)
    }
}

impl MetaTask for PortGroupCheckMetaTask {
    fn name(&self) -> String {
        format!("Check Port Group for security group: {}", self.sg.name)
    }

    fn objects(&self) -> BTreeSet<LockObjectReference> {
        BTreeSet::from([self.sg.clone()])
    }

    fn expand(&self) -> TaskFuture<'_, TaskGraph> {
        Box::pin(self.compute())
    }
}

/// Registers the group's ports as a port group in the controller.
pub struct CreatePortGroupTask {
    ctx: ConformanceContext,
    sg: LockObjectReference,
}

impl CreatePortGroupTask {
    pub fn new(ctx: ConformanceContext, sg: &SecurityGroup) -> Self {
        Self {
            ctx,
            sg: sg.reference(),
        }
    }

    async fn run(&self) -> Result<(), TaskError> {
        let inventory = &self.ctx.inventory;
        let mut sg = inventory.security_group(self.sg.id)?;
        let Some(domain_id) = sg.domain_id().map(str::to_string) else {
            return Err(TaskError::validation(format!(
                "A domain was not found for the project: '{}' and Security Group: '{}'",
                sg.project_name, sg.name
            )));
        };

        let ports = port_elements(&sg, &domain_id);
        let Some(group) = self
            .ctx
            .controller
            .register_network_element(domain_id, ports)
            .await?
        else {
            return Err(TaskError::Controller(
                "RegisterNetworkElement failed to return PortGroup".to_string(),
            ));
        };

        tracing::info!(sg = %sg.name, port_group = %group.element_id, "Port group registered");
        sg.synced_ports = port_ids(&sg);
        sg.network_element_id = Some(group.element_id);
        inventory.save_security_group(sg);
        Ok(())
    }
}

impl Task for CreatePortGroupTask {
    fn name(&self) -> String {
        format!("Create Port Group for security group: {}", self.sg.name)
    }

    fn objects(&self) -> BTreeSet<LockObjectReference> {
        BTreeSet::from([self.sg.clone()])
    }

    fn execute(&self) -> TaskFuture<'_, ()> {
        Box::pin(self.run())
    }
}

/// Replaces the ports of the group's port group.
pub struct UpdatePortGroupTask {
    ctx: ConformanceContext,
    sg: LockObjectReference,
}

impl UpdatePortGroupTask {
    pub fn new(ctx: ConformanceContext, sg: &SecurityGroup) -> Self {
        Self {
            ctx,
            sg: sg.reference(),
        }
    }

    async fn run(&self) -> Result<(), TaskError> {
        let inventory = &self.ctx.inventory;
        let mut sg = inventory.security_group(self.sg.id)?;
        let Some(group_id) = sg.network_element_id.clone() else {
            return Err(TaskError::validation(format!(
                "The security group {} has no port group to update.",
                sg.name
            )));
        };
        let Some(domain_id) = sg.domain_id().map(str::to_string) else {
            return Err(TaskError::validation(format!(
                "Failed to retrieve domainId for given project: '{}' and Security Group: '{}'",
                sg.project_name, sg.name
            )));
        };

        let ports = port_elements(&sg, &domain_id);
        let group = NetworkElement::new(&group_id, Some(domain_id));
        let Some(updated) = self
            .ctx
            .controller
            .update_network_element(group, ports)
            .await?
        else {
            return Err(TaskError::Controller(format!(
                "Failed to update Port Group : '{}'",
                group_id
            )));
        };

        if updated.element_id != group_id {
            // the port group was deleted outside of this system and recreated
            tracing::info!(
                sg = %sg.name,
                old = %group_id,
                new = %updated.element_id,
                "Port group recreated by the controller"
            );
            sg.network_element_id = Some(updated.element_id);
        }
        sg.synced_ports = port_ids(&sg);
        inventory.save_security_group(sg);
        Ok(())
    }
}

impl Task for UpdatePortGroupTask {
    fn name(&self) -> String {
        format!("Update Port Group for security group: {}", self.sg.name)
    }

    fn objects(&self) -> BTreeSet<LockObjectReference> {
        BTreeSet::from([self.sg.clone()])
    }

    fn execute(&self) -> TaskFuture<'_, ()> {
        Box::pin(self.run())
    }
}

pub struct DeletePortGroupTask {
    ctx: ConformanceContext,
    sg: LockObjectReference,
}

impl DeletePortGroupTask {
    pub fn new(ctx: ConformanceContext, sg: &SecurityGroup) -> Self {
        Self {
            ctx,
            sg: sg.reference(),
        }
    }

    async fn run(&self) -> Result<(), TaskError> {
        let inventory = &self.ctx.inventory;
        let mut sg = inventory.security_group(self.sg.id)?;
        let Some(group_id) = sg.network_element_id.take() else {
            return Ok(());
        };

        self.ctx
            .controller
            .delete_network_element(NetworkElement::new(group_id, None))
            .await?;
        sg.synced_ports.clear();
        inventory.save_security_group(sg);
        Ok(())
    }
}

impl Task for DeletePortGroupTask {
    fn name(&self) -> String {
        format!("Delete Port Group for security group: {}", self.sg.name)
    }

    fn objects(&self) -> BTreeSet<LockObjectReference> {
        BTreeSet::from([self.sg.clone()])
    }

    fn execute(&self) -> TaskFuture<'_, ()> {
        Box::pin(self.run())
    }
}
