use std::collections::BTreeSet;

use job_core::{LockObjectReference, Task, TaskError, TaskFuture};

use super::ConformanceContext;
use crate::model::{DistributedApplianceInstance, SecurityGroupInterface};

/// Makes an appliance instance protect every port of an interface's group.
pub struct AllocateDaiTask {
    ctx: ConformanceContext,
    sgi: LockObjectReference,
    dai: LockObjectReference,
}

impl AllocateDaiTask {
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
        let Some(sg_id) = sgi.security_group_id else {
            return Ok(());
        };
        let sg = inventory.security_group(sg_id)?;
        let ports: Vec<u64> = sg.protected_ports().iter().map(|p| p.id).collect();
        if ports.is_empty() {
            return Ok(());
        }

        let mut dai = inventory.instance(self.dai.id)?;
        dai.protected_ports.extend(ports.iter().copied());
        tracing::debug!(dai = %dai.name, ports = ports.len(), "Ports allocated to DAI");
        inventory.save_instance(dai);
        Ok(())
    }
}

impl Task for AllocateDaiTask {
    fn name(&self) -> String {
        format!(
            "Allocate DAI '{}' to the members of SGI '{}'",
            self.dai.name, self.sgi.name
        )
    }

    fn objects(&self) -> BTreeSet<LockObjectReference> {
        BTreeSet::from([self.sgi.clone(), self.dai.clone()])
    }

    fn execute(&self) -> TaskFuture<'_, ()> {
        Box::pin(self.run())
    }
}

/// Releases an appliance instance from the ports of an interface's group.
///
/// Ports protected for other groups stay assigned.
pub struct DeallocateDaiTask {
    ctx: ConformanceContext,
    sgi: LockObjectReference,
    dai: LockObjectReference,
}

impl DeallocateDaiTask {
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
        let Some(sg_id) = sgi.security_group_id else {
            return Ok(());
        };
        let sg = inventory.security_group(sg_id)?;

        let mut dai = inventory.instance(self.dai.id)?;
        // members being removed still hold their allocation
        for port in sg.members.iter().flat_map(|m| m.ports.iter()) {
            dai.protected_ports.remove(&port.id);
        }
        inventory.save_instance(dai);
        Ok(())
    }
}

impl Task for DeallocateDaiTask {
    fn name(&self) -> String {
        format!(
            "Deallocate DAI '{}' from the members of SGI '{}'",
            self.dai.name, self.sgi.name
        )
    }

    fn objects(&self) -> BTreeSet<LockObjectReference> {
        BTreeSet::from([self.sgi.clone(), self.dai.clone()])
    }

    fn execute(&self) -> TaskFuture<'_, ()> {
        Box::pin(self.run())
    }
}
