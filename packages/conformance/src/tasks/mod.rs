//! Reconciliation tasks for security groups.
//!
//! Meta tasks read the desired state from the [`Inventory`], ask the
//! controller for the actual state and return a graph holding only the
//! concrete tasks needed to close the gap. Running a meta task again once
//! that graph has passed yields an empty graph.

mod dai;
mod hook;
mod port_group;
mod security_group;

use std::sync::Arc;

use job_core::TaskError;

use crate::controller::ControllerClient;
use crate::inventory::Inventory;
use crate::model::{SecurityGroup, SecurityGroupInterface};

pub use dai::{AllocateDaiTask, DeallocateDaiTask};
pub use hook::{
    CheckPortGroupHookMetaTask, CreatePortGroupHookTask, RemovePortGroupHookTask,
    UpdatePortGroupHookTask,
};
pub use port_group::{CreatePortGroupTask, DeletePortGroupTask, PortGroupCheckMetaTask, UpdatePortGroupTask};
pub use security_group::{
    DeleteSecurityGroupInterfaceTask, DeleteSecurityGroupTask, SecurityGroupCheckMetaTask,
};

/// Collaborators shared by every reconciliation task.
#[derive(Clone)]
pub struct ConformanceContext {
    pub inventory: Arc<dyn Inventory>,
    pub controller: Arc<dyn ControllerClient>,
}

impl ConformanceContext {
    pub fn new(inventory: Arc<dyn Inventory>, controller: Arc<dyn ControllerClient>) -> Self {
        Self {
            inventory,
            controller,
        }
    }

    /// Security group the interface is bound to.
    fn security_group_of(&self, sgi: &SecurityGroupInterface) -> Result<SecurityGroup, TaskError> {
        let Some(id) = sgi.security_group_id else {
            return Err(TaskError::validation(format!(
                "The security group interface {} is not bound to a security group.",
                sgi.name
            )));
        };
        Ok(self.inventory.security_group(id)?)
    }
}
