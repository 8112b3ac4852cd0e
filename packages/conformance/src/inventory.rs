//! Store of the desired state the tasks reconcile against.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use job_core::TaskError;
use thiserror::Error;

use crate::model::{DistributedApplianceInstance, SecurityGroup, SecurityGroupInterface};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InventoryError {
    #[error("Security Group {0} was not found")]
    SecurityGroupNotFound(u64),

    #[error("Security Group Interface {0} was not found")]
    InterfaceNotFound(u64),

    #[error("Distributed Appliance Instance {0} was not found")]
    InstanceNotFound(u64),
}

impl From<InventoryError> for TaskError {
    fn from(e: InventoryError) -> Self {
        TaskError::Store(e.to_string())
    }
}

/// Read and write access to security groups, their interfaces and the
/// appliance instances protecting them.
pub trait Inventory: Send + Sync + 'static {
    fn security_group(&self, id: u64) -> Result<SecurityGroup, InventoryError>;
    fn save_security_group(&self, sg: SecurityGroup);
    fn delete_security_group(&self, id: u64) -> Result<(), InventoryError>;

    fn interface(&self, id: u64) -> Result<SecurityGroupInterface, InventoryError>;
    /// Interfaces bound to the security group, by id.
    fn interfaces_of(&self, security_group_id: u64) -> Vec<SecurityGroupInterface>;
    fn save_interface(&self, sgi: SecurityGroupInterface);
    fn delete_interface(&self, id: u64) -> Result<(), InventoryError>;

    fn instance(&self, id: u64) -> Result<DistributedApplianceInstance, InventoryError>;
    fn save_instance(&self, dai: DistributedApplianceInstance);
    /// Instances of the virtual system, by id.
    fn instances_of(&self, virtual_system_id: u64) -> Vec<DistributedApplianceInstance>;

    /// Instance of the virtual system already protecting the port.
    fn find_by_virtual_system_and_port(
        &self,
        virtual_system_id: u64,
        port_id: u64,
    ) -> Option<DistributedApplianceInstance> {
        self.instances_of(virtual_system_id)
            .into_iter()
            .find(|dai| dai.protected_ports.contains(&port_id))
    }
}

#[derive(Default)]
struct Tables {
    security_groups: BTreeMap<u64, SecurityGroup>,
    interfaces: BTreeMap<u64, SecurityGroupInterface>,
    instances: BTreeMap<u64, DistributedApplianceInstance>,
}

/// In-memory [`Inventory`].
#[derive(Default)]
pub struct MemoryInventory {
    tables: Mutex<Tables>,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Inventory for MemoryInventory {
    fn security_group(&self, id: u64) -> Result<SecurityGroup, InventoryError> {
        self.tables()
            .security_groups
            .get(&id)
            .cloned()
            .ok_or(InventoryError::SecurityGroupNotFound(id))
    }

    fn save_security_group(&self, sg: SecurityGroup) {
        self.tables().security_groups.insert(sg.id, sg);
    }

    fn delete_security_group(&self, id: u64) -> Result<(), InventoryError> {
        self.tables()
            .security_groups
            .remove(&id)
            .map(|_| ())
            .ok_or(InventoryError::SecurityGroupNotFound(id))
    }

    fn interface(&self, id: u64) -> Result<SecurityGroupInterface, InventoryError> {
        self.tables()
            .interfaces
            .get(&id)
            .cloned()
            .ok_or(InventoryError::InterfaceNotFound(id))
    }

    fn interfaces_of(&self, security_group_id: u64) -> Vec<SecurityGroupInterface> {
        self.tables()
            .interfaces
            .values()
            .filter(|sgi| sgi.security_group_id == Some(security_group_id))
            .cloned()
            .collect()
    }

    fn save_interface(&self, sgi: SecurityGroupInterface) {
        self.tables().interfaces.insert(sgi.id, sgi);
    }

    fn delete_interface(&self, id: u64) -> Result<(), InventoryError> {
        self.tables()
            .interfaces
            .remove(&id)
            .map(|_| ())
            .ok_or(InventoryError::InterfaceNotFound(id))
    }

    fn instance(&self, id: u64) -> Result<DistributedApplianceInstance, InventoryError> {
        self.tables()
            .instances
            .get(&id)
            .cloned()
            .ok_or(InventoryError::InstanceNotFound(id))
    }

    fn save_instance(&self, dai: DistributedApplianceInstance) {
        self.tables().instances.insert(dai.id, dai);
    }

    fn instances_of(&self, virtual_system_id: u64) -> Vec<DistributedApplianceInstance> {
        self.tables()
            .instances
            .values()
            .filter(|dai| dai.virtual_system_id == virtual_system_id)
            .cloned()
            .collect()
    }
}
