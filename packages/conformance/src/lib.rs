//! Security group reconciliation on top of the job engine.
//!
//! - [`ControllerClient`] - What the tasks need from an SDN controller
//! - [`Inventory`] - Desired state of security groups, interfaces and DAIs
//! - [`tasks`] - Meta tasks diffing desired against actual state, and the
//!   concrete tasks they emit
//! - [`sync_security_group_job`] - Builds the job for one security group

mod controller;
mod inventory;
mod jobs;
mod model;
pub mod tasks;

pub use controller::{
    ControllerClient, ControllerError, ControllerFuture, InspectionHook, InspectionPort,
    NetworkElement,
};
pub use inventory::{Inventory, InventoryError, MemoryInventory};
pub use jobs::sync_security_group_job;
pub use model::{
    DistributedApplianceInstance, MemberKind, Port, SecurityGroup, SecurityGroupInterface,
    SecurityGroupMember,
};
pub use tasks::ConformanceContext;
