//! Client capability for the SDN controller.

use futures_util::future::BoxFuture;
use job_core::TaskError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::DistributedApplianceInstance;

/// Error reported by an SDN controller call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("{0}")]
    Request(String),

    #[error("SDN controller unavailable: {0}")]
    Unavailable(String),
}

impl From<ControllerError> for TaskError {
    fn from(e: ControllerError) -> Self {
        TaskError::Controller(e.to_string())
    }
}

pub type ControllerFuture<'a, T> = BoxFuture<'a, Result<T, ControllerError>>;

/// An element known to the controller: a port or a port group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkElement {
    pub element_id: String,
    pub parent_id: Option<String>,
}

impl NetworkElement {
    pub fn new(element_id: impl Into<String>, parent_id: Option<String>) -> Self {
        Self {
            element_id: element_id.into(),
            parent_id,
        }
    }
}

/// Ingress and egress ports of an appliance instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectionPort {
    pub ingress_port_id: Option<String>,
    pub egress_port_id: Option<String>,
}

/// Redirection of a port group's traffic to an inspection port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectionHook {
    /// Assigned by the controller on install.
    pub hook_id: Option<String>,
    pub inspected_element_id: String,
    pub inspection_port: InspectionPort,
    pub tag: u64,
    pub order: u64,
}

/// Operations the reconciliation tasks need from an SDN controller.
///
/// Errors are reported as task failures; nothing is retried.
pub trait ControllerClient: Send + Sync + 'static {
    /// `None` when no hook with that id exists.
    fn get_inspection_hook(&self, hook_id: String) -> ControllerFuture<'_, Option<InspectionHook>>;

    /// Returns the new hook's id, if the controller reported one.
    fn install_inspection_hook(&self, hook: InspectionHook) -> ControllerFuture<'_, Option<String>>;

    fn update_inspection_hook(&self, hook: InspectionHook) -> ControllerFuture<'_, ()>;

    fn remove_inspection_hook(&self, hook_id: String) -> ControllerFuture<'_, ()>;

    /// Create a port group holding `ports`.
    fn register_network_element(
        &self,
        parent_id: String,
        ports: Vec<NetworkElement>,
    ) -> ControllerFuture<'_, Option<NetworkElement>>;

    /// Replace the ports of a port group. The controller may answer with a
    /// different element if it had to recreate the group.
    fn update_network_element(
        &self,
        group: NetworkElement,
        ports: Vec<NetworkElement>,
    ) -> ControllerFuture<'_, Option<NetworkElement>>;

    fn delete_network_element(&self, group: NetworkElement) -> ControllerFuture<'_, ()>;
}

impl From<&DistributedApplianceInstance> for InspectionPort {
    fn from(dai: &DistributedApplianceInstance) -> Self {
        Self {
            ingress_port_id: dai.ingress_port_id.clone(),
            egress_port_id: dai.egress_port_id.clone(),
        }
    }
}
