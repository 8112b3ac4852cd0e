//! Entity references used for job locking and UI cross-linking.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Kind of entity a [`LockObjectReference`] points to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    VirtualizationConnector,
    ApplianceManagerConnector,
    DistributedAppliance,
    VirtualSystem,
    DeploymentSpec,
    DistributedApplianceInstance,
    SecurityGroup,
    SecurityGroupInterface,
    SslConfiguration,
    Job,
    Email,
    Network,
    Archive,
    Alert,
}

impl ObjectType {
    /// Name shown to operators.
    pub fn display_name(&self) -> &'static str {
        match self {
            ObjectType::VirtualizationConnector => "Virtualization Connector",
            ObjectType::ApplianceManagerConnector => "Manager Connector",
            ObjectType::DistributedAppliance => "Distributed Appliance",
            ObjectType::VirtualSystem => "Virtual System",
            ObjectType::DeploymentSpec => "Deployment Specification",
            ObjectType::DistributedApplianceInstance => "Distributed Appliance Instance",
            ObjectType::SecurityGroup => "Security Group",
            ObjectType::SecurityGroupInterface => "Security Group Interface",
            ObjectType::SslConfiguration => "SSL Configuration",
            ObjectType::Job => "Job",
            ObjectType::Email => "Email",
            ObjectType::Network => "Network",
            ObjectType::Archive => "Archive",
            ObjectType::Alert => "Alert",
        }
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Reference to a domain entity.
///
/// Two references are equal when they point to the same entity, regardless
/// of the display name they carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockObjectReference {
    pub id: u64,
    pub object_type: ObjectType,
    pub name: String,
}

impl LockObjectReference {
    pub fn new(id: u64, object_type: ObjectType, name: impl Into<String>) -> Self {
        Self {
            id,
            object_type,
            name: name.into(),
        }
    }
}

impl PartialEq for LockObjectReference {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.object_type == other.object_type
    }
}

impl Eq for LockObjectReference {}

impl Hash for LockObjectReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.object_type.hash(state);
        self.id.hash(state);
    }
}

impl PartialOrd for LockObjectReference {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LockObjectReference {
    fn cmp(&self, other: &Self) -> Ordering {
        self.object_type
            .cmp(&other.object_type)
            .then(self.id.cmp(&other.id))
    }
}

impl std::fmt::Display for LockObjectReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} '{}' ({})", self.object_type, self.name, self.id)
    }
}
