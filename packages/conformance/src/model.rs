//! Desired-state inventory the reconciliation tasks read and update.

use std::collections::BTreeSet;

use job_core::{LockObjectReference, ObjectType};
use serde::{Deserialize, Serialize};

/// A workload port protected through a security group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub id: u64,
    /// Identifier of the port in the SDN controller.
    pub element_id: String,
    /// Compute host the port's VM runs on, if any.
    pub host: Option<String>,
    /// Router/domain the port's network is attached to.
    pub domain_id: Option<String>,
}

impl Port {
    pub fn new(id: u64, element_id: impl Into<String>) -> Self {
        Self {
            id,
            element_id: element_id.into(),
            host: None,
            domain_id: None,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_domain(mut self, domain_id: impl Into<String>) -> Self {
        self.domain_id = Some(domain_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberKind {
    Vm,
    Network,
    Subnet,
}

/// A VM, network or subnet whose ports belong to a security group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupMember {
    pub id: u64,
    pub name: String,
    pub kind: MemberKind,
    pub ports: Vec<Port>,
    pub marked_for_deletion: bool,
}

impl SecurityGroupMember {
    pub fn new(id: u64, name: impl Into<String>, kind: MemberKind, ports: Vec<Port>) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            ports,
            marked_for_deletion: false,
        }
    }

    /// Router/domain of the first port attached to one.
    pub fn domain_id(&self) -> Option<&str> {
        self.ports.iter().find_map(|p| p.domain_id.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub id: u64,
    pub name: String,
    pub project_name: String,
    pub members: Vec<SecurityGroupMember>,
    /// Identifier of the group's port group in the SDN controller.
    pub network_element_id: Option<String>,
    /// Port element ids the port group was last registered or updated with.
    pub synced_ports: BTreeSet<String>,
    pub marked_for_deletion: bool,
}

impl SecurityGroup {
    pub fn new(id: u64, name: impl Into<String>, project_name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            project_name: project_name.into(),
            members: Vec::new(),
            network_element_id: None,
            synced_ports: BTreeSet::new(),
            marked_for_deletion: false,
        }
    }

    pub fn with_member(mut self, member: SecurityGroupMember) -> Self {
        self.members.push(member);
        self
    }

    /// Members that are not being removed.
    pub fn active_members(&self) -> impl Iterator<Item = &SecurityGroupMember> {
        self.members.iter().filter(|m| !m.marked_for_deletion)
    }

    /// Ports of every active member.
    pub fn protected_ports(&self) -> Vec<&Port> {
        self.active_members().flat_map(|m| m.ports.iter()).collect()
    }

    /// First port of the first active member, with its member.
    pub fn any_protected_port(&self) -> Option<(&SecurityGroupMember, &Port)> {
        self.active_members()
            .find_map(|m| m.ports.first().map(|port| (m, port)))
    }

    /// Domain shared by the protected ports, taken from the first that has one.
    pub fn domain_id(&self) -> Option<&str> {
        self.active_members().find_map(|m| m.domain_id())
    }

    pub fn reference(&self) -> LockObjectReference {
        LockObjectReference::new(self.id, ObjectType::SecurityGroup, &self.name)
    }
}

/// Binding of a security group to a virtual system's inspection policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupInterface {
    pub id: u64,
    pub name: String,
    pub security_group_id: Option<u64>,
    pub virtual_system_id: u64,
    pub tag: u64,
    pub order: u64,
    /// Identifier of the inspection hook in the SDN controller.
    pub network_element_id: Option<String>,
    pub marked_for_deletion: bool,
}

impl SecurityGroupInterface {
    pub fn new(id: u64, name: impl Into<String>, virtual_system_id: u64) -> Self {
        Self {
            id,
            name: name.into(),
            security_group_id: None,
            virtual_system_id,
            tag: 0,
            order: 0,
            network_element_id: None,
            marked_for_deletion: false,
        }
    }

    pub fn with_security_group(mut self, security_group_id: u64) -> Self {
        self.security_group_id = Some(security_group_id);
        self
    }

    pub fn reference(&self) -> LockObjectReference {
        LockObjectReference::new(self.id, ObjectType::SecurityGroupInterface, &self.name)
    }
}

/// A deployed security appliance instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributedApplianceInstance {
    pub id: u64,
    pub name: String,
    pub virtual_system_id: u64,
    pub host: Option<String>,
    pub domain_id: Option<String>,
    pub ingress_port_id: Option<String>,
    pub egress_port_id: Option<String>,
    /// Ids of the ports whose traffic this instance inspects.
    pub protected_ports: BTreeSet<u64>,
    pub deployed: bool,
}

impl DistributedApplianceInstance {
    pub fn new(id: u64, name: impl Into<String>, virtual_system_id: u64) -> Self {
        Self {
            id,
            name: name.into(),
            virtual_system_id,
            host: None,
            domain_id: None,
            ingress_port_id: None,
            egress_port_id: None,
            protected_ports: BTreeSet::new(),
            deployed: true,
        }
    }

    pub fn with_location(mut self, host: impl Into<String>, domain_id: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self.domain_id = Some(domain_id.into());
        self
    }

    pub fn with_inspection_ports(mut self, ingress: impl Into<String>, egress: impl Into<String>) -> Self {
        self.ingress_port_id = Some(ingress.into());
        self.egress_port_id = Some(egress.into());
        self
    }

    pub fn reference(&self) -> LockObjectReference {
        LockObjectReference::new(
            self.id,
            ObjectType::DistributedApplianceInstance,
            &self.name,
        )
    }
}
