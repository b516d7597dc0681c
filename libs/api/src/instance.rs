//! WorkloadInstance: the running workload unit.
//!
//! Instances are externally owned. This engine only reads the failure
//! phase and rewrites the first container's image on restore; no other
//! field is ever touched.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::meta::{Object, ObjectMeta};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadInstance {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: WorkloadInstanceSpec,
    #[serde(default)]
    pub status: WorkloadInstanceStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkloadInstanceSpec {
    /// Node the instance runs on; the capture call targets it.
    pub node_name: String,

    /// Containers in declaration order; the first is the primary one.
    #[serde(default)]
    pub containers: Vec<ContainerSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkloadInstanceStatus {
    #[serde(default)]
    pub phase: InstancePhase,
}

/// Observed instance phase; only `Failed` triggers a restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum InstancePhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl Default for InstancePhase {
    fn default() -> Self {
        Self::Pending
    }
}

impl InstancePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for InstancePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Object for WorkloadInstance {
    const KIND: &'static str = "WorkloadInstance";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl WorkloadInstance {
    /// The primary container, when the instance has any.
    pub fn primary_container(&self) -> Option<&ContainerSpec> {
        self.spec.containers.first()
    }
}
