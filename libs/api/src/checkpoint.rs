//! Checkpoint: one captured artifact and its derived images.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::meta::{Object, ObjectMeta, ObjectReference};
use crate::selector::LabelSelector;

/// A captured artifact on its way to becoming a restorable image.
///
/// Created exclusively by the request loop; mutated exclusively by the
/// build loop. The phase never regresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: CheckpointSpec,
    #[serde(default)]
    pub status: CheckpointStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSpec {
    /// Artifact filename relative to the configured checkpoints directory.
    pub checkpoint_data_path: String,

    /// Unique capture identifier; also names the derived images.
    pub checkpoint_id: String,

    /// When the capture was taken.
    pub timestamp: DateTime<Utc>,

    /// Node the capture was taken on.
    pub node_name: String,

    /// The grand-parent Schedule, when schedule-driven.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_ref: Option<ObjectReference>,

    /// Copied from the parent Schedule, best effort.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,

    /// Copied from the parent Schedule, best effort.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointStatus {
    #[serde(default)]
    pub phase: CheckpointPhase,

    /// Locally committed image name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_image: Option<String>,

    /// Published image the restore loop rewrites instances to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_image: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

/// Checkpoint lifecycle: `Created -> Processing -> {ImageBuilt, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum CheckpointPhase {
    Created,
    Processing,
    ImageBuilt,
    Failed,
}

impl Default for CheckpointPhase {
    fn default() -> Self {
        Self::Created
    }
}

impl CheckpointPhase {
    /// Terminal phases gate all further processing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ImageBuilt | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Processing => "Processing",
            Self::ImageBuilt => "ImageBuilt",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for CheckpointPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Object for Checkpoint {
    const KIND: &'static str = "Checkpoint";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
