//! CheckpointRequest: one attempt to checkpoint one workload instance.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::meta::{Object, ObjectKey, ObjectMeta, ObjectReference};

/// Timeout applied when a request does not set one.
pub const DEFAULT_TIMEOUT_SECONDS: i64 = 300;

/// A request to capture one container of one instance.
///
/// Created by a schedule tick or by an external caller; owns at most one
/// Checkpoint. The phase never regresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRequest {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: CheckpointRequestSpec,
    #[serde(default)]
    pub status: CheckpointRequestStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRequestSpec {
    /// The instance to checkpoint.
    pub instance_ref: ObjectKey,

    /// The container within that instance.
    pub container_name: String,

    /// The parent Schedule, when schedule-driven.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_ref: Option<ObjectReference>,

    /// How long the request may stay `InProgress` before it is failed.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: i64,
}

fn default_timeout_seconds() -> i64 {
    DEFAULT_TIMEOUT_SECONDS
}

impl CheckpointRequestSpec {
    pub fn timeout(&self) -> Duration {
        Duration::seconds(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointRequestStatus {
    #[serde(default)]
    pub phase: RequestPhase,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,

    /// The Checkpoint this request produced, once completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_ref: Option<ObjectReference>,

    /// Human-readable status or error message.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Request lifecycle: `Pending -> InProgress -> {Completed, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum RequestPhase {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl Default for RequestPhase {
    fn default() -> Self {
        Self::Pending
    }
}

impl RequestPhase {
    /// Terminal phases gate all further processing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::InProgress => "InProgress",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Object for CheckpointRequest {
    const KIND: &'static str = "CheckpointRequest";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
