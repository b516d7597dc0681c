//! Schedule: a recurring checkpoint policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::meta::{Object, ObjectMeta};
use crate::selector::LabelSelector;

/// Checkpoint whichever instance matches `selector`, on `cron_expression`.
///
/// At most one active timer exists per Schedule identity at any time, and
/// that timer's expression always equals the current `cron_expression`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: ScheduleSpec,
    #[serde(default)]
    pub status: ScheduleStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleSpec {
    /// Selects the instances eligible for checkpointing.
    pub selector: LabelSelector,

    /// Standard cron expression; an optional leading seconds field is
    /// accepted.
    pub cron_expression: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleStatus {
    /// When the schedule last created a CheckpointRequest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_time: Option<DateTime<Utc>>,
}

impl Object for Schedule {
    const KIND: &'static str = "Schedule";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Schedule {
    pub fn new(name: &str, namespace: &str, selector: LabelSelector, cron_expression: &str) -> Self {
        Self {
            metadata: ObjectMeta::named(name, namespace),
            spec: ScheduleSpec {
                selector,
                cron_expression: cron_expression.to_string(),
            },
            status: ScheduleStatus::default(),
        }
    }
}
