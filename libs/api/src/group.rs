//! WorkloadGroup: an externally owned group of instances.
//!
//! A group opts into scheduled checkpointing by carrying the
//! [`crate::labels::SCHEDULE_ANNOTATION`] annotation; the group loop
//! materializes a Schedule from it.

use serde::{Deserialize, Serialize};

use crate::meta::{Object, ObjectMeta};
use crate::selector::LabelSelector;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadGroup {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: WorkloadGroupSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkloadGroupSpec {
    /// Selects the group's instances; copied onto the derived Schedule.
    pub selector: LabelSelector,
}

impl Object for WorkloadGroup {
    const KIND: &'static str = "WorkloadGroup";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
