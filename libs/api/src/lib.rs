//! # cryo-api
//!
//! Resource schema for the cryo checkpoint/restore engine.
//!
//! ## Design Principles
//!
//! - Every kind carries the same [`ObjectMeta`] and implements [`Object`],
//!   so the store and the control loops stay generic over kinds.
//! - `status.phase` is the externally observable progress indicator for
//!   each kind and only ever moves forward.
//! - Dependents record their creator through an owner reference; cascade
//!   cleanup is the store's job, not the control loops'.
//!
//! ## Kinds
//!
//! - [`Schedule`]: a recurring checkpoint policy (selector + cron expression).
//! - [`CheckpointRequest`]: one attempt to checkpoint one workload instance.
//! - [`Checkpoint`]: one captured artifact and its derived images.
//! - [`WorkloadInstance`]: the running workload unit; externally owned.
//! - [`WorkloadGroup`]: an externally owned group of instances; opted into
//!   scheduled checkpointing through an annotation.

mod checkpoint;
mod group;
mod instance;
mod meta;
mod request;
mod schedule;
mod selector;

pub mod labels;

pub use checkpoint::{Checkpoint, CheckpointPhase, CheckpointSpec, CheckpointStatus};
pub use group::{WorkloadGroup, WorkloadGroupSpec};
pub use instance::{
    ContainerSpec, InstancePhase, WorkloadInstance, WorkloadInstanceSpec, WorkloadInstanceStatus,
};
pub use meta::{set_controller_reference, Object, ObjectKey, ObjectMeta, ObjectReference, OwnerReference};
pub use request::{
    CheckpointRequest, CheckpointRequestSpec, CheckpointRequestStatus, RequestPhase,
    DEFAULT_TIMEOUT_SECONDS,
};
pub use schedule::{Schedule, ScheduleSpec, ScheduleStatus};
pub use selector::LabelSelector;
