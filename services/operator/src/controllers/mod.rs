//! The reconciliation loops.
//!
//! Each controller owns one resource kind and is driven level-style by
//! [`crate::runner::Controller`]: it receives a key, reads current
//! state, and converges it, safe under redelivery.
//!
//! - `ScheduleController`: one cron timer per Schedule; ticks create
//!   CheckpointRequests.
//! - `RequestController`: executes a request against the capture
//!   service and records a Checkpoint.
//! - `CheckpointController`: builds and pushes the restorable image
//!   for a captured artifact.
//! - `RestoreController`: points failed instances at their newest
//!   built image.
//! - `GroupController`: materializes Schedules from group annotations.

mod checkpoint;
mod group;
mod request;
mod restore;
mod schedule;

pub use checkpoint::CheckpointController;
pub use group::GroupController;
pub use request::RequestController;
pub use restore::RestoreController;
pub use schedule::{fire, parse_cron, ScheduleController, TimerRegistry};
