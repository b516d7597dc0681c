//! Well-known label and annotation keys.
//!
//! Every resource this engine creates is labeled so that later loops can
//! find it again without holding references in memory: the restore path
//! looks checkpoints up by the `instance` label alone.

/// Marks objects created by this engine.
pub const APP: &str = "app";
pub const APP_VALUE: &str = "checkpoint-restore";

/// Name of the workload instance a request or checkpoint belongs to.
pub const INSTANCE: &str = "instance";

/// Namespace of that instance.
pub const INSTANCE_NAMESPACE: &str = "instance-ns";

/// Container that was captured.
pub const CONTAINER: &str = "container";

/// Name of the CheckpointRequest that produced a checkpoint.
pub const REQUEST_NAME: &str = "request-name";

/// Name of the Schedule that produced a request.
pub const SCHEDULE_NAME: &str = "schedule-name";

/// Annotation on a WorkloadGroup opting it into scheduled checkpointing;
/// the value is the cron expression.
pub const SCHEDULE_ANNOTATION: &str = "cryo.io/checkpoint-schedule";
