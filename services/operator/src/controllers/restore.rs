//! Restore selection for failed instances.
//!
//! When a WorkloadInstance reports `Failed`, picks the most recently
//! built checkpoint image for it and rewrites the primary container to
//! run from that image. Instances in any other phase are left alone.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use cryo_api::{
    labels, Checkpoint, CheckpointPhase, InstancePhase, LabelSelector, Object, ObjectKey,
};
use cryo_reconcile::{Outcome, ReconcileError};
use cryo_store::Cluster;

use crate::runner::Reconciler;

/// Restores failed instances from their newest built checkpoint image.
pub struct RestoreController {
    cluster: Arc<Cluster>,
}

impl RestoreController {
    pub fn new(cluster: Arc<Cluster>) -> Self {
        Self { cluster }
    }
}

#[async_trait]
impl Reconciler for RestoreController {
    async fn reconcile(&self, key: &ObjectKey) -> Result<Outcome, ReconcileError> {
        let mut instance = match self.cluster.instances.get(key).await {
            Ok(instance) => instance,
            Err(err) if err.is_not_found() => {
                debug!(instance = %key, "Instance gone");
                return Ok(Outcome::Done);
            }
            Err(err) => return Err(err.into()),
        };

        if instance.status.phase != InstancePhase::Failed {
            debug!(
                instance = %key,
                phase = %instance.status.phase,
                "Instance healthy, nothing to restore"
            );
            return Ok(Outcome::Done);
        }

        let selector =
            LabelSelector::matching([(labels::INSTANCE, instance.metadata.name.as_str())]);
        let checkpoints = self
            .cluster
            .checkpoints
            .list(&instance.metadata.namespace, Some(&selector))
            .await;

        let Some(selected) = newest_restorable(checkpoints) else {
            // Retry covers checkpoints still being captured or built.
            return Err(ReconcileError::NoCheckpointAvailable { key: key.clone() });
        };

        // Candidates are filtered on runtime_image being present.
        let runtime_image = selected
            .status
            .runtime_image
            .clone()
            .unwrap_or_default();

        let Some(primary) = instance.spec.containers.first_mut() else {
            return Err(ReconcileError::Validation(format!(
                "instance {key} has no containers to restore"
            )));
        };

        if primary.image == runtime_image {
            debug!(instance = %key, image = %runtime_image, "Already restored");
            return Ok(Outcome::Done);
        }

        primary.image = runtime_image.clone();
        self.cluster.instances.update(instance).await?;

        info!(
            instance = %key,
            checkpoint = %selected.key(),
            image = %runtime_image,
            "Instance restored from checkpoint"
        );
        Ok(Outcome::Done)
    }
}

/// Newest restorable checkpoint: `ImageBuilt` with a runtime image,
/// ordered by transition time and then creation time.
fn newest_restorable(checkpoints: Vec<Checkpoint>) -> Option<Checkpoint> {
    checkpoints
        .into_iter()
        .filter(|c| {
            c.status.phase == CheckpointPhase::ImageBuilt && c.status.runtime_image.is_some()
        })
        .max_by_key(|c| (c.status.last_transition_time, c.metadata.creation_timestamp))
}
