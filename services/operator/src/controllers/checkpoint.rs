//! Checkpoint reconciliation: artifact to pushed image.
//!
//! Drives one Checkpoint through `Created -> Processing -> {ImageBuilt,
//! Failed}`. The `Processing` marker is written before the builder is
//! touched; terminal phases gate redelivery so an image is never built
//! twice for the same capture.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use cryo_api::{labels, Checkpoint, CheckpointPhase, Object, ObjectKey};
use cryo_reconcile::{Outcome, ReconcileError};
use cryo_store::{Cluster, StoreError};

use crate::imagebuild::ImageBuilder;
use crate::runner::Reconciler;

/// Turns captured checkpoints into restorable images.
pub struct CheckpointController {
    cluster: Arc<Cluster>,
    builder: Arc<dyn ImageBuilder>,

    /// Directory the capture service writes artifacts into.
    checkpoints_dir: PathBuf,

    /// Registry prefix for published runtime images.
    image_registry: String,
}

impl CheckpointController {
    pub fn new(
        cluster: Arc<Cluster>,
        builder: Arc<dyn ImageBuilder>,
        checkpoints_dir: PathBuf,
        image_registry: String,
    ) -> Self {
        Self {
            cluster,
            builder,
            checkpoints_dir,
            image_registry,
        }
    }

    /// The Created path: mark, validate, build, push, record.
    async fn build(&self, mut checkpoint: Checkpoint) -> Result<Outcome, ReconcileError> {
        // Crash marker first; the builder only runs under Processing.
        checkpoint.status.phase = CheckpointPhase::Processing;
        checkpoint.status.last_transition_time = Some(Utc::now());
        let mut checkpoint = self.cluster.checkpoints.update_status(checkpoint).await?;

        let artifact_name = checkpoint.spec.checkpoint_data_path.clone();
        if let Err(err) = validate_artifact_name(&artifact_name) {
            self.fail_and_log(checkpoint, &err.to_string()).await;
            return Err(err);
        }

        let Some(container) = checkpoint.metadata.labels.get(labels::CONTAINER).cloned() else {
            let err = ReconcileError::Validation(format!(
                "checkpoint carries no {:?} label",
                labels::CONTAINER
            ));
            self.fail_and_log(checkpoint, &err.to_string()).await;
            return Err(err);
        };

        let artifact = self.checkpoints_dir.join(&artifact_name);
        let checkpoint_id = checkpoint.spec.checkpoint_id.clone();
        let runtime_image = format!("{}/{}:latest", self.image_registry, checkpoint_id);

        let build_result = self
            .builder
            .build_from_checkpoint(&artifact, &container, &checkpoint_id)
            .await;
        let local_image = match build_result {
            Ok(local_image) => local_image,
            Err(cause) => {
                let err = ReconcileError::external("image build", &cause);
                self.fail_and_log(checkpoint, &err.to_string()).await;
                return Err(err);
            }
        };

        if let Err(cause) = self
            .builder
            .push_to_node_runtime(&local_image, &runtime_image)
            .await
        {
            let err = ReconcileError::external("image push", &cause);
            self.fail_and_log(checkpoint, &err.to_string()).await;
            return Err(err);
        }

        info!(
            checkpoint = %checkpoint.key(),
            image = %runtime_image,
            "Checkpoint image built and pushed"
        );

        checkpoint.status.phase = CheckpointPhase::ImageBuilt;
        checkpoint.status.checkpoint_image = Some(local_image);
        checkpoint.status.runtime_image = Some(runtime_image);
        checkpoint.status.last_transition_time = Some(Utc::now());
        self.cluster.checkpoints.update_status(checkpoint).await?;

        Ok(Outcome::Done)
    }

    async fn fail(&self, mut checkpoint: Checkpoint, reason: &str) -> Result<(), StoreError> {
        checkpoint.status.phase = CheckpointPhase::Failed;
        checkpoint.status.failed_reason = Some(reason.to_string());
        checkpoint.status.last_transition_time = Some(Utc::now());
        self.cluster.checkpoints.update_status(checkpoint).await?;
        Ok(())
    }

    /// Persist a Failed status. A write failure is logged and swallowed
    /// so the original error stays the one reported.
    async fn fail_and_log(&self, checkpoint: Checkpoint, reason: &str) {
        let key = checkpoint.key();
        if let Err(err) = self.fail(checkpoint, reason).await {
            warn!(checkpoint = %key, error = %err, "Could not persist Failed status");
        }
    }
}

#[async_trait]
impl Reconciler for CheckpointController {
    async fn reconcile(&self, key: &ObjectKey) -> Result<Outcome, ReconcileError> {
        let checkpoint = match self.cluster.checkpoints.get(key).await {
            Ok(checkpoint) => checkpoint,
            Err(err) if err.is_not_found() => {
                debug!(checkpoint = %key, "Checkpoint gone");
                return Ok(Outcome::Done);
            }
            Err(err) => return Err(err.into()),
        };

        if checkpoint.status.phase.is_terminal() {
            debug!(
                checkpoint = %key,
                phase = %checkpoint.status.phase,
                "Checkpoint already terminal"
            );
            return Ok(Outcome::Done);
        }

        if checkpoint.status.phase == CheckpointPhase::Processing {
            // Another pass owns the build; check back shortly.
            return Ok(Outcome::Requeue);
        }

        self.build(checkpoint).await
    }
}

/// A valid artifact name is a bare relative file name; anything that
/// could escape the checkpoints directory is rejected.
fn validate_artifact_name(name: &str) -> Result<(), ReconcileError> {
    if name.is_empty() {
        return Err(ReconcileError::Validation(
            "checkpoint_data_path is empty".to_string(),
        ));
    }

    let mut components = Path::new(name).components();
    let bare_file = matches!(components.next(), Some(Component::Normal(_)))
        && components.next().is_none();
    if !bare_file {
        return Err(ReconcileError::Validation(format!(
            "checkpoint_data_path {name:?} must be a bare file name"
        )));
    }

    Ok(())
}
