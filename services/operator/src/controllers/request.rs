//! CheckpointRequest reconciliation.
//!
//! Drives one request through `Pending -> InProgress -> {Completed,
//! Failed}`. The `InProgress` marker is written before any external call
//! so a crash leaves a visible trace; redelivery while `InProgress`
//! requeues instead of re-driving the capture.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use cryo_api::{
    labels, set_controller_reference, Checkpoint, CheckpointRequest, CheckpointSpec,
    CheckpointStatus, Object, ObjectKey, ObjectMeta, ObjectReference, RequestPhase,
    WorkloadInstance,
};
use cryo_reconcile::{Outcome, ReconcileError};
use cryo_store::{Cluster, StoreError};

use crate::capture::CaptureService;
use crate::runner::Reconciler;

/// Drives CheckpointRequests to completion.
pub struct RequestController {
    cluster: Arc<Cluster>,
    capture: Arc<dyn CaptureService>,

    /// Requeue delay while a request is `InProgress`.
    in_progress_requeue: Duration,
}

impl RequestController {
    pub fn new(
        cluster: Arc<Cluster>,
        capture: Arc<dyn CaptureService>,
        in_progress_requeue: Duration,
    ) -> Self {
        Self {
            cluster,
            capture,
            in_progress_requeue,
        }
    }

    /// The Pending path: mark, capture, record.
    async fn execute(&self, mut request: CheckpointRequest) -> Result<Outcome, ReconcileError> {
        // Crash marker first; external calls only happen under InProgress.
        request.status.phase = RequestPhase::InProgress;
        request.status.start_time = Some(Utc::now());
        let mut request = self.cluster.requests.update_status(request).await?;

        let instance = match self.cluster.instances.get(&request.spec.instance_ref).await {
            Ok(instance) => instance,
            Err(err) if err.is_not_found() => {
                let err = ReconcileError::InstanceNotFound {
                    key: request.spec.instance_ref.clone(),
                };
                self.fail_and_log(request, &err.to_string()).await;
                return Err(err);
            }
            Err(err) => return Err(err.into()),
        };

        let capture_result = self
            .capture
            .checkpoint(
                &instance.spec.node_name,
                &instance.metadata.name,
                &instance.metadata.namespace,
                &request.spec.container_name,
            )
            .await;
        let artifact = match capture_result {
            Ok(artifact) => artifact,
            Err(cause) => {
                let err = ReconcileError::external("capture", &cause);
                self.fail_and_log(request, &err.to_string()).await;
                return Err(err);
            }
        };
        info!(request = %request.key(), artifact = %artifact, "Checkpoint captured");

        // A create failure here is store trouble, not a capture failure;
        // it propagates as transient instead of failing the request.
        let checkpoint = self.build_checkpoint(&request, &instance).await;
        let checkpoint = self.cluster.checkpoints.create(checkpoint).await?;
        info!(
            request = %request.key(),
            checkpoint = %checkpoint.key(),
            "Checkpoint resource created"
        );

        request.status.phase = RequestPhase::Completed;
        request.status.completion_time = Some(Utc::now());
        request.status.checkpoint_ref = Some(ObjectReference::to(&checkpoint));
        request.status.message = "Checkpoint created successfully".to_string();
        self.cluster.requests.update_status(request).await?;

        Ok(Outcome::Done)
    }

    /// Build the Checkpoint a completed capture is recorded as.
    async fn build_checkpoint(
        &self,
        request: &CheckpointRequest,
        instance: &WorkloadInstance,
    ) -> Checkpoint {
        let timestamp = Utc::now();
        let unix_ts = timestamp.timestamp();
        let instance_name = &instance.metadata.name;
        let namespace = &instance.metadata.namespace;
        let container = &request.spec.container_name;

        let checkpoint_id = format!("{instance_name}-{namespace}-{unix_ts}");
        let data_path = format!("checkpoint-{instance_name}_{namespace}-{container}-{unix_ts}.tar");

        let mut metadata = ObjectMeta::named(&checkpoint_id, namespace);
        metadata
            .labels
            .insert(labels::APP.to_string(), labels::APP_VALUE.to_string());
        metadata
            .labels
            .insert(labels::INSTANCE.to_string(), instance_name.clone());
        metadata
            .labels
            .insert(labels::INSTANCE_NAMESPACE.to_string(), namespace.clone());
        metadata
            .labels
            .insert(labels::CONTAINER.to_string(), container.clone());
        metadata
            .labels
            .insert(labels::REQUEST_NAME.to_string(), request.metadata.name.clone());

        let mut spec = CheckpointSpec {
            checkpoint_data_path: data_path,
            checkpoint_id,
            timestamp,
            node_name: instance.spec.node_name.clone(),
            schedule_ref: request.spec.schedule_ref.clone(),
            selector: None,
            cron_expression: None,
        };

        // Best effort; the parent Schedule may be gone by now.
        if let Some(schedule_ref) = &request.spec.schedule_ref {
            match self.cluster.schedules.get(&schedule_ref.key()).await {
                Ok(schedule) => {
                    spec.selector = Some(schedule.spec.selector.clone());
                    spec.cron_expression = Some(schedule.spec.cron_expression.clone());
                }
                Err(err) => {
                    debug!(
                        request = %request.key(),
                        schedule = %schedule_ref.key(),
                        error = %err,
                        "Schedule details not copied"
                    );
                }
            }
        }

        let mut checkpoint = Checkpoint {
            metadata,
            spec,
            status: CheckpointStatus::default(),
        };
        set_controller_reference(request, &mut checkpoint);
        checkpoint
    }

    async fn fail(&self, mut request: CheckpointRequest, message: &str) -> Result<(), StoreError> {
        request.status.phase = RequestPhase::Failed;
        request.status.completion_time = Some(Utc::now());
        request.status.message = message.to_string();
        self.cluster.requests.update_status(request).await?;
        Ok(())
    }

    /// Persist a Failed status. A write failure is logged and swallowed
    /// so the original error stays the one reported.
    async fn fail_and_log(&self, request: CheckpointRequest, message: &str) {
        let key = request.key();
        if let Err(err) = self.fail(request, message).await {
            warn!(request = %key, error = %err, "Could not persist Failed status");
        }
    }
}

#[async_trait]
impl Reconciler for RequestController {
    async fn reconcile(&self, key: &ObjectKey) -> Result<Outcome, ReconcileError> {
        let request = match self.cluster.requests.get(key).await {
            Ok(request) => request,
            Err(err) if err.is_not_found() => {
                debug!(request = %key, "Request gone");
                return Ok(Outcome::Done);
            }
            Err(err) => return Err(err.into()),
        };

        if request.status.phase.is_terminal() {
            debug!(request = %key, phase = %request.status.phase, "Request already terminal");
            return Ok(Outcome::Done);
        }

        if request.status.phase == RequestPhase::InProgress {
            let timed_out = request
                .status
                .start_time
                .or(request.metadata.creation_timestamp)
                .map(|started| Utc::now() - started > request.spec.timeout())
                .unwrap_or(false);

            if timed_out {
                info!(
                    request = %key,
                    timeout_seconds = request.spec.timeout_seconds,
                    "Request timed out"
                );
                let message = format!(
                    "Checkpoint did not complete within {} seconds",
                    request.spec.timeout_seconds
                );
                self.fail(request, &message).await?;
                return Ok(Outcome::Done);
            }

            return Ok(Outcome::requeue_after(self.in_progress_requeue));
        }

        self.execute(request).await
    }
}

#[cfg(test)]
mod tests {
    use cryo_api::{
        CheckpointPhase, CheckpointRequestSpec, CheckpointRequestStatus, ContainerSpec,
        LabelSelector, Schedule, WorkloadInstanceSpec, WorkloadInstanceStatus,
        DEFAULT_TIMEOUT_SECONDS,
    };
    use rstest::rstest;

    use crate::capture::MockCapture;

    use super::*;

    fn instance(name: &str, namespace: &str) -> WorkloadInstance {
        WorkloadInstance {
            metadata: ObjectMeta::named(name, namespace),
            spec: WorkloadInstanceSpec {
                node_name: "node-1".to_string(),
                containers: vec![ContainerSpec {
                    name: "app".to_string(),
                    image: "web:v1".to_string(),
                }],
            },
            status: WorkloadInstanceStatus::default(),
        }
    }

    fn pending_request(name: &str, target: &WorkloadInstance) -> CheckpointRequest {
        CheckpointRequest {
            metadata: ObjectMeta::named(name, &target.metadata.namespace),
            spec: CheckpointRequestSpec {
                instance_ref: target.key(),
                container_name: "app".to_string(),
                schedule_ref: None,
                timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            },
            status: CheckpointRequestStatus::default(),
        }
    }

    fn controller(cluster: &Arc<Cluster>, capture: Arc<MockCapture>) -> RequestController {
        RequestController::new(cluster.clone(), capture, Duration::from_secs(10))
    }

    #[rstest]
    #[case(RequestPhase::Completed)]
    #[case(RequestPhase::Failed)]
    #[tokio::test]
    async fn test_terminal_request_is_a_no_op(#[case] phase: RequestPhase) {
        let cluster = Arc::new(Cluster::new());
        let target = cluster.instances.create(instance("web-1", "prod")).await.unwrap();

        let mut request = pending_request("req-1", &target);
        request.status.phase = phase;
        let created = cluster.requests.create(request).await.unwrap();

        // A failing capture proves no collaborator call happens.
        let capture = Arc::new(MockCapture::failing());
        let outcome = controller(&cluster, capture)
            .reconcile(&created.key())
            .await
            .unwrap();

        assert!(outcome.is_done());
        let stored = cluster.requests.get(&created.key()).await.unwrap();
        assert_eq!(stored.metadata.resource_version, created.metadata.resource_version);
        assert!(cluster.checkpoints.list_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_pending_request_completes() {
        let cluster = Arc::new(Cluster::new());
        let target = cluster.instances.create(instance("web-1", "prod")).await.unwrap();
        let created = cluster
            .requests
            .create(pending_request("req-1", &target))
            .await
            .unwrap();

        let capture = Arc::new(MockCapture::new());
        let outcome = controller(&cluster, capture.clone())
            .reconcile(&created.key())
            .await
            .unwrap();

        assert!(outcome.is_done());
        assert_eq!(capture.capture_count(), 1);

        let done = cluster.requests.get(&created.key()).await.unwrap();
        assert_eq!(done.status.phase, RequestPhase::Completed);
        assert!(done.status.start_time.is_some());
        assert!(done.status.completion_time.is_some());
        assert_eq!(done.status.message, "Checkpoint created successfully");

        let checkpoint_ref = done.status.checkpoint_ref.as_ref().unwrap();
        let checkpoint = cluster
            .checkpoints
            .get(&checkpoint_ref.key())
            .await
            .unwrap();

        assert_eq!(checkpoint.status.phase, CheckpointPhase::Created);
        assert!(checkpoint.spec.checkpoint_id.starts_with("web-1-prod-"));
        assert!(checkpoint
            .spec
            .checkpoint_data_path
            .starts_with("checkpoint-web-1_prod-app-"));
        assert!(checkpoint.spec.checkpoint_data_path.ends_with(".tar"));
        assert_eq!(checkpoint.spec.node_name, "node-1");

        assert_eq!(
            checkpoint.metadata.labels.get(labels::INSTANCE),
            Some(&"web-1".to_string())
        );
        assert_eq!(
            checkpoint.metadata.labels.get(labels::CONTAINER),
            Some(&"app".to_string())
        );
        assert_eq!(
            checkpoint.metadata.labels.get(labels::REQUEST_NAME),
            Some(&"req-1".to_string())
        );

        let owner = checkpoint.metadata.controller_owner().unwrap();
        assert_eq!(owner.kind, "CheckpointRequest");
        assert_eq!(owner.uid, done.metadata.uid);
    }

    #[tokio::test]
    async fn test_pending_request_copies_schedule_details() {
        let cluster = Arc::new(Cluster::new());
        let schedule = cluster
            .schedules
            .create(Schedule::new(
                "nightly",
                "prod",
                LabelSelector::matching([("app", "web")]),
                "0 3 * * *",
            ))
            .await
            .unwrap();
        let target = cluster.instances.create(instance("web-1", "prod")).await.unwrap();

        let mut request = pending_request("req-1", &target);
        request.spec.schedule_ref = Some(ObjectReference::to(&schedule));
        let created = cluster.requests.create(request).await.unwrap();

        controller(&cluster, Arc::new(MockCapture::new()))
            .reconcile(&created.key())
            .await
            .unwrap();

        let checkpoint = &cluster.checkpoints.list_all().await[0];
        assert_eq!(
            checkpoint.spec.selector.as_ref().unwrap(),
            &schedule.spec.selector
        );
        assert_eq!(
            checkpoint.spec.cron_expression.as_deref(),
            Some("0 3 * * *")
        );
        assert_eq!(
            checkpoint.spec.schedule_ref.as_ref().unwrap().name,
            "nightly"
        );
    }

    #[tokio::test]
    async fn test_pending_request_missing_schedule_is_non_fatal() {
        let cluster = Arc::new(Cluster::new());
        let schedule = cluster
            .schedules
            .create(Schedule::new(
                "nightly",
                "prod",
                LabelSelector::default(),
                "0 3 * * *",
            ))
            .await
            .unwrap();
        let target = cluster.instances.create(instance("web-1", "prod")).await.unwrap();

        let mut request = pending_request("req-1", &target);
        request.spec.schedule_ref = Some(ObjectReference::to(&schedule));
        let created = cluster.requests.create(request).await.unwrap();

        cluster.schedules.delete(&schedule.key()).await.unwrap();

        let outcome = controller(&cluster, Arc::new(MockCapture::new()))
            .reconcile(&created.key())
            .await
            .unwrap();

        assert!(outcome.is_done());
        let checkpoint = &cluster.checkpoints.list_all().await[0];
        assert!(checkpoint.spec.selector.is_none());
        assert!(checkpoint.spec.cron_expression.is_none());
    }

    #[tokio::test]
    async fn test_pending_request_fails_when_instance_missing() {
        let cluster = Arc::new(Cluster::new());
        let missing = instance("web-1", "prod");
        let created = cluster
            .requests
            .create(pending_request("req-1", &missing))
            .await
            .unwrap();

        let err = controller(&cluster, Arc::new(MockCapture::new()))
            .reconcile(&created.key())
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::InstanceNotFound { .. }));
        let failed = cluster.requests.get(&created.key()).await.unwrap();
        assert_eq!(failed.status.phase, RequestPhase::Failed);
        assert!(failed.status.message.contains("not found"));
        assert!(failed.status.completion_time.is_some());
        assert!(cluster.checkpoints.list_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_pending_request_fails_on_capture_error() {
        let cluster = Arc::new(Cluster::new());
        let target = cluster.instances.create(instance("web-1", "prod")).await.unwrap();
        let created = cluster
            .requests
            .create(pending_request("req-1", &target))
            .await
            .unwrap();

        let err = controller(&cluster, Arc::new(MockCapture::failing()))
            .reconcile(&created.key())
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::ExternalService { .. }));
        let failed = cluster.requests.get(&created.key()).await.unwrap();
        assert_eq!(failed.status.phase, RequestPhase::Failed);
        assert!(failed.status.message.contains("capture failed"));
        assert!(cluster.checkpoints.list_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_in_progress_request_requeues() {
        let cluster = Arc::new(Cluster::new());
        let target = cluster.instances.create(instance("web-1", "prod")).await.unwrap();

        let mut request = pending_request("req-1", &target);
        request.status.phase = RequestPhase::InProgress;
        request.status.start_time = Some(Utc::now());
        let created = cluster.requests.create(request).await.unwrap();

        let capture = Arc::new(MockCapture::new());
        let outcome = controller(&cluster, capture.clone())
            .reconcile(&created.key())
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::RequeueAfter(Duration::from_secs(10)));
        assert_eq!(capture.capture_count(), 0);
        let stored = cluster.requests.get(&created.key()).await.unwrap();
        assert_eq!(stored.metadata.resource_version, created.metadata.resource_version);
    }

    #[tokio::test]
    async fn test_in_progress_request_times_out() {
        let cluster = Arc::new(Cluster::new());
        let target = cluster.instances.create(instance("web-1", "prod")).await.unwrap();

        let mut request = pending_request("req-1", &target);
        request.status.phase = RequestPhase::InProgress;
        request.status.start_time = Some(Utc::now() - chrono::Duration::seconds(400));
        let created = cluster.requests.create(request).await.unwrap();

        let outcome = controller(&cluster, Arc::new(MockCapture::new()))
            .reconcile(&created.key())
            .await
            .unwrap();

        assert!(outcome.is_done());
        let failed = cluster.requests.get(&created.key()).await.unwrap();
        assert_eq!(failed.status.phase, RequestPhase::Failed);
        assert!(failed.status.message.contains("did not complete within 300"));
        assert!(failed.status.completion_time.is_some());
    }

    #[tokio::test]
    async fn test_in_progress_request_honors_custom_timeout() {
        let cluster = Arc::new(Cluster::new());
        let target = cluster.instances.create(instance("web-1", "prod")).await.unwrap();

        let mut request = pending_request("req-1", &target);
        request.spec.timeout_seconds = 3600;
        request.status.phase = RequestPhase::InProgress;
        request.status.start_time = Some(Utc::now() - chrono::Duration::seconds(400));
        let created = cluster.requests.create(request).await.unwrap();

        let outcome = controller(&cluster, Arc::new(MockCapture::new()))
            .reconcile(&created.key())
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::RequeueAfter(Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn test_deleted_request_is_done() {
        let cluster = Arc::new(Cluster::new());
        let outcome = controller(&cluster, Arc::new(MockCapture::new()))
            .reconcile(&ObjectKey::new("prod", "gone"))
            .await
            .unwrap();
        assert!(outcome.is_done());
    }
}
