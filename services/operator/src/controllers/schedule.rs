//! Schedule reconciliation and cron timers.
//!
//! Each Schedule gets exactly one timer task. The task sleeps until the
//! next cron tick, fires, and repeats; reconcile replaces it whenever the
//! expression changes and stops it when the Schedule disappears. A fire
//! always re-fetches the Schedule first, so a stale timer that lost a
//! replacement race stands down on its own.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

use cryo_api::{
    labels, set_controller_reference, CheckpointRequest, CheckpointRequestSpec,
    CheckpointRequestStatus, Object, ObjectKey, ObjectMeta, ObjectReference, Schedule,
    WorkloadInstance, DEFAULT_TIMEOUT_SECONDS,
};
use cryo_reconcile::{Outcome, ReconcileError};
use cryo_store::{Cluster, StoreError};

use crate::runner::Reconciler;

/// Attempts for the last-run-time write before the conflict is reported.
const LAST_RUN_UPDATE_ATTEMPTS: u32 = 3;

/// Parse a cron expression, accepting the five-field form as well as the
/// six-field form with leading seconds.
pub fn parse_cron(expression: &str) -> Result<cron::Schedule, ReconcileError> {
    let trimmed = expression.trim();
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    };

    cron::Schedule::from_str(&normalized).map_err(|err| ReconcileError::InvalidSchedule {
        expression: expression.to_string(),
        reason: err.to_string(),
    })
}

/// Handle to one running timer task.
struct TimerHandle {
    /// Expression the task was built for.
    expression: String,

    /// Shutdown sender; stops the task between ticks.
    shutdown_tx: watch::Sender<bool>,
}

impl TimerHandle {
    fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Running cron timers, one per Schedule identity.
#[derive(Default)]
pub struct TimerRegistry {
    timers: RwLock<HashMap<ObjectKey, TimerHandle>>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live timers.
    pub async fn len(&self) -> usize {
        self.timers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.timers.read().await.is_empty()
    }

    /// Expression of the timer registered for `key`, if any.
    pub async fn expression(&self, key: &ObjectKey) -> Option<String> {
        self.timers
            .read()
            .await
            .get(key)
            .map(|t| t.expression.clone())
    }

    async fn install(&self, key: ObjectKey, handle: TimerHandle) {
        if let Some(old) = self.timers.write().await.insert(key, handle) {
            old.stop();
        }
    }

    async fn remove(&self, key: &ObjectKey) {
        if let Some(old) = self.timers.write().await.remove(key) {
            old.stop();
        }
    }

    /// Stop every timer.
    pub async fn stop_all(&self) {
        let mut timers = self.timers.write().await;
        for handle in timers.values() {
            handle.stop();
        }
        timers.clear();
    }
}

/// Keeps timers aligned with the current set of Schedules.
pub struct ScheduleController {
    cluster: Arc<Cluster>,
    timers: TimerRegistry,
}

impl ScheduleController {
    pub fn new(cluster: Arc<Cluster>) -> Self {
        Self {
            cluster,
            timers: TimerRegistry::new(),
        }
    }

    pub fn timers(&self) -> &TimerRegistry {
        &self.timers
    }

    async fn start_timer(&self, key: ObjectKey, expression: String) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let cluster = self.cluster.clone();
        let task_key = key.clone();
        let task_expression = expression.clone();

        tokio::spawn(async move {
            run_timer(cluster, task_key, task_expression, shutdown_rx).await;
        });

        info!(schedule = %key, expression = %expression, "Cron timer started");
        self.timers
            .install(
                key,
                TimerHandle {
                    expression,
                    shutdown_tx,
                },
            )
            .await;
    }
}

#[async_trait]
impl Reconciler for ScheduleController {
    async fn reconcile(&self, key: &ObjectKey) -> Result<Outcome, ReconcileError> {
        let schedule = match self.cluster.schedules.get(key).await {
            Ok(schedule) => schedule,
            Err(err) if err.is_not_found() => {
                self.timers.remove(key).await;
                debug!(schedule = %key, "Schedule gone, timer stopped");
                return Ok(Outcome::Done);
            }
            Err(err) => return Err(err.into()),
        };

        let expression = schedule.spec.cron_expression.clone();
        // Reject unparseable expressions before touching any timer.
        parse_cron(&expression)?;

        if self.timers.expression(key).await.as_deref() == Some(expression.as_str()) {
            return Ok(Outcome::Done);
        }

        self.start_timer(key.clone(), expression).await;
        Ok(Outcome::Done)
    }
}

/// Sleep until each cron tick and fire, until stopped.
async fn run_timer(
    cluster: Arc<Cluster>,
    key: ObjectKey,
    expression: String,
    mut shutdown: watch::Receiver<bool>,
) {
    let cron_schedule = match parse_cron(&expression) {
        Ok(cron_schedule) => cron_schedule,
        Err(err) => {
            // Reconcile validates before spawning; reaching this is a bug.
            error!(schedule = %key, error = %err, "Timer spawned with unparseable expression");
            return;
        }
    };

    loop {
        let now = Utc::now();
        let Some(next) = cron_schedule.after(&now).next() else {
            warn!(schedule = %key, expression = %expression, "Cron expression has no further ticks");
            return;
        };
        let wait = (next - now).to_std().unwrap_or_default();

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    debug!(schedule = %key, "Timer stopped");
                    return;
                }
                continue;
            }
        }

        // A fire in flight runs to completion; stop lands between ticks.
        fire(&cluster, &key, &expression).await;
    }
}

/// One cron tick: create a CheckpointRequest for the first matching
/// instance and stamp the Schedule's last run time.
///
/// Failures are logged, never propagated; the next tick retries.
pub async fn fire(cluster: &Cluster, key: &ObjectKey, expression: &str) {
    let schedule = match cluster.schedules.get(key).await {
        Ok(schedule) => schedule,
        Err(_) => {
            debug!(schedule = %key, "Schedule gone at fire time");
            return;
        }
    };

    // Replacement timers race their predecessors; only the timer built
    // for the current expression may act.
    if schedule.spec.cron_expression != expression {
        debug!(schedule = %key, "Expression changed, stale timer stands down");
        return;
    }

    let instances = cluster
        .instances
        .list(&schedule.metadata.namespace, Some(&schedule.spec.selector))
        .await;
    let Some(instance) = instances.first() else {
        info!(schedule = %key, "No instances match the schedule selector");
        return;
    };

    let Some(container) = instance.primary_container() else {
        warn!(
            schedule = %key,
            instance = %instance.metadata.name,
            "Matched instance has no containers"
        );
        return;
    };

    let request = build_request(&schedule, instance, &container.name);
    let request_key = request.key();
    if let Err(err) = cluster.requests.create(request).await {
        error!(
            schedule = %key,
            request = %request_key,
            error = %err,
            "Failed to create checkpoint request"
        );
        return;
    }
    info!(
        schedule = %key,
        request = %request_key,
        instance = %instance.metadata.name,
        "Checkpoint request created"
    );

    if let Err(err) = touch_last_run(cluster, key).await {
        warn!(schedule = %key, error = %err, "Failed to update last run time");
    }
}

fn build_request(
    schedule: &Schedule,
    instance: &WorkloadInstance,
    container: &str,
) -> CheckpointRequest {
    let name = format!(
        "{}-{}-{}",
        schedule.metadata.name,
        instance.metadata.name,
        Utc::now().timestamp()
    );

    let mut metadata = ObjectMeta::named(&name, &schedule.metadata.namespace);
    metadata
        .labels
        .insert(labels::APP.to_string(), labels::APP_VALUE.to_string());
    metadata
        .labels
        .insert(labels::INSTANCE.to_string(), instance.metadata.name.clone());
    metadata.labels.insert(
        labels::INSTANCE_NAMESPACE.to_string(),
        instance.metadata.namespace.clone(),
    );
    metadata.labels.insert(
        labels::SCHEDULE_NAME.to_string(),
        schedule.metadata.name.clone(),
    );

    let mut request = CheckpointRequest {
        metadata,
        spec: CheckpointRequestSpec {
            instance_ref: instance.key(),
            container_name: container.to_string(),
            schedule_ref: Some(ObjectReference::to(schedule)),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        },
        status: CheckpointRequestStatus::default(),
    };
    set_controller_reference(schedule, &mut request);
    request
}

async fn touch_last_run(cluster: &Cluster, key: &ObjectKey) -> Result<(), StoreError> {
    let mut attempts = 0;
    loop {
        let mut schedule = cluster.schedules.get(key).await?;
        schedule.status.last_run_time = Some(Utc::now());
        match cluster.schedules.update_status(schedule).await {
            Ok(_) => return Ok(()),
            Err(err) if err.is_conflict() && attempts + 1 < LAST_RUN_UPDATE_ATTEMPTS => {
                attempts += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
