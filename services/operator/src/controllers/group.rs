//! Schedule materialization from group annotations.
//!
//! A WorkloadGroup opts into scheduled checkpointing by carrying the
//! `cryo.io/checkpoint-schedule` annotation. The group loop keeps one
//! Schedule per annotated group, named after the group, with the
//! group's selector and the annotated cron expression.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use cryo_api::{labels, ObjectKey, Schedule};
use cryo_reconcile::{Outcome, ReconcileError};
use cryo_store::Cluster;

use super::schedule::parse_cron;
use crate::runner::Reconciler;

/// Keeps derived Schedules in sync with group annotations.
pub struct GroupController {
    cluster: Arc<Cluster>,
}

impl GroupController {
    pub fn new(cluster: Arc<Cluster>) -> Self {
        Self { cluster }
    }
}

#[async_trait]
impl Reconciler for GroupController {
    async fn reconcile(&self, key: &ObjectKey) -> Result<Outcome, ReconcileError> {
        let group = match self.cluster.groups.get(key).await {
            Ok(group) => group,
            Err(err) if err.is_not_found() => {
                debug!(group = %key, "Group gone");
                return Ok(Outcome::Done);
            }
            Err(err) => return Err(err.into()),
        };

        let Some(expression) = group.metadata.annotations.get(labels::SCHEDULE_ANNOTATION) else {
            debug!(group = %key, "Group not annotated for checkpointing");
            return Ok(Outcome::Done);
        };
        let expression = expression.clone();

        // The annotation is user input; reject it before writing anything.
        parse_cron(&expression)?;

        // The derived Schedule shares the group's name and namespace.
        match self.cluster.schedules.get(key).await {
            Ok(mut schedule) => {
                if schedule.spec.cron_expression == expression
                    && schedule.spec.selector == group.spec.selector
                {
                    return Ok(Outcome::Done);
                }

                schedule.spec.cron_expression = expression.clone();
                schedule.spec.selector = group.spec.selector.clone();
                self.cluster.schedules.update(schedule).await?;
                info!(
                    schedule = %key,
                    cron = %expression,
                    "Schedule updated from group annotation"
                );
                Ok(Outcome::Done)
            }
            Err(err) if err.is_not_found() => {
                let schedule = Schedule::new(
                    &group.metadata.name,
                    &group.metadata.namespace,
                    group.spec.selector.clone(),
                    &expression,
                );
                self.cluster.schedules.create(schedule).await?;
                info!(
                    schedule = %key,
                    cron = %expression,
                    "Schedule created from group annotation"
                );
                Ok(Outcome::Done)
            }
            Err(err) => Err(err.into()),
        }
    }
}
