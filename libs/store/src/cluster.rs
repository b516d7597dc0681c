//! The set of stores the engine works over.

use tracing::debug;
use uuid::Uuid;

use cryo_api::{
    Checkpoint, CheckpointRequest, Object, ObjectKey, ObjectMeta, Schedule, WorkloadGroup,
    WorkloadInstance,
};

use crate::error::StoreError;
use crate::memory::MemoryStore;

/// One store per kind, plus owner-cascade garbage collection.
pub struct Cluster {
    pub schedules: MemoryStore<Schedule>,
    pub requests: MemoryStore<CheckpointRequest>,
    pub checkpoints: MemoryStore<Checkpoint>,
    pub instances: MemoryStore<WorkloadInstance>,
    pub groups: MemoryStore<WorkloadGroup>,
}

impl Cluster {
    pub fn new() -> Self {
        Self {
            schedules: MemoryStore::new(),
            requests: MemoryStore::new(),
            checkpoints: MemoryStore::new(),
            instances: MemoryStore::new(),
            groups: MemoryStore::new(),
        }
    }

    /// Delete a Schedule and every CheckpointRequest it owns, transitively.
    pub async fn delete_schedule(&self, key: &ObjectKey) -> Result<Schedule, StoreError> {
        let schedule = self.schedules.delete(key).await?;

        for request in self.requests.list_all().await {
            if owned_by(request.meta(), schedule.metadata.uid) {
                debug!(request = %request.key(), schedule = %key, "Cascading delete to owned request");
                // A concurrent delete losing the race is fine.
                let _ = self.delete_request(&request.key()).await;
            }
        }
        Ok(schedule)
    }

    /// Delete a CheckpointRequest and every Checkpoint it owns.
    pub async fn delete_request(&self, key: &ObjectKey) -> Result<CheckpointRequest, StoreError> {
        let request = self.requests.delete(key).await?;

        for checkpoint in self.checkpoints.list_all().await {
            if owned_by(checkpoint.meta(), request.metadata.uid) {
                debug!(checkpoint = %checkpoint.key(), request = %key, "Cascading delete to owned checkpoint");
                let _ = self.checkpoints.delete(&checkpoint.key()).await;
            }
        }
        Ok(request)
    }
}

impl Default for Cluster {
    fn default() -> Self {
        Self::new()
    }
}

fn owned_by(meta: &ObjectMeta, owner_uid: Uuid) -> bool {
    meta.owner_references.iter().any(|r| r.uid == owner_uid)
}
