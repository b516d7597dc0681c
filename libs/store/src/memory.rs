//! In-memory typed store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

use cryo_api::{LabelSelector, Object, ObjectKey};

use crate::error::StoreError;
use crate::watch::WatchEvent;

/// Watch channel depth; a subscriber that lags this far drops events and
/// relies on resync.
const WATCH_CHANNEL_CAPACITY: usize = 256;

/// In-memory store for one resource kind.
///
/// Assigns `uid` and `creation_timestamp` on create, bumps
/// `resource_version` on every write, and rejects stale writes with
/// [`StoreError::Conflict`].
pub struct MemoryStore<R: Object> {
    objects: RwLock<HashMap<ObjectKey, R>>,
    version: AtomicU64,
    events: broadcast::Sender<WatchEvent<R>>,
}

impl<R: Object> MemoryStore<R> {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            objects: RwLock::new(HashMap::new()),
            version: AtomicU64::new(0),
            events,
        }
    }

    /// Subscribe to changes; only events after the call are delivered.
    pub fn watch(&self) -> broadcast::Receiver<WatchEvent<R>> {
        self.events.subscribe()
    }

    pub async fn get(&self, key: &ObjectKey) -> Result<R, StoreError> {
        let objects = self.objects.read().await;
        objects.get(key).cloned().ok_or_else(|| StoreError::NotFound {
            kind: R::KIND,
            key: key.clone(),
        })
    }

    /// Store a new object, assigning its identity.
    pub async fn create(&self, mut obj: R) -> Result<R, StoreError> {
        if obj.meta().name.is_empty() {
            return Err(StoreError::InvalidObject("name must not be empty".into()));
        }

        let key = obj.key();
        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists { kind: R::KIND, key });
        }

        let meta = obj.meta_mut();
        meta.uid = Uuid::new_v4();
        meta.creation_timestamp = Some(Utc::now());
        meta.resource_version = self.next_version();

        objects.insert(key.clone(), obj.clone());
        drop(objects);

        debug!(kind = R::KIND, key = %key, "Object created");
        let _ = self.events.send(WatchEvent::Added(obj.clone()));
        Ok(obj)
    }

    /// Conditionally replace an object; fails with `Conflict` when the
    /// caller's copy is stale.
    pub async fn update(&self, obj: R) -> Result<R, StoreError> {
        self.write_existing(obj).await
    }

    /// Conditionally replace an object's status. The memory store treats
    /// this like [`MemoryStore::update`]; it exists as a separate call so
    /// status writers read as such.
    pub async fn update_status(&self, obj: R) -> Result<R, StoreError> {
        self.write_existing(obj).await
    }

    async fn write_existing(&self, mut obj: R) -> Result<R, StoreError> {
        let key = obj.key();
        let mut objects = self.objects.write().await;

        let stored = objects.get(&key).ok_or_else(|| StoreError::NotFound {
            kind: R::KIND,
            key: key.clone(),
        })?;

        let expected = obj.meta().resource_version;
        let found = stored.meta().resource_version;
        if expected != found {
            return Err(StoreError::Conflict {
                kind: R::KIND,
                key,
                expected,
                found,
            });
        }

        // Identity fields stay store-owned.
        let uid = stored.meta().uid;
        let creation_timestamp = stored.meta().creation_timestamp;
        let meta = obj.meta_mut();
        meta.uid = uid;
        meta.creation_timestamp = creation_timestamp;
        meta.resource_version = self.next_version();

        objects.insert(key.clone(), obj.clone());
        drop(objects);

        debug!(kind = R::KIND, key = %key, "Object updated");
        let _ = self.events.send(WatchEvent::Modified(obj.clone()));
        Ok(obj)
    }

    pub async fn delete(&self, key: &ObjectKey) -> Result<R, StoreError> {
        let mut objects = self.objects.write().await;
        let removed = objects.remove(key).ok_or_else(|| StoreError::NotFound {
            kind: R::KIND,
            key: key.clone(),
        })?;
        drop(objects);

        debug!(kind = R::KIND, key = %key, "Object deleted");
        let _ = self.events.send(WatchEvent::Deleted(removed.clone()));
        Ok(removed)
    }

    /// Objects in `namespace` matching `selector`, sorted by name so
    /// callers that pick "the first" behave deterministically.
    pub async fn list(&self, namespace: &str, selector: Option<&LabelSelector>) -> Vec<R> {
        let objects = self.objects.read().await;
        let mut matched: Vec<R> = objects
            .values()
            .filter(|obj| obj.meta().namespace == namespace)
            .filter(|obj| selector.is_none_or(|s| s.matches(&obj.meta().labels)))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.meta().name.cmp(&b.meta().name));
        matched
    }

    /// Every object across namespaces, sorted by key.
    pub async fn list_all(&self) -> Vec<R> {
        let objects = self.objects.read().await;
        let mut all: Vec<R> = objects.values().cloned().collect();
        all.sort_by(|a, b| a.key().cmp(&b.key()));
        all
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl<R: Object> Default for MemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryo_api::{ObjectMeta, Schedule, ScheduleSpec, ScheduleStatus};

    fn schedule(name: &str, namespace: &str) -> Schedule {
        Schedule {
            metadata: ObjectMeta::named(name, namespace),
            spec: ScheduleSpec::default(),
            status: ScheduleStatus::default(),
        }
    }

    fn labeled_schedule(name: &str, namespace: &str, app: &str) -> Schedule {
        let mut s = schedule(name, namespace);
        s.metadata
            .labels
            .insert("app".to_string(), app.to_string());
        s
    }

    #[tokio::test]
    async fn test_create_assigns_identity() {
        let store = MemoryStore::<Schedule>::new();
        let created = store.create(schedule("nightly", "prod")).await.unwrap();

        assert!(!created.metadata.uid.is_nil());
        assert_eq!(created.metadata.resource_version, 1);
        assert!(created.metadata.creation_timestamp.is_some());
    }

    #[tokio::test]
    async fn test_create_duplicate_rejected() {
        let store = MemoryStore::<Schedule>::new();
        store.create(schedule("nightly", "prod")).await.unwrap();

        let err = store.create(schedule("nightly", "prod")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_create_requires_name() {
        let store = MemoryStore::<Schedule>::new();
        let err = store.create(schedule("", "prod")).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidObject(_)));
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = MemoryStore::<Schedule>::new();
        let err = store
            .get(&ObjectKey::new("prod", "nightly"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let store = MemoryStore::<Schedule>::new();
        let created = store.create(schedule("nightly", "prod")).await.unwrap();

        // First writer wins.
        let mut first = created.clone();
        first.spec.cron_expression = "*/5 * * * *".to_string();
        let updated = store.update(first).await.unwrap();
        assert_eq!(updated.metadata.resource_version, 2);

        // Second writer holds the old version.
        let mut second = created;
        second.spec.cron_expression = "0 * * * *".to_string();
        let err = store.update(second).await.unwrap_err();
        assert!(err.is_conflict());

        // Re-fetch and retry succeeds.
        let mut fresh = store.get(&ObjectKey::new("prod", "nightly")).await.unwrap();
        fresh.spec.cron_expression = "0 * * * *".to_string();
        store.update(fresh).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_preserves_store_owned_identity() {
        let store = MemoryStore::<Schedule>::new();
        let created = store.create(schedule("nightly", "prod")).await.unwrap();

        let mut tampered = created.clone();
        tampered.metadata.uid = Uuid::new_v4();
        let updated = store.update(tampered).await.unwrap();

        assert_eq!(updated.metadata.uid, created.metadata.uid);
        assert_eq!(
            updated.metadata.creation_timestamp,
            created.metadata.creation_timestamp
        );
    }

    #[tokio::test]
    async fn test_list_filters_and_sorts() {
        let store = MemoryStore::<Schedule>::new();
        store
            .create(labeled_schedule("zeta", "prod", "web"))
            .await
            .unwrap();
        store
            .create(labeled_schedule("alpha", "prod", "web"))
            .await
            .unwrap();
        store
            .create(labeled_schedule("other", "prod", "db"))
            .await
            .unwrap();
        store
            .create(labeled_schedule("elsewhere", "staging", "web"))
            .await
            .unwrap();

        let selector = LabelSelector::matching([("app", "web")]);
        let matched = store.list("prod", Some(&selector)).await;

        let names: Vec<&str> = matched.iter().map(|s| s.metadata.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn test_watch_sees_lifecycle_events() {
        let store = MemoryStore::<Schedule>::new();
        let mut watch = store.watch();

        let created = store.create(schedule("nightly", "prod")).await.unwrap();
        store.update(created.clone()).await.unwrap();
        store.delete(&created.key()).await.unwrap();

        assert!(matches!(watch.recv().await.unwrap(), WatchEvent::Added(_)));
        assert!(matches!(
            watch.recv().await.unwrap(),
            WatchEvent::Modified(_)
        ));
        match watch.recv().await.unwrap() {
            WatchEvent::Deleted(obj) => assert_eq!(obj.metadata.name, "nightly"),
            other => panic!("expected delete event, got {other:?}"),
        }
    }
}
