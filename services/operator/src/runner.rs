//! Generic watch-driven controller runner.
//!
//! Each controller reconciles one resource kind. The runner:
//! - Seeds the work queue with every existing object
//! - Forwards store watch events onto the queue
//! - Re-queues everything on a periodic resync interval
//! - Drives the reconciler per key, with backoff on failure
//!
//! Delivery is at least once; reconcilers must tolerate duplicate and
//! stale keys.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use cryo_api::{Object, ObjectKey};
use cryo_reconcile::{
    BackoffPolicy, Outcome, ReconcileError, RetryTracker, DEFAULT_RESYNC_INTERVAL,
    DEFAULT_RETRY_WINDOW,
};
use cryo_store::MemoryStore;

/// One reconciliation pass over a single object.
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    /// Converge the object named by `key` toward its desired state.
    async fn reconcile(&self, key: &ObjectKey) -> Result<Outcome, ReconcileError>;
}

/// Controller runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Interval between full re-queues of every object.
    pub resync_interval: Duration,

    /// Window after which a key's failure count resets.
    pub retry_window: Duration,

    /// Backoff policy for failed reconciles.
    pub backoff: BackoffPolicy,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            resync_interval: DEFAULT_RESYNC_INTERVAL,
            retry_window: DEFAULT_RETRY_WINDOW,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Counters exposed by a running controller.
#[derive(Debug, Default)]
pub struct ReconcileStats {
    reconciles: AtomicU64,
    failures: AtomicU64,
}

impl ReconcileStats {
    /// Total reconcile passes, successful or not.
    pub fn reconciles(&self) -> u64 {
        self.reconciles.load(Ordering::SeqCst)
    }

    /// Reconcile passes that returned an error.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }
}

/// A named reconciler bound to runner state.
pub struct Controller<R> {
    name: &'static str,
    reconciler: R,
    config: RunnerConfig,
    stats: Arc<ReconcileStats>,
}

impl<R: Reconciler> Controller<R> {
    /// Create a controller with the default runner configuration.
    pub fn new(name: &'static str, reconciler: R) -> Self {
        Self {
            name,
            reconciler,
            config: RunnerConfig::default(),
            stats: Arc::new(ReconcileStats::default()),
        }
    }

    /// Replace the runner configuration.
    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Shared handle to the controller's counters.
    pub fn stats(&self) -> Arc<ReconcileStats> {
        self.stats.clone()
    }

    /// The wrapped reconciler, for state that outlives a single pass.
    pub fn reconciler(&self) -> &R {
        &self.reconciler
    }

    /// Run the controller against `store` until shutdown.
    pub async fn run<K: Object>(&self, store: &MemoryStore<K>, mut shutdown: watch::Receiver<bool>) {
        info!(
            controller = self.name,
            kind = K::KIND,
            resync_secs = self.config.resync_interval.as_secs(),
            "Starting controller"
        );

        let (queue_tx, mut queue_rx) = mpsc::unbounded_channel::<ObjectKey>();
        let mut events = store.watch();
        let mut retries = RetryTracker::new(self.config.retry_window);

        // Seed with everything already stored.
        for object in store.list_all().await {
            let _ = queue_tx.send(object.key());
        }

        let mut resync = tokio::time::interval(self.config.resync_interval);
        // Seeding covered the immediate tick - wait for the first interval
        resync.tick().await;

        loop {
            tokio::select! {
                Some(key) = queue_rx.recv() => {
                    self.process(key, &queue_tx, &mut retries).await;
                }
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            let _ = queue_tx.send(event.key());
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(
                                controller = self.name,
                                missed,
                                "Watch lagged; resync will recover"
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            warn!(controller = self.name, "Watch channel closed");
                            break;
                        }
                    }
                }
                _ = resync.tick() => {
                    let objects = store.list_all().await;
                    debug!(
                        controller = self.name,
                        count = objects.len(),
                        "Resync"
                    );
                    for object in objects {
                        let _ = queue_tx.send(object.key());
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(controller = self.name, "Controller shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn process(
        &self,
        key: ObjectKey,
        queue: &mpsc::UnboundedSender<ObjectKey>,
        retries: &mut RetryTracker,
    ) {
        self.stats.reconciles.fetch_add(1, Ordering::SeqCst);

        match self.reconciler.reconcile(&key).await {
            Ok(Outcome::Done) => {
                retries.clear(&key);
                debug!(controller = self.name, key = %key, "Reconciled");
            }
            Ok(Outcome::Requeue) => {
                requeue_later(queue.clone(), key, self.config.backoff.base);
            }
            Ok(Outcome::RequeueAfter(delay)) => {
                requeue_later(queue.clone(), key, delay);
            }
            Err(err) => {
                self.stats.failures.fetch_add(1, Ordering::SeqCst);
                let attempt = retries.record_failure(&key);
                let delay = self.config.backoff.delay(attempt);

                if err.is_transient() {
                    debug!(
                        controller = self.name,
                        key = %key,
                        error = %err,
                        attempt,
                        "Reconciliation conflicted, retrying"
                    );
                } else {
                    warn!(
                        controller = self.name,
                        key = %key,
                        error = %err,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Reconciliation failed"
                    );
                }
                requeue_later(queue.clone(), key, delay);
            }
        }
    }
}

/// Re-deliver `key` after `delay`.
fn requeue_later(queue: mpsc::UnboundedSender<ObjectKey>, key: ObjectKey, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = queue.send(key);
    });
}
