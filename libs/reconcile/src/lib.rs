//! Reconciliation loop primitives.
//!
//! This library provides the pieces shared by every control loop:
//!
//! - [`Outcome`]: what a reconcile pass asks the runner to do next.
//! - [`ReconcileError`]: the error taxonomy. Transient store trouble is
//!   retried and never persisted as a domain failure; domain failures are
//!   recorded in resource status and also returned so the generic retry
//!   still applies.
//! - [`BackoffPolicy`] and [`RetryTracker`]: exponential retry delays,
//!   tracked per object key.
//!
//! # Invariants
//!
//! - Reconcile passes are safe to repeat on an unchanged object.
//! - Phases only move forward; a terminal phase ends processing.
//! - Errors never suppress each other: a status write failing while an
//!   error is being reported is logged, and the original error is what
//!   propagates.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use cryo_api::ObjectKey;
use cryo_store::StoreError;
use thiserror::Error;

/// What a reconcile pass asks the runner to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing further to do until the object changes again.
    Done,

    /// Run another pass soon.
    Requeue,

    /// Run another pass after the given delay.
    RequeueAfter(Duration),
}

impl Outcome {
    pub fn requeue_after(delay: Duration) -> Self {
        Self::RequeueAfter(delay)
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Malformed data on the resource itself; retrying without a spec
    /// change cannot succeed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The schedule's cron expression does not parse.
    #[error("invalid cron expression {expression:?}: {reason}")]
    InvalidSchedule { expression: String, reason: String },

    /// The referenced workload instance does not exist.
    #[error("workload instance {key} not found")]
    InstanceNotFound { key: ObjectKey },

    /// No restorable checkpoint exists for the instance.
    #[error("no checkpoint available for instance {key}")]
    NoCheckpointAvailable { key: ObjectKey },

    /// A delegated capture or build/push call failed. Recorded in the
    /// owning resource's status and returned, intentionally both.
    #[error("{operation} failed: {message}")]
    ExternalService {
        operation: &'static str,
        message: String,
    },

    /// Store trouble; recovered by the generic retry, never written into
    /// a resource's failed phase.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReconcileError {
    /// True for errors the generic retry is expected to clear on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_conflict())
    }

    pub fn external(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::ExternalService {
            operation,
            message: err.to_string(),
        }
    }
}

/// Exponential backoff configuration.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Base delay for the first retry.
    pub base: Duration,

    /// Maximum delay.
    pub max: Duration,

    /// Jitter factor (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            max: Duration::from_secs(30),
            jitter: 0.25,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the given retry attempt (first failure is attempt 1).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let delay = self.base.as_millis() as f64 * 2.0_f64.powi(exponent);
        let delay = delay.min(self.max.as_millis() as f64);

        let jitter_range = delay * self.jitter;
        let jittered = delay + rand_jitter(jitter_range);

        Duration::from_millis(jittered.max(0.0) as u64)
    }
}

/// Jitter from a clock-seeded LCG, so no rand dependency is needed.
fn rand_jitter(range: f64) -> f64 {
    use std::time::SystemTime;
    let seed = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let random = (seed.wrapping_mul(6364136223846793005).wrapping_add(1)) as f64;
    let normalized = (random / u64::MAX as f64) * 2.0 - 1.0; // -1.0 to 1.0
    normalized * range
}

/// Per-key failure counting for backoff, with a window after which stale
/// counts reset.
#[derive(Debug)]
pub struct RetryTracker {
    window: Duration,
    failures: BTreeMap<ObjectKey, (u32, Instant)>,
}

impl RetryTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            failures: BTreeMap::new(),
        }
    }

    /// Record a failure and return the attempt count it represents.
    pub fn record_failure(&mut self, key: &ObjectKey) -> u32 {
        let now = Instant::now();
        let (count, first) = self.failures.entry(key.clone()).or_insert((0, now));

        // Reset if outside window
        if now.duration_since(*first) > self.window {
            *count = 0;
            *first = now;
        }

        *count += 1;
        *count
    }

    /// Clear failure tracking for a key (on success).
    pub fn clear(&mut self, key: &ObjectKey) {
        self.failures.remove(key);
    }

    pub fn attempts(&self, key: &ObjectKey) -> u32 {
        self.failures.get(key).map(|(count, _)| *count).unwrap_or(0)
    }
}

impl Default for RetryTracker {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_WINDOW)
    }
}

/// Default interval between full resyncs of a watched kind.
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Default window after which a key's failure count resets.
pub const DEFAULT_RETRY_WINDOW: Duration = Duration::from_secs(10 * 60); // 10 minutes

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_exponentially() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(100),
            max: Duration::from_secs(30),
            jitter: 0.0,
        };

        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_clamps_at_max() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(100),
            max: Duration::from_secs(30),
            jitter: 0.0,
        };

        assert_eq!(policy.delay(20), Duration::from_secs(30));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_jitter_stays_in_range() {
        let policy = BackoffPolicy::default();
        for attempt in 1..10 {
            let base = BackoffPolicy {
                jitter: 0.0,
                ..policy.clone()
            }
            .delay(attempt);
            let jittered = policy.delay(attempt);

            let spread = base.as_millis() as f64 * policy.jitter + 1.0;
            let diff = (jittered.as_millis() as f64 - base.as_millis() as f64).abs();
            assert!(diff <= spread, "attempt {attempt}: diff {diff} > {spread}");
        }
    }

    #[test]
    fn test_retry_tracker_counts_and_clears() {
        let mut tracker = RetryTracker::new(Duration::from_secs(60));
        let key = ObjectKey::new("prod", "web-1");

        assert_eq!(tracker.record_failure(&key), 1);
        assert_eq!(tracker.record_failure(&key), 2);
        assert_eq!(tracker.attempts(&key), 2);

        tracker.clear(&key);
        assert_eq!(tracker.attempts(&key), 0);
        assert_eq!(tracker.record_failure(&key), 1);
    }

    #[test]
    fn test_retry_tracker_window_reset() {
        let mut tracker = RetryTracker::new(Duration::from_millis(0));
        let key = ObjectKey::new("prod", "web-1");

        tracker.record_failure(&key);
        std::thread::sleep(Duration::from_millis(5));
        // Outside the window the count starts over.
        assert_eq!(tracker.record_failure(&key), 1);
    }

    #[test]
    fn test_transient_classification() {
        let conflict = ReconcileError::Store(StoreError::Conflict {
            kind: "Schedule",
            key: ObjectKey::new("prod", "nightly"),
            expected: 1,
            found: 2,
        });
        assert!(conflict.is_transient());

        let validation = ReconcileError::Validation("bad path".into());
        assert!(!validation.is_transient());

        let missing = ReconcileError::Store(StoreError::NotFound {
            kind: "Schedule",
            key: ObjectKey::new("prod", "nightly"),
        });
        assert!(!missing.is_transient());
    }

    #[test]
    fn test_error_messages_name_the_object() {
        let err = ReconcileError::InstanceNotFound {
            key: ObjectKey::new("prod", "web-1"),
        };
        assert_eq!(err.to_string(), "workload instance prod/web-1 not found");

        let err = ReconcileError::external("checkpoint capture", "connection refused");
        assert_eq!(
            err.to_string(),
            "checkpoint capture failed: connection refused"
        );
    }
}
