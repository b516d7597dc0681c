//! # cryo-store
//!
//! Typed resource store with optimistic concurrency and watch.
//!
//! ## Design Principles
//!
//! - One [`MemoryStore`] per kind; [`Cluster`] bundles the stores the
//!   engine works over.
//! - Writes are conditional: an update whose `resource_version` does not
//!   match the stored object fails with [`StoreError::Conflict`], and the
//!   caller re-fetches and retries rather than overwriting blindly.
//! - Every mutation emits a [`WatchEvent`] with at-least-once delivery
//!   semantics: subscribers that fall behind drop to the next event and
//!   recover through their periodic resync.
//! - Deleting an owner cascades to dependents that carry its owner
//!   reference; the control loops never delete anything themselves.

mod cluster;
mod error;
mod memory;
mod watch;

pub use cluster::Cluster;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use watch::WatchEvent;
