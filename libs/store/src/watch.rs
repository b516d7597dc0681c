//! Watch events emitted by stores.

use cryo_api::{Object, ObjectKey};

/// A change to one object, delivered to watch subscribers.
#[derive(Debug, Clone)]
pub enum WatchEvent<R> {
    Added(R),
    Modified(R),
    Deleted(R),
}

impl<R: Object> WatchEvent<R> {
    pub fn object(&self) -> &R {
        match self {
            Self::Added(obj) | Self::Modified(obj) | Self::Deleted(obj) => obj,
        }
    }

    pub fn key(&self) -> ObjectKey {
        self.object().key()
    }
}
