//! Object metadata shared by every resource kind.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one object of a given kind within the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Metadata carried by every resource kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,

    #[serde(default)]
    pub namespace: String,

    /// Assigned by the store on create.
    #[serde(default)]
    pub uid: Uuid,

    /// Bumped by the store on every write; conditional updates compare it.
    #[serde(default)]
    pub resource_version: u64,

    /// Assigned by the store on create.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    /// Metadata for a new object, before the store has seen it.
    pub fn named(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }

    /// The controlling owner reference, if one has been set.
    pub fn controller_owner(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|r| r.controller)
    }
}

/// A record linking a dependent resource to the resource that created it.
///
/// Deleting the owner cascades cleanup of the dependent through the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    pub uid: Uuid,

    /// True when the owner manages the dependent's lifecycle.
    #[serde(default)]
    pub controller: bool,
}

/// A reference to another object, carried in spec and status fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectReference {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub uid: Uuid,
}

impl ObjectReference {
    /// Build a reference pointing at `obj`.
    pub fn to<O: Object>(obj: &O) -> Self {
        Self {
            kind: O::KIND.to_string(),
            name: obj.meta().name.clone(),
            namespace: obj.meta().namespace.clone(),
            uid: obj.meta().uid,
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }
}

/// Implemented by every resource kind the store can hold.
pub trait Object: Clone + Send + Sync + 'static {
    /// Kind name as it appears in references and logs.
    const KIND: &'static str;

    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn key(&self) -> ObjectKey {
        self.meta().key()
    }
}

/// Record `owner` as the controlling owner of `dependent`.
///
/// An existing controller reference is replaced; non-controlling
/// references are left alone.
pub fn set_controller_reference<O: Object, D: Object>(owner: &O, dependent: &mut D) {
    let meta = dependent.meta_mut();
    meta.owner_references.retain(|r| !r.controller);
    meta.owner_references.push(OwnerReference {
        kind: O::KIND.to_string(),
        name: owner.meta().name.clone(),
        uid: owner.meta().uid,
        controller: true,
    });
}
