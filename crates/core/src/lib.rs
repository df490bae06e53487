//! kindex core types: object keys, label selectors, errors and the indexer contract.
//!
//! Listers and stores only meet through the [`Indexer`] trait defined here.

#![forbid(unsafe_code)]

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub mod key;
pub mod selector;

pub use key::{key_of, object_key, split_key, KeyError};
pub use selector::{Everything, Labels, Selector};

/// Namespace value meaning "every namespace" when scoping a listing.
pub const NAMESPACE_ALL: &str = "";

/// Name of the index every namespaced lookup goes through.
pub const NAMESPACE_INDEX: &str = "namespace";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeltaKind {
    Applied,
    Deleted,
}

/// A single change observed by the sync process, applied to a store as-is.
#[derive(Debug)]
pub struct Delta<K> {
    pub kind: DeltaKind,
    pub obj: Arc<K>,
}

impl<K> Clone for Delta<K> {
    fn clone(&self) -> Self {
        Self { kind: self.kind, obj: Arc::clone(&self.obj) }
    }
}

impl<K> Delta<K> {
    pub fn applied(obj: impl Into<Arc<K>>) -> Self {
        Self { kind: DeltaKind::Applied, obj: obj.into() }
    }

    pub fn deleted(obj: impl Into<Arc<K>>) -> Self {
        Self { kind: DeltaKind::Deleted, obj: obj.into() }
    }
}

/// Kind identity carried by errors: `resource` is the lowercased kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct GroupResource {
    pub group: String,
    pub resource: String,
}

impl GroupResource {
    pub fn new(group: impl Into<String>, resource: impl Into<String>) -> Self {
        Self { group: group.into(), resource: resource.into() }
    }

    /// Derive the identity of `K` from its (possibly dynamic) type information.
    pub fn of<K: kube::Resource>(dt: &K::DynamicType) -> Self {
        let group: Cow<'_, str> = K::group(dt);
        Self { group: group.into_owned(), resource: K::kind(dt).to_ascii_lowercase() }
    }
}

impl fmt::Display for GroupResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            f.write_str(&self.resource)
        } else {
            write!(f, "{}.{}", self.resource, self.group)
        }
    }
}

/// Failures raised by an [`Indexer`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    #[error("index {0:?} does not exist")]
    IndexNotFound(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Thread-safe keyed store of objects of one kind.
///
/// Implementations must tolerate concurrent reads while a writer mutates them.
/// Nothing is promised about consistency across two calls.
pub trait Indexer<K>: Send + Sync {
    /// Exact lookup; `Ok(None)` means the key is absent.
    fn get_by_key(&self, key: &str) -> Result<Option<Arc<K>>, IndexerError>;

    /// Every stored object, in implementation-defined order.
    fn list(&self) -> Result<Vec<Arc<K>>, IndexerError>;

    /// Objects whose `index_name` index yields `value`.
    fn by_index(&self, index_name: &str, value: &str) -> Result<Vec<Arc<K>>, IndexerError>;
}

pub mod prelude {
    pub use super::{
        key_of, object_key, split_key, Delta, DeltaKind, Everything, GroupResource, Indexer, IndexerError, Labels,
        Selector, NAMESPACE_ALL, NAMESPACE_INDEX,
    };
}
