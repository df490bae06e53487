//! kindex listers: typed, read-only views over a shared [`Indexer`].
//!
//! A [`Lister`] serves one object kind across the whole cache and narrows to a
//! [`NamespaceLister`] for namespace-scoped listing and lookups. Listers own no
//! state besides the indexer handle, so they are cheap to build and clone and
//! may be shared freely between threads. Each call reads whatever the indexer
//! holds at that moment; two calls may observe different contents.

#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;

use kindex_core::{object_key, GroupResource, Indexer, IndexerError, Selector};
use kube::Resource;
use tracing::debug;

mod list;

pub use list::{list_all, list_all_by_namespace};

#[derive(Debug, thiserror::Error)]
pub enum ListerError {
    /// No object is stored under the requested name.
    #[error("{resource} \"{name}\" not found")]
    NotFound { resource: GroupResource, name: String },
    #[error(transparent)]
    Indexer(#[from] IndexerError),
}

impl ListerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ListerError::NotFound { .. })
    }
}

/// True if `err`, or any error in its source chain, is a [`ListerError::NotFound`].
pub fn is_not_found(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut cur = Some(err);
    while let Some(e) = cur {
        if e.downcast_ref::<ListerError>().is_some_and(ListerError::is_not_found) {
            return true;
        }
        cur = e.source();
    }
    false
}

/// Lists and gets objects of kind `K` from a shared indexer.
pub struct Lister<K> {
    indexer: Arc<dyn Indexer<K>>,
    resource: GroupResource,
}

impl<K> Clone for Lister<K> {
    fn clone(&self) -> Self {
        Self { indexer: Arc::clone(&self.indexer), resource: self.resource.clone() }
    }
}

impl<K> fmt::Debug for Lister<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lister").field("resource", &self.resource).finish_non_exhaustive()
    }
}

impl<K: Resource + 'static> Lister<K> {
    pub fn new(indexer: Arc<dyn Indexer<K>>) -> Self
    where
        K::DynamicType: Default,
    {
        Self::new_with(indexer, &Default::default())
    }

    /// Lister for a kind known only at runtime, e.g. `DynamicObject` with an `ApiResource`.
    pub fn new_with(indexer: Arc<dyn Indexer<K>>, dt: &K::DynamicType) -> Self {
        Self { indexer, resource: GroupResource::of::<K>(dt) }
    }

    pub fn resource(&self) -> &GroupResource {
        &self.resource
    }

    /// All objects matching `selector`, in no particular order.
    pub fn list<S: Selector + ?Sized>(&self, selector: &S) -> Result<Vec<Arc<K>>, ListerError> {
        let mut out = Vec::new();
        list_all(self.indexer.as_ref(), selector, |obj| out.push(obj))?;
        Ok(out)
    }

    /// Get a cluster-scoped object by name.
    pub fn get(&self, name: &str) -> Result<Arc<K>, ListerError> {
        lookup(self.indexer.as_ref(), &self.resource, &object_key(None, name), name)
    }

    /// View restricted to `namespace`. The namespace is not checked for existence.
    pub fn namespaced(&self, namespace: impl Into<String>) -> NamespaceLister<K> {
        NamespaceLister {
            indexer: Arc::clone(&self.indexer),
            resource: self.resource.clone(),
            namespace: namespace.into(),
        }
    }
}

/// Lists and gets objects of kind `K` within one namespace.
pub struct NamespaceLister<K> {
    indexer: Arc<dyn Indexer<K>>,
    resource: GroupResource,
    namespace: String,
}

impl<K> Clone for NamespaceLister<K> {
    fn clone(&self) -> Self {
        Self { indexer: Arc::clone(&self.indexer), resource: self.resource.clone(), namespace: self.namespace.clone() }
    }
}

impl<K> fmt::Debug for NamespaceLister<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamespaceLister")
            .field("resource", &self.resource)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl<K: Resource + 'static> NamespaceLister<K> {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Objects in this namespace matching `selector`. An empty result is not an error.
    pub fn list<S: Selector + ?Sized>(&self, selector: &S) -> Result<Vec<Arc<K>>, ListerError> {
        let mut out = Vec::new();
        list_all_by_namespace(self.indexer.as_ref(), &self.namespace, selector, |obj| out.push(obj))?;
        Ok(out)
    }

    /// Get the object named `name` in this namespace.
    pub fn get(&self, name: &str) -> Result<Arc<K>, ListerError> {
        lookup(self.indexer.as_ref(), &self.resource, &object_key(Some(&self.namespace), name), name)
    }
}

fn lookup<K>(indexer: &dyn Indexer<K>, resource: &GroupResource, key: &str, name: &str) -> Result<Arc<K>, ListerError> {
    match indexer.get_by_key(key)? {
        Some(obj) => Ok(obj),
        None => {
            debug!(resource = %resource, key, "object not in cache");
            Err(ListerError::NotFound { resource: resource.clone(), name: name.to_string() })
        }
    }
}
