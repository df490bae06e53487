//! Selector-filtered enumeration over an indexer.

use std::sync::Arc;

use kindex_core::{Indexer, IndexerError, Selector, NAMESPACE_ALL, NAMESPACE_INDEX};
use kube::{Resource, ResourceExt};
use tracing::warn;

/// Visit every object whose labels match `selector`.
pub fn list_all<K, S>(indexer: &dyn Indexer<K>, selector: &S, mut visit: impl FnMut(Arc<K>)) -> Result<(), IndexerError>
where
    K: Resource,
    S: Selector + ?Sized,
{
    let items = indexer.list()?;
    if selector.is_everything() {
        items.into_iter().for_each(visit);
        return Ok(());
    }
    for obj in items {
        if selector.matches(obj.labels()) {
            visit(obj);
        }
    }
    Ok(())
}

/// Visit every object in `namespace` whose labels match `selector`.
///
/// [`NAMESPACE_ALL`] lists every namespace. Without a namespace index the
/// whole store is scanned instead.
pub fn list_all_by_namespace<K, S>(
    indexer: &dyn Indexer<K>,
    namespace: &str,
    selector: &S,
    mut visit: impl FnMut(Arc<K>),
) -> Result<(), IndexerError>
where
    K: Resource,
    S: Selector + ?Sized,
{
    if namespace == NAMESPACE_ALL {
        return list_all(indexer, selector, visit);
    }

    let items = match indexer.by_index(NAMESPACE_INDEX, namespace) {
        Ok(items) => items,
        Err(IndexerError::IndexNotFound(index)) => {
            warn!(index = %index, namespace, "cannot list by namespace index; scanning all objects");
            for obj in indexer.list()? {
                if obj.meta().namespace.as_deref().unwrap_or("") == namespace && selector.matches(obj.labels()) {
                    visit(obj);
                }
            }
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let everything = selector.is_everything();
    for obj in items {
        if everything || selector.matches(obj.labels()) {
            visit(obj);
        }
    }
    Ok(())
}
