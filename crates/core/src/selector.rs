//! Label selectors are opaque predicates; this crate only defines their shape.

use std::collections::BTreeMap;

/// Object labels as stored in `ObjectMeta`.
pub type Labels = BTreeMap<String, String>;

pub trait Selector: Send + Sync {
    fn matches(&self, labels: &Labels) -> bool;

    /// True when the selector accepts every label set, letting callers skip evaluation.
    fn is_everything(&self) -> bool {
        false
    }
}

/// Selector that matches everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Everything;

impl Selector for Everything {
    fn matches(&self, _labels: &Labels) -> bool {
        true
    }

    fn is_everything(&self) -> bool {
        true
    }
}

impl<F> Selector for F
where
    F: Fn(&Labels) -> bool + Send + Sync,
{
    fn matches(&self, labels: &Labels) -> bool {
        self(labels)
    }
}

/// kube's label selector, covering equality and set-based expressions.
impl Selector for kube::core::Selector {
    fn matches(&self, labels: &Labels) -> bool {
        kube::core::SelectorExt::matches(self, labels)
    }
}
