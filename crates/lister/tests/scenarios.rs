#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use kindex_core::{key_of, Everything, Labels};
use kindex_lister::{Lister, ListerError};
use kindex_store::Cache;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};

fn widget_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk("example.com", "v1", "Widget"))
}

fn widget(ns: &str, name: &str, labels: &[(&str, &str)]) -> DynamicObject {
    let mut o = DynamicObject::new(name, &widget_resource())
        .within(ns)
        .data(serde_json::json!({ "spec": { "size": 1 } }));
    let labels: BTreeMap<String, String> = labels.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
    o.metadata.labels = Some(labels);
    o
}

fn cache_with(items: Vec<DynamicObject>) -> Arc<Cache<DynamicObject>> {
    let cache = Arc::new(Cache::new());
    cache.replace(items.into_iter().map(Arc::new).collect());
    cache
}

fn lister(cache: &Arc<Cache<DynamicObject>>) -> Lister<DynamicObject> {
    Lister::<DynamicObject>::new_with(cache.clone(), &widget_resource())
}

fn keys(items: &[Arc<DynamicObject>]) -> Vec<String> {
    let mut out: Vec<String> = items.iter().map(|o| key_of(o.as_ref())).collect();
    out.sort_unstable();
    out
}

fn tier_is(tier: &'static str) -> impl Fn(&Labels) -> bool + Send + Sync {
    move |l: &Labels| l.get("tier").map(String::as_str) == Some(tier)
}

#[test]
fn namespaced_list_returns_only_that_namespace() {
    let cache = cache_with(vec![widget("ns1", "a", &[]), widget("ns1", "b", &[]), widget("ns2", "a", &[])]);
    let got = lister(&cache).namespaced("ns1").list(&Everything).unwrap();
    assert_eq!(keys(&got), vec!["ns1/a", "ns1/b"]);
}

#[test]
fn get_on_empty_cache_is_not_found_naming_kind_and_name() {
    let cache = cache_with(Vec::new());
    let err = lister(&cache).namespaced("x").get("missing").unwrap_err();
    match &err {
        ListerError::NotFound { resource, name } => {
            assert_eq!(resource.resource, "widget");
            assert_eq!(resource.group, "example.com");
            assert_eq!(name, "missing");
        }
        other => panic!("expected NotFound, got {other:?}"),
    }
    assert!(kindex_lister::is_not_found(&err));
}

#[test]
fn selector_keeps_only_matching_objects() {
    let cache = cache_with(vec![
        widget("ns1", "api", &[("tier", "backend")]),
        widget("ns1", "web", &[("tier", "frontend")]),
        widget("ns2", "cdn", &[]),
    ]);
    let got = lister(&cache).list(&tier_is("backend")).unwrap();
    assert_eq!(keys(&got), vec!["ns1/api"]);
}

#[test]
fn everything_returns_whole_store() {
    let items = vec![widget("ns1", "a", &[]), widget("ns2", "b", &[]), widget("ns3", "c", &[("x", "y")])];
    let cache = cache_with(items);
    let got = lister(&cache).list(&Everything).unwrap();
    let mut expected = cache.list_keys();
    expected.sort_unstable();
    assert_eq!(keys(&got), expected);
    assert_eq!(got.len(), 3);
}

#[test]
fn namespace_scoping_is_a_subset_and_commutes_with_filtering() {
    let cache = cache_with(vec![
        widget("ns1", "a", &[("tier", "backend")]),
        widget("ns1", "b", &[("tier", "frontend")]),
        widget("ns2", "a", &[("tier", "backend")]),
        widget("ns2", "c", &[]),
    ]);
    let l = lister(&cache);
    let sel = tier_is("backend");

    let all = l.list(&Everything).unwrap();
    let filtered_all = l.list(&sel).unwrap();
    let manual: Vec<Arc<DynamicObject>> = all
        .iter()
        .filter(|o| o.metadata.labels.as_ref().and_then(|m| m.get("tier")).map(String::as_str) == Some("backend"))
        .cloned()
        .collect();
    assert_eq!(keys(&filtered_all), keys(&manual));

    for ns in ["ns1", "ns2", "ns3"] {
        let scoped = l.namespaced(ns).list(&sel).unwrap();
        assert!(scoped.iter().all(|o| o.metadata.namespace.as_deref() == Some(ns)));
        let expected: Vec<Arc<DynamicObject>> =
            filtered_all.iter().filter(|o| o.metadata.namespace.as_deref() == Some(ns)).cloned().collect();
        assert_eq!(keys(&scoped), keys(&expected), "namespace {ns}");
    }
}

#[test]
fn get_returns_object_iff_present() {
    let cache = cache_with(vec![widget("ns1", "a", &[]), widget("ns2", "b", &[])]);
    let l = lister(&cache);

    let a = l.namespaced("ns1").get("a").unwrap();
    assert_eq!(a.metadata.name.as_deref(), Some("a"));
    assert_eq!(a.data["spec"]["size"], 1);

    // same name, other namespace
    assert!(l.namespaced("ns2").get("a").unwrap_err().is_not_found());
    assert!(l.namespaced("ns1").get("b").unwrap_err().is_not_found());
}

#[test]
fn repeated_reads_are_stable_on_unchanged_cache() {
    let cache = cache_with(vec![widget("ns1", "a", &[]), widget("ns1", "b", &[]), widget("ns2", "a", &[])]);
    let l = lister(&cache);
    let first = l.namespaced("ns1").get("b").unwrap();
    let second = l.namespaced("ns1").get("b").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(keys(&l.list(&Everything).unwrap()), keys(&l.list(&Everything).unwrap()));
}

#[test]
fn listers_observe_later_writes() {
    let cache = cache_with(Vec::new());
    let ns1 = lister(&cache).namespaced("ns1");
    assert!(ns1.list(&Everything).unwrap().is_empty());

    cache.add(widget("ns1", "a", &[]));
    assert_eq!(keys(&ns1.list(&Everything).unwrap()), vec!["ns1/a"]);
    assert!(ns1.get("a").is_ok());

    cache.delete(widget("ns1", "a", &[]));
    assert!(ns1.get("a").unwrap_err().is_not_found());
    assert!(ns1.list(&Everything).unwrap().is_empty());
}
