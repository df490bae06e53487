//! Object keys: `namespace/name` for namespaced objects, `name` otherwise.

use kube::Resource;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("malformed object key {0:?}")]
    Malformed(String),
}

/// Compose the store key for `name` in `namespace`. An empty namespace means cluster-scoped.
pub fn object_key(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{ns}/{name}"),
        _ => name.to_string(),
    }
}

/// Store key of an object, read from its metadata.
pub fn key_of<K: Resource>(obj: &K) -> String {
    let meta = obj.meta();
    object_key(meta.namespace.as_deref(), meta.name.as_deref().unwrap_or(""))
}

/// Split a key back into `(namespace, name)`.
pub fn split_key(key: &str) -> Result<(Option<&str>, &str), KeyError> {
    let mut parts = key.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), None, None) if !name.is_empty() => Ok((None, name)),
        (Some(ns), Some(name), None) if !ns.is_empty() && !name.is_empty() => Ok((Some(ns), name)),
        _ => Err(KeyError::Malformed(key.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
    use kube::core::ObjectMeta;

    #[test]
    fn compose_namespaced_and_cluster_scoped() {
        assert_eq!(object_key(Some("ns1"), "a"), "ns1/a");
        assert_eq!(object_key(None, "node-1"), "node-1");
        assert_eq!(object_key(Some(""), "node-1"), "node-1");
    }

    #[test]
    fn key_of_reads_metadata() {
        let cm = ConfigMap {
            metadata: ObjectMeta { name: Some("cfg".into()), namespace: Some("prod".into()), ..Default::default() },
            ..Default::default()
        };
        assert_eq!(key_of(&cm), "prod/cfg");

        let ns = Namespace {
            metadata: ObjectMeta { name: Some("prod".into()), ..Default::default() },
            ..Default::default()
        };
        assert_eq!(key_of(&ns), "prod");
    }

    #[test]
    fn split_reverses_compose() {
        assert_eq!(split_key("ns1/a"), Ok((Some("ns1"), "a")));
        assert_eq!(split_key("node-1"), Ok((None, "node-1")));
        let k = object_key(Some("kube-system"), "coredns");
        assert_eq!(split_key(&k), Ok((Some("kube-system"), "coredns")));
    }

    #[test]
    fn split_rejects_malformed() {
        for bad in ["", "a/b/c", "/a", "a/", "/"] {
            assert_eq!(split_key(bad), Err(KeyError::Malformed(bad.to_string())), "{bad:?}");
        }
    }
}
