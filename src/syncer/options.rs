use std::collections::{BTreeMap, BTreeSet};

/// Sync directive on a source object. `""` or `"true"` targets every
/// namespace, any other value is used verbatim as a label selector.
pub const SYNC_ANNOTATION: &str = "kubed.appscode.com/sync";

/// Comma-separated names of remote-cluster contexts that should also
/// receive a replica.
pub const SYNC_CONTEXTS_ANNOTATION: &str = "kubed.appscode.com/sync-contexts";

/// Reference annotation written onto replicas, recording the source
/// object's coordinates as JSON.
pub const ORIGIN_ANNOTATION: &str = "kubed.appscode.com/origin";

pub const ORIGIN_NAME_LABEL: &str = "kubed.appscode.com/origin.name";
pub const ORIGIN_NAMESPACE_LABEL: &str = "kubed.appscode.com/origin.namespace";
pub const ORIGIN_CLUSTER_LABEL: &str = "kubed.appscode.com/origin.cluster";

/// The sync directive decoded from a source object's annotations, recomputed
/// on every reconciliation pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Label selector for target namespaces within the source's own cluster.
    /// `Some("")` matches every namespace; `None` disables in-cluster sync
    /// and tears down any replicas created earlier.
    pub namespace_selector: Option<String>,
    /// Remote-cluster contexts that should hold a replica, independent of the
    /// namespace selector.
    pub contexts: BTreeSet<String>,
}

impl SyncOptions {
    pub fn parse(annotations: &BTreeMap<String, String>) -> Self {
        // Only the exact string "true" is treated as the legacy boolean form.
        let namespace_selector = annotations.get(SYNC_ANNOTATION).map(|value| {
            if value == "true" {
                String::new()
            } else {
                value.clone()
            }
        });

        let contexts = annotations
            .get(SYNC_CONTEXTS_ANNOTATION)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        SyncOptions {
            namespace_selector,
            contexts,
        }
    }
}

/// Label selector matching the replicas of one source object, keyed by the
/// ownership labels written onto every replica.
pub fn ownership_selector(name: &str, namespace: &str, cluster: &str) -> String {
    format!(
        "{ORIGIN_NAME_LABEL}={name},{ORIGIN_NAMESPACE_LABEL}={namespace},{ORIGIN_CLUSTER_LABEL}={cluster}"
    )
}
