use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use kube::{Resource, ResourceExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::syncer::config::{ConfigHolder, SyncerConfig};
use crate::syncer::contexts::{ContextProvider, RemoteCluster};
use crate::syncer::options::{
    ownership_selector, SyncOptions, ORIGIN_ANNOTATION, ORIGIN_CLUSTER_LABEL, ORIGIN_NAME_LABEL,
    ORIGIN_NAMESPACE_LABEL, SYNC_ANNOTATION, SYNC_CONTEXTS_ANNOTATION,
};
use crate::syncer::resource::SyncedResource;
use crate::syncer::store::ClusterOps;
use crate::{Error, Result};

/// Source object coordinates recorded on every replica under the origin
/// annotation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

impl SourceReference {
    fn of<K: SyncedResource>(source: &K) -> Self {
        SourceReference {
            api_version: K::api_version(&()).into_owned(),
            kind: K::kind(&()).into_owned(),
            name: source.name_any(),
            namespace: source.namespace().unwrap_or_default(),
            uid: source.meta().uid.clone(),
            resource_version: source.meta().resource_version.clone(),
        }
    }
}

/// Converts one source-object change into the replica mutations needed to
/// converge on the population its annotations ask for. One engine is
/// instantiated per resource kind; every pass recomputes desired and actual
/// state from scratch.
pub struct SyncEngine<K: SyncedResource> {
    config: Arc<ConfigHolder>,
    local: Arc<dyn ClusterOps<K>>,
    contexts: Arc<dyn ContextProvider<K>>,
}

impl<K: SyncedResource> SyncEngine<K> {
    pub fn new(
        config: Arc<ConfigHolder>,
        local: Arc<dyn ClusterOps<K>>,
        contexts: Arc<dyn ContextProvider<K>>,
    ) -> Self {
        SyncEngine {
            config,
            local,
            contexts,
        }
    }

    /// Converges replicas after the source was created or updated.
    pub async fn sync_on_change(&self, source: &K) -> Result<()> {
        let config = self.config.snapshot();
        let name = source.name_any();
        let source_ns = source.namespace().unwrap(); // we know that K is namespaced
        let options = SyncOptions::parse(source.annotations());

        info!("Syncing {} \"{}\" in {}", K::kind(&()), name, source_ns);

        // Resolve every selected context up front: configuration errors must
        // fail the pass before any mutation is attempted.
        let selected = self.resolve_selected(&options.contexts).await?;

        let selector = ownership_selector(&name, &source_ns, &config.cluster_name);
        let mut old_ns = self.local.list_replica_namespaces(&selector).await?;
        old_ns.remove(&source_ns);

        match options.namespace_selector.as_deref() {
            Some(ns_selector) => {
                let mut new_ns = self.local.list_namespaces(ns_selector).await?;
                new_ns.remove(&source_ns);
                for stale in old_ns.difference(&new_ns) {
                    info!(
                        "Deleting replica {} \"{}\" from {}",
                        K::kind(&()),
                        name,
                        stale
                    );
                    self.local.delete(stale, &name).await?;
                }
                for target in &new_ns {
                    self.upsert(self.local.as_ref(), source, target, &config)
                        .await?;
                }
            }
            None => {
                for stale in &old_ns {
                    info!(
                        "Deleting replica {} \"{}\" from {}",
                        K::kind(&()),
                        name,
                        stale
                    );
                    self.local.delete(stale, &name).await?;
                }
            }
        }

        for remote in &selected {
            let target_ns = remote
                .namespace
                .clone()
                .unwrap_or_else(|| source_ns.clone());
            if remote.address == config.cluster_address && target_ns == source_ns {
                // No object may replicate into its own (cluster, namespace)
                // coordinate.
                debug!(
                    "Skipping context \"{}\": it resolves to the source's own location",
                    remote.name
                );
                continue;
            }
            self.upsert(remote.ops.as_ref(), source, &target_ns, &config)
                .await?;
        }

        self.prune_stale_contexts(&name, &options.contexts, &selector, &config)
            .await;
        Ok(())
    }

    /// Tears down every replica after the source itself was deleted. The
    /// object's own deletion overrides whatever its last annotations said.
    pub async fn sync_on_delete(&self, source: &K) -> Result<()> {
        let config = self.config.snapshot();
        let name = source.name_any();
        let source_ns = source.namespace().unwrap(); // we know that K is namespaced

        info!(
            "Tearing down replicas of deleted {} \"{}\" in {}",
            K::kind(&()),
            name,
            source_ns
        );

        let selector = ownership_selector(&name, &source_ns, &config.cluster_name);
        let mut old_ns = self.local.list_replica_namespaces(&selector).await?;
        old_ns.remove(&source_ns);
        for stale in &old_ns {
            self.local.delete(stale, &name).await?;
        }

        self.prune_stale_contexts(&name, &BTreeSet::new(), &selector, &config)
            .await;
        Ok(())
    }

    /// Replicates matching sources into one newly-created namespace, without
    /// touching replicas anywhere else.
    pub async fn sync_namespace_created(&self, namespace: &str) -> Result<()> {
        let config = self.config.snapshot();
        for source in self.local.list_sources().await? {
            let options = SyncOptions::parse(source.annotations());
            let Some(ns_selector) = options.namespace_selector.as_deref() else {
                continue;
            };
            let source_ns = source.namespace().unwrap(); // we know that K is namespaced
            if source_ns == namespace {
                continue;
            }
            if !self
                .local
                .list_namespaces(ns_selector)
                .await?
                .contains(namespace)
            {
                continue;
            }
            self.upsert(self.local.as_ref(), &source, namespace, &config)
                .await?;
        }
        Ok(())
    }

    async fn resolve_selected(&self, names: &BTreeSet<String>) -> Result<Vec<RemoteCluster<K>>> {
        let mut resolved: Vec<RemoteCluster<K>> = Vec::with_capacity(names.len());
        for name in names {
            let remote = self.contexts.resolve(name).await?;
            if let Some(previous) = resolved
                .iter()
                .find(|other| other.address == remote.address)
            {
                return Err(Error::DuplicateContextAddress {
                    first: previous.name.clone(),
                    second: remote.name.clone(),
                    address: remote.address,
                });
            }
            resolved.push(remote);
        }
        Ok(resolved)
    }

    /// Creates the replica if absent, otherwise overwrites its payload and
    /// merges labels and annotations. A replica recorded against a different
    /// origin cluster is overwritten, but the conflict is surfaced as a
    /// warning event first.
    async fn upsert(
        &self,
        ops: &dyn ClusterOps<K>,
        source: &K,
        target_ns: &str,
        config: &SyncerConfig,
    ) -> Result<()> {
        let name = source.name_any();
        let desired_labels = desired_labels(source, config);
        let desired_annotations = desired_annotations(source)?;

        match ops.get(target_ns, &name).await? {
            None => {
                let mut replica = source.duplicate();
                let meta = replica.meta_mut();
                meta.name = Some(name.clone());
                meta.namespace = Some(target_ns.to_string());
                meta.labels = Some(desired_labels);
                meta.annotations = Some(desired_annotations);
                info!(
                    "Creating replica {} \"{}\" in {}",
                    K::kind(&()),
                    name,
                    target_ns
                );
                ops.create(target_ns, &replica).await
            }
            Some(mut existing) => {
                if let Some(previous) = existing.labels().get(ORIGIN_CLUSTER_LABEL) {
                    if previous != &config.cluster_name {
                        self.local
                            .record_warning(
                                source,
                                "OriginConflict",
                                format!(
                                    "replica \"{}\" in {} was owned by origin cluster \"{}\", overwriting as \"{}\"",
                                    name, target_ns, previous, config.cluster_name
                                ),
                            )
                            .await;
                    }
                }

                let mut changed = !existing.payload_eq(source);
                if changed {
                    existing.copy_payload(source);
                }
                let meta = existing.meta_mut();
                let labels = meta.labels.get_or_insert_with(BTreeMap::new);
                for (key, value) in desired_labels {
                    if labels.get(&key) != Some(&value) {
                        labels.insert(key, value);
                        changed = true;
                    }
                }
                let annotations = meta.annotations.get_or_insert_with(BTreeMap::new);
                for (key, value) in desired_annotations {
                    if annotations.get(&key) != Some(&value) {
                        annotations.insert(key, value);
                        changed = true;
                    }
                }

                if changed {
                    info!(
                        "Updating replica {} \"{}\" in {}",
                        K::kind(&()),
                        name,
                        target_ns
                    );
                    ops.update(target_ns, &name, &existing).await
                } else {
                    debug!(
                        "Replica {} \"{}\" in {} is already in sync",
                        K::kind(&()),
                        name,
                        target_ns
                    );
                    Ok(())
                }
            }
        }
    }

    /// Deletes replicas from every configured context the source no longer
    /// selects. Best-effort: failures are logged and the loop moves on to
    /// the next context.
    async fn prune_stale_contexts(
        &self,
        name: &str,
        selected: &BTreeSet<String>,
        selector: &str,
        config: &SyncerConfig,
    ) {
        for context_name in self.contexts.names() {
            if selected.contains(&context_name) {
                continue;
            }
            let remote = match self.contexts.resolve(&context_name).await {
                Ok(remote) => remote,
                Err(e) => {
                    warn!(
                        "Skipping stale-replica cleanup in context \"{}\": {e:?}",
                        context_name
                    );
                    continue;
                }
            };
            // The in-cluster convergence path owns replicas in our own
            // cluster.
            if remote.address == config.cluster_address {
                continue;
            }
            let stale = match remote.ops.list_replica_namespaces(selector).await {
                Ok(stale) => stale,
                Err(e) => {
                    warn!(
                        "Failed to look for stale replicas of \"{}\" in context \"{}\": {e:?}",
                        name, context_name
                    );
                    continue;
                }
            };
            for stale_ns in stale {
                info!(
                    "Deleting stale replica {} \"{}\" from {} (context \"{}\")",
                    K::kind(&()),
                    name,
                    stale_ns,
                    context_name
                );
                if let Err(e) = remote.ops.delete(&stale_ns, name).await {
                    warn!(
                        "Failed to delete stale replica \"{}\" in {} (context \"{}\"): {e:?}",
                        name, stale_ns, context_name
                    );
                }
            }
        }
    }
}

fn desired_labels<K: SyncedResource>(source: &K, config: &SyncerConfig) -> BTreeMap<String, String> {
    let mut labels = source.labels().clone();
    labels.insert(ORIGIN_NAME_LABEL.to_string(), source.name_any());
    labels.insert(
        ORIGIN_NAMESPACE_LABEL.to_string(),
        source.namespace().unwrap_or_default(),
    );
    labels.insert(
        ORIGIN_CLUSTER_LABEL.to_string(),
        config.cluster_name.clone(),
    );
    labels
}

fn desired_annotations<K: SyncedResource>(source: &K) -> Result<BTreeMap<String, String>> {
    let mut annotations = source.annotations().clone();
    // Replicas must not themselves look like sync sources.
    annotations.remove(SYNC_ANNOTATION);
    annotations.remove(SYNC_CONTEXTS_ANNOTATION);
    annotations.insert(
        ORIGIN_ANNOTATION.to_string(),
        serde_json::to_string(&SourceReference::of(source)).map_err(Error::SerializationError)?,
    );
    Ok(annotations)
}
