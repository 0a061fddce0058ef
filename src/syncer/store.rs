use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::error::ErrorResponse;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Api, Client, Resource, ResourceExt};
use tracing::warn;

use crate::syncer::resource::SyncedResource;
use crate::syncer::CONTROLLER_NAME;
use crate::Result;

/// Object-store operations the sync engine needs from one cluster, primary
/// or remote. Implementations are cheap shared handles, safe for concurrent
/// use from independent reconciliation passes.
#[async_trait]
pub trait ClusterOps<K: SyncedResource>: Send + Sync {
    /// Names of the namespaces matching a label selector. An empty selector
    /// matches every namespace.
    async fn list_namespaces(&self, label_selector: &str) -> Result<BTreeSet<String>>;

    /// Every object of this kind in the cluster, across all namespaces.
    async fn list_sources(&self) -> Result<Vec<K>>;

    /// Namespaces currently holding a replica, discovered by the ownership
    /// label selector.
    async fn list_replica_namespaces(&self, owner_selector: &str) -> Result<BTreeSet<String>>;

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    async fn create(&self, namespace: &str, object: &K) -> Result<()>;

    /// Replaces an existing object with the mutated copy read back from the
    /// API; its resourceVersion provides the optimistic concurrency check.
    async fn update(&self, namespace: &str, name: &str, object: &K) -> Result<()>;

    /// Deleting an object that is already gone is a success, not an error.
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;

    /// Publishes a warning event against the source object. Best-effort: a
    /// failure to record is logged, never propagated.
    async fn record_warning(&self, source: &K, reason: &str, note: String);
}

/// [`ClusterOps`] over a `kube::Client`, used both for the primary cluster
/// and for every resolved remote context.
pub struct KubeCluster {
    client: Client,
    reporter: Arc<Reporter>,
}

impl KubeCluster {
    pub fn new(client: Client, reporter: Arc<Reporter>) -> Self {
        KubeCluster { client, reporter }
    }
}

#[async_trait]
impl<K: SyncedResource> ClusterOps<K> for KubeCluster {
    async fn list_namespaces(&self, label_selector: &str) -> Result<BTreeSet<String>> {
        let namespaces = Api::<Namespace>::all(self.client.clone());
        let mut lp = ListParams::default();
        if !label_selector.is_empty() {
            lp = lp.labels(label_selector);
        }
        Ok(namespaces
            .list(&lp)
            .await?
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    async fn list_sources(&self) -> Result<Vec<K>> {
        let api = Api::<K>::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_replica_namespaces(&self, owner_selector: &str) -> Result<BTreeSet<String>> {
        let api = Api::<K>::all(self.client.clone());
        Ok(api
            .list(&ListParams::default().labels(owner_selector))
            .await?
            .items
            .into_iter()
            .filter_map(|replica| replica.namespace())
            .collect())
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let api = Api::<K>::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create(&self, namespace: &str, object: &K) -> Result<()> {
        let api = Api::<K>::namespaced(self.client.clone(), namespace);
        let mut pp = PostParams::default();
        pp.field_manager = Some(CONTROLLER_NAME.to_string());
        api.create(&pp, object).await?;
        Ok(())
    }

    async fn update(&self, namespace: &str, name: &str, object: &K) -> Result<()> {
        let api = Api::<K>::namespaced(self.client.clone(), namespace);
        let mut pp = PostParams::default();
        pp.field_manager = Some(CONTROLLER_NAME.to_string());
        api.replace(name, &pp, object).await?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let api = Api::<K>::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            // Already gone; watch delivery races make this ordinary.
            Err(kube::Error::Api(ErrorResponse { code: 404, .. })) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn record_warning(&self, source: &K, reason: &str, note: String) {
        let recorder = Recorder::new(
            self.client.clone(),
            (*self.reporter).clone(),
            source.object_ref(&()),
        );
        let event = Event {
            type_: EventType::Warning,
            reason: reason.to_string(),
            note: Some(note),
            action: "Syncing".to_string(),
            secondary: None,
        };
        if let Err(e) = recorder.publish(event).await {
            warn!(
                "Failed to record warning event for {} \"{}\": {e:?}",
                K::kind(&()),
                source.name_any()
            );
        }
    }
}
