use std::sync::Arc;

use async_trait::async_trait;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::runtime::events::Reporter;
use kube::{Client, Config};

use crate::syncer::config::ConfigHolder;
use crate::syncer::resource::SyncedResource;
use crate::syncer::store::{ClusterOps, KubeCluster};
use crate::{Error, Result};

/// A resolved remote-cluster sync target.
pub struct RemoteCluster<K: SyncedResource> {
    pub name: String,
    /// API address of the remote cluster, used to reject two contexts that
    /// point at the same cluster and to detect self-replication.
    pub address: String,
    /// The context's configured default namespace. When unset, replicas land
    /// in the source object's own namespace.
    pub namespace: Option<String>,
    pub ops: Arc<dyn ClusterOps<K>>,
}

impl<K: SyncedResource> std::fmt::Debug for RemoteCluster<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCluster")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

/// Resolves named remote-cluster contexts for the sync engine.
#[async_trait]
pub trait ContextProvider<K: SyncedResource>: Send + Sync {
    /// All configured context names, selected or not. Contexts no longer
    /// named by a source's annotations are pruned from this set.
    fn names(&self) -> Vec<String>;

    async fn resolve(&self, name: &str) -> Result<RemoteCluster<K>>;
}

/// [`ContextProvider`] over the kubeconfig carried in the syncer config
/// snapshot. Each resolved context gets its own independently-authenticated
/// client.
pub struct KubeconfigContexts {
    config: Arc<ConfigHolder>,
    reporter: Arc<Reporter>,
}

impl KubeconfigContexts {
    pub fn new(config: Arc<ConfigHolder>, reporter: Arc<Reporter>) -> Self {
        KubeconfigContexts { config, reporter }
    }
}

#[async_trait]
impl<K: SyncedResource> ContextProvider<K> for KubeconfigContexts {
    fn names(&self) -> Vec<String> {
        self.config
            .snapshot()
            .kubeconfig
            .as_ref()
            .map(|kubeconfig| {
                kubeconfig
                    .contexts
                    .iter()
                    .map(|context| context.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn resolve(&self, name: &str) -> Result<RemoteCluster<K>> {
        let snapshot = self.config.snapshot();
        let Some(kubeconfig) = snapshot.kubeconfig.as_ref() else {
            return Err(Error::KubeconfigMissing(name.to_string()));
        };

        let namespace = default_namespace_of(kubeconfig, name)
            .ok_or_else(|| Error::UnknownContext(name.to_string()))?;

        let options = KubeConfigOptions {
            context: Some(name.to_string()),
            ..KubeConfigOptions::default()
        };
        let config = Config::from_custom_kubeconfig(kubeconfig.clone(), &options)
            .await
            .map_err(Error::KubeconfigError)?;
        let address = config.cluster_url.to_string();
        let client = Client::try_from(config)?;

        Ok(RemoteCluster {
            name: name.to_string(),
            address,
            namespace,
            ops: Arc::new(KubeCluster::new(client, self.reporter.clone())),
        })
    }
}

/// The context's configured namespace, or `None` for the outer `Option` when
/// the context does not exist at all.
fn default_namespace_of(kubeconfig: &Kubeconfig, name: &str) -> Option<Option<String>> {
    kubeconfig
        .contexts
        .iter()
        .find(|context| context.name == name)
        .and_then(|named| named.context.as_ref())
        .map(|context| context.namespace.clone())
}
