use std::sync::{Arc, RwLock};

use kube::config::Kubeconfig;

use crate::{Error, Result};

/// Immutable syncer configuration. Every reconciliation pass works against
/// one snapshot taken at the start of the call; a reload swaps the whole
/// value instead of mutating it in place.
#[derive(Clone, Debug)]
pub struct SyncerConfig {
    /// Name of the cluster this operator runs in, written into the origin
    /// cluster label of every replica.
    pub cluster_name: String,
    /// API address of the cluster this operator runs in. Used to detect a
    /// sync context that points back at our own cluster.
    pub cluster_address: String,
    /// When false, watch events are ignored entirely.
    pub enabled: bool,
    /// Kubeconfig carrying the remote-cluster contexts that sources may
    /// name in their sync-contexts annotation.
    pub kubeconfig: Option<Kubeconfig>,
}

impl SyncerConfig {
    /// Loads the configuration from the environment. `CLUSTER_NAME` defaults
    /// to "unicorn", `ENABLE_CONFIG_SYNCER` to enabled, and
    /// `SYNC_KUBECONFIG` names the kubeconfig file with remote contexts.
    pub fn from_env(cluster_address: String) -> Result<Self> {
        let cluster_name =
            std::env::var("CLUSTER_NAME").unwrap_or_else(|_| "unicorn".to_string());
        let enabled = std::env::var("ENABLE_CONFIG_SYNCER")
            .map(|value| value != "false")
            .unwrap_or(true);
        let kubeconfig = match std::env::var("SYNC_KUBECONFIG") {
            Ok(path) if !path.is_empty() => {
                Some(Kubeconfig::read_from(path).map_err(Error::KubeconfigError)?)
            }
            _ => None,
        };

        Ok(SyncerConfig {
            cluster_name,
            cluster_address,
            enabled,
            kubeconfig,
        })
    }
}

/// Holds the current [`SyncerConfig`]. Readers clone the inner `Arc` once
/// per call; the reload path swaps it without blocking in-flight passes.
pub struct ConfigHolder {
    current: RwLock<Arc<SyncerConfig>>,
}

impl ConfigHolder {
    pub fn new(config: SyncerConfig) -> Self {
        ConfigHolder {
            current: RwLock::new(Arc::new(config)),
        }
    }

    pub fn snapshot(&self) -> Arc<SyncerConfig> {
        self.current
            .read()
            .expect("syncer config lock poisoned")
            .clone()
    }

    pub fn swap(&self, config: SyncerConfig) {
        *self.current.write().expect("syncer config lock poisoned") = Arc::new(config);
    }
}
