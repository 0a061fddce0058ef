use std::collections::HashSet;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use kube::api::ListParams;
use kube::runtime::events::Reporter;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Config, Resource, ResourceExt};
use tracing::{error, info, warn};

pub use config::{ConfigHolder, SyncerConfig};
pub use engine::SyncEngine;
pub use options::SyncOptions;

use crate::syncer::contexts::KubeconfigContexts;
use crate::syncer::resource::SyncedResource;
use crate::syncer::store::KubeCluster;

pub mod config;
pub mod contexts;
pub mod engine;
pub mod options;
pub mod resource;
pub mod store;

const CONTROLLER_NAME: &'static str = "configsyncctl";

pub struct State {}

pub async fn run(_state: State) {
    let kube_config = Config::infer().await.expect("Failed to infer kube config");
    let cluster_address = kube_config.cluster_url.to_string();
    let client = Client::try_from(kube_config).expect("Failed to create kube client");
    let reporter = Arc::new(Reporter {
        controller: CONTROLLER_NAME.into(),
        instance: std::env::var("CONTROLLER_POD_NAME").ok(),
    });

    // Verify that we can list namespaces. If we can't, this usually means
    // that the operator's RBAC rules are not installed.
    let namespaces = Api::<Namespace>::all(client.clone());
    if let Err(e) = namespaces.list(&ListParams::default().limit(1)).await {
        error!("Namespaces are not listable; {e:?}. Are the RBAC rules installed?");
        std::process::exit(1);
    }

    let syncer_config = match SyncerConfig::from_env(cluster_address.clone()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load syncer configuration; {e:?}");
            std::process::exit(1);
        }
    };
    let holder = Arc::new(ConfigHolder::new(syncer_config));
    spawn_reload_on_sighup(holder.clone(), cluster_address);

    let local = Arc::new(KubeCluster::new(client.clone(), reporter.clone()));
    let contexts = Arc::new(KubeconfigContexts::new(holder.clone(), reporter));
    let config_maps = Arc::new(SyncEngine::<ConfigMap>::new(
        holder.clone(),
        local.clone(),
        contexts.clone(),
    ));
    let secrets = Arc::new(SyncEngine::<Secret>::new(holder.clone(), local, contexts));

    let watches = futures::future::join3(
        watch_sources(client.clone(), config_maps.clone(), holder.clone()),
        watch_sources(client.clone(), secrets.clone(), holder.clone()),
        watch_namespaces(client, config_maps, secrets, holder),
    );

    tokio::select! {
        _ = watches => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, stopping");
        }
    }
}

/// Re-reads the syncer configuration on SIGHUP and swaps it in; in-flight
/// passes keep the snapshot they started with.
fn spawn_reload_on_sighup(holder: Arc<ConfigHolder>, cluster_address: String) {
    tokio::spawn(async move {
        let mut hangups =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
                Ok(signal) => signal,
                Err(e) => {
                    warn!("Not listening for SIGHUP config reloads; {e:?}");
                    return;
                }
            };
        while hangups.recv().await.is_some() {
            match SyncerConfig::from_env(cluster_address.clone()) {
                Ok(config) => {
                    holder.swap(config);
                    info!("Reloaded syncer configuration");
                }
                Err(e) => warn!("Keeping previous syncer configuration; reload failed: {e:?}"),
            }
        }
    });
}

async fn watch_sources<K: SyncedResource>(
    client: Client,
    engine: Arc<SyncEngine<K>>,
    config: Arc<ConfigHolder>,
) {
    let api = Api::<K>::all(client);
    let mut events = watcher(api, watcher::Config::default().any_semantic())
        .backoff(watcher::default_backoff())
        .boxed();
    while let Some(event) = events.next().await {
        match event {
            Ok(watcher::Event::Applied(object)) => {
                if !config.snapshot().enabled {
                    continue;
                }
                if let Err(e) = engine.sync_on_change(&object).await {
                    warn!(
                        "Sync of {} \"{}\" failed: {e:?}",
                        K::kind(&()),
                        object.name_any()
                    );
                }
            }
            Ok(watcher::Event::Deleted(object)) => {
                if !config.snapshot().enabled {
                    continue;
                }
                if let Err(e) = engine.sync_on_delete(&object).await {
                    warn!(
                        "Teardown of {} \"{}\" failed: {e:?}",
                        K::kind(&()),
                        object.name_any()
                    );
                }
            }
            // A re-list replays every source object.
            Ok(watcher::Event::Restarted(objects)) => {
                if !config.snapshot().enabled {
                    continue;
                }
                for object in objects {
                    if let Err(e) = engine.sync_on_change(&object).await {
                        warn!(
                            "Sync of {} \"{}\" failed: {e:?}",
                            K::kind(&()),
                            object.name_any()
                        );
                    }
                }
            }
            Err(e) => warn!("{} watch failed: {e:?}", K::kind(&())),
        }
    }
}

async fn watch_namespaces(
    client: Client,
    config_maps: Arc<SyncEngine<ConfigMap>>,
    secrets: Arc<SyncEngine<Secret>>,
    config: Arc<ConfigHolder>,
) {
    let api = Api::<Namespace>::all(client);
    let mut seen: HashSet<String> = HashSet::new();
    let mut events = watcher(api, watcher::Config::default().any_semantic())
        .backoff(watcher::default_backoff())
        .boxed();
    while let Some(event) = events.next().await {
        match event {
            Ok(watcher::Event::Applied(namespace)) => {
                handle_namespace(&namespace, &mut seen, &config_maps, &secrets, &config).await;
            }
            Ok(watcher::Event::Deleted(namespace)) => {
                seen.remove(&namespace.name_any());
            }
            Ok(watcher::Event::Restarted(namespaces)) => {
                for namespace in namespaces {
                    handle_namespace(&namespace, &mut seen, &config_maps, &secrets, &config)
                        .await;
                }
            }
            Err(e) => warn!("Namespace watch failed: {e:?}"),
        }
    }
}

async fn handle_namespace(
    namespace: &Namespace,
    seen: &mut HashSet<String>,
    config_maps: &SyncEngine<ConfigMap>,
    secrets: &SyncEngine<Secret>,
    config: &ConfigHolder,
) {
    if !config.snapshot().enabled {
        return;
    }
    let name = namespace.name_any();
    if !seen.insert(name.clone()) {
        return;
    }
    info!("Namespace \"{}\" created, replicating matching sources into it", name);
    if let Err(e) = config_maps.sync_namespace_created(&name).await {
        warn!(
            "Replicating ConfigMaps into new namespace \"{}\" failed: {e:?}",
            name
        );
    }
    if let Err(e) = secrets.sync_namespace_created(&name).await {
        warn!(
            "Replicating Secrets into new namespace \"{}\" failed: {e:?}",
            name
        );
    }
}
