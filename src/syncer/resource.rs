use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::NamespaceResourceScope;
use kube::ResourceExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Implemented for resources the sync engine can replicate between
/// namespaces and clusters. The engine handles all metadata itself; the
/// trait only has to move the kind-specific payload around.
pub trait SyncedResource:
    ResourceExt<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Default
    + std::fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Overwrites `self`'s payload with the source's, leaving metadata alone.
    fn copy_payload(&mut self, source: &Self);

    /// True when both objects carry the same payload.
    fn payload_eq(&self, other: &Self) -> bool;

    /// A fresh object carrying only the payload, no metadata.
    fn duplicate(&self) -> Self {
        let mut fresh = Self::default();
        fresh.copy_payload(self);
        fresh
    }
}

impl SyncedResource for ConfigMap {
    fn copy_payload(&mut self, source: &Self) {
        self.data = source.data.clone();
        self.binary_data = source.binary_data.clone();
    }

    fn payload_eq(&self, other: &Self) -> bool {
        self.data == other.data && self.binary_data == other.binary_data
    }
}

impl SyncedResource for Secret {
    fn copy_payload(&mut self, source: &Self) {
        self.data = source.data.clone();
        self.string_data = source.string_data.clone();
        // A secret's type is immutable in the API; a replica created with a
        // different type could never converge.
        self.type_ = source.type_.clone();
    }

    fn payload_eq(&self, other: &Self) -> bool {
        self.data == other.data
            && self.string_data == other.string_data
            && self.type_ == other.type_
    }
}
