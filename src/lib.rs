use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Kubeconfig Error: {0}")]
    KubeconfigError(#[source] kube::config::KubeconfigError),

    #[error("SerializationError: {0}")]
    SerializationError(#[source] serde_json::Error),

    #[error("unknown sync context \"{0}\"")]
    UnknownContext(String),

    #[error("sync contexts \"{first}\" and \"{second}\" both resolve to cluster {address}")]
    DuplicateContextAddress {
        first: String,
        second: String,
        address: String,
    },

    #[error("no kubeconfig configured, cannot resolve sync context \"{0}\"")]
    KubeconfigMissing(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub mod syncer;
