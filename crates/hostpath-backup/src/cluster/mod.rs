//! The cluster control plane.
//!

use async_trait::async_trait;
use k8s_openapi::api::{
    apps::v1::ReplicaSet,
    core::v1::{PersistentVolume, PersistentVolumeClaim, Pod},
};
use thiserror::Error;

use crate::workload::{WorkloadKind, WorkloadStatus};

mod kube_cluster;

pub use kube_cluster::{ConnectError, KubeCluster};

/// The cluster operations needed to resolve claims and scale their workloads.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// List the volume claims in a namespace matching a label selector.
    async fn list_claims(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<PersistentVolumeClaim>, ClusterError>;

    /// Get a persistent volume by name.
    async fn get_volume(&self, name: &str) -> Result<PersistentVolume, ClusterError>;

    /// List the pods in a namespace.
    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, ClusterError>;

    /// Get a replica set by name.
    async fn get_replica_set(&self, namespace: &str, name: &str)
    -> Result<ReplicaSet, ClusterError>;

    /// Get the replica state of a workload.
    async fn workload_status(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<WorkloadStatus, ClusterError>;

    /// Update the desired replica count of a workload.
    async fn set_replicas(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), ClusterError>;
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Kubernetes API request failed:\n{0}")]
    Api(#[from] kube::Error),

    #[error("{kind} '{name}' was not found")]
    NotFound { kind: &'static str, name: String },

    #[error("Request was rejected: {0}")]
    Rejected(String),
}
