use core::fmt::Debug;
use std::path::Path;

use async_trait::async_trait;
use k8s_openapi::{
    NamespaceResourceScope,
    api::{
        apps::v1::{Deployment, ReplicaSet, StatefulSet},
        core::v1::{PersistentVolume, PersistentVolumeClaim, Pod},
    },
};
use kube::{
    Api, Client, Resource,
    api::{ListParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig, KubeconfigError},
};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::workload::{Replicated, WorkloadKind, WorkloadStatus};

use super::{Cluster, ClusterError};

/// A cluster reached through the Kubernetes API.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Create a cluster from a client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using a kubeconfig file, or the in-cluster/default config when none is given.
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self, ConnectError> {
        let client = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)?;
                let config =
                    kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                        .await?;
                Client::try_from(config)?
            }
            None => Client::try_default().await?,
        };

        Ok(Self::new(client))
    }

    async fn status_of<K>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<WorkloadStatus, ClusterError>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Replicated
            + Clone
            + DeserializeOwned
            + Debug
            + Send
            + Sync
            + 'static,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let object = api.get(name).await?;
        Ok(object.replica_status())
    }

    async fn replace_replicas<K>(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), ClusterError>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Replicated
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug
            + Send
            + Sync
            + 'static,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let mut object = api.get(name).await?;
        object.set_replicas(replicas);
        api.replace(name, &PostParams::default(), &object).await?;
        Ok(())
    }
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn list_claims(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<PersistentVolumeClaim>, ClusterError> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list.items)
    }

    async fn get_volume(&self, name: &str) -> Result<PersistentVolume, ClusterError> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        Ok(api.get(name).await?)
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn get_replica_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ReplicaSet, ClusterError> {
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn workload_status(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<WorkloadStatus, ClusterError> {
        match kind {
            WorkloadKind::Deployment => self.status_of::<Deployment>(namespace, name).await,
            WorkloadKind::StatefulSet => self.status_of::<StatefulSet>(namespace, name).await,
        }
    }

    async fn set_replicas(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), ClusterError> {
        match kind {
            WorkloadKind::Deployment => {
                self.replace_replicas::<Deployment>(namespace, name, replicas)
                    .await
            }
            WorkloadKind::StatefulSet => {
                self.replace_replicas::<StatefulSet>(namespace, name, replicas)
                    .await
            }
        }
    }
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Failed to load the kubeconfig:\n{0}")]
    Kubeconfig(#[from] KubeconfigError),

    #[error("Failed to create the Kubernetes client:\n{0}")]
    Client(#[from] kube::Error),
}
