//! # common
//!

#![allow(dead_code)]

use core::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Mutex,
};

use async_trait::async_trait;
use futures::stream::BoxStream;
use hostpath_backup::{
    cluster::{Cluster, ClusterError},
    resolver::RELEASE_LABEL,
    workload::{WorkloadKind, WorkloadStatus},
};
use k8s_openapi::{
    api::{
        apps::v1::ReplicaSet,
        core::v1::{
            CSIPersistentVolumeSource, HostPathVolumeSource, PersistentVolume,
            PersistentVolumeClaim, PersistentVolumeClaimSpec,
            PersistentVolumeClaimVolumeSource, PersistentVolumeSpec, Pod, PodSpec, Volume,
        },
    },
    apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference},
};
use object_store::{
    GetOptions, GetResult, ListResult, MultipartUpload, ObjectMeta as StoredObject, ObjectStore,
    PutMultipartOpts, PutOptions, PutPayload, PutResult, memory::InMemory,
    path::Path as ObjectPath,
};

/// A workload held by the fake cluster.
#[derive(Debug, Clone, Default)]
pub struct FakeWorkload {
    pub replicas: Option<i32>,
    pub ready_replicas: i32,

    /// Polls that still report ready replicas after a scale to zero.
    pub ready_lag: u32,

    /// Never reaches zero ready replicas.
    pub stuck: bool,
}

impl FakeWorkload {
    pub fn running(replicas: i32) -> Self {
        Self {
            replicas: Some(replicas),
            ready_replicas: replicas,
            ..Default::default()
        }
    }
}

/// An in memory control plane.
#[derive(Default)]
pub struct FakeCluster {
    pub claims: Vec<PersistentVolumeClaim>,
    pub volumes: HashMap<String, PersistentVolume>,
    pub pods: Vec<Pod>,
    pub replica_sets: HashMap<String, ReplicaSet>,
    pub workloads: Mutex<HashMap<(WorkloadKind, String), FakeWorkload>>,

    /// Workloads whose replica updates are rejected.
    pub reject_updates: Mutex<HashSet<(WorkloadKind, String)>>,
    pub fail_list_pods: bool,

    /// Every replica update, in order.
    pub updates: Mutex<Vec<(WorkloadKind, String, i32)>>,
}

impl FakeCluster {
    pub fn with_claim(mut self, claim: PersistentVolumeClaim) -> Self {
        self.claims.push(claim);
        self
    }

    pub fn with_volume(mut self, volume: PersistentVolume) -> Self {
        let name = volume.metadata.name.clone().unwrap_or_default();
        self.volumes.insert(name, volume);
        self
    }

    pub fn with_pod(mut self, pod: Pod) -> Self {
        self.pods.push(pod);
        self
    }

    pub fn with_replica_set(mut self, replica_set: ReplicaSet) -> Self {
        let name = replica_set.metadata.name.clone().unwrap_or_default();
        self.replica_sets.insert(name, replica_set);
        self
    }

    pub fn with_workload(self, kind: WorkloadKind, name: &str, workload: FakeWorkload) -> Self {
        self.workloads
            .lock()
            .unwrap()
            .insert((kind, name.to_string()), workload);
        self
    }

    /// A claim bound to a host path volume, mounted by a pod of a StatefulSet.
    pub fn with_stateful_claim(
        self,
        release: &str,
        claim_name: &str,
        path: &str,
        owner: &str,
    ) -> Self {
        let volume_name = format!("pv-{claim_name}");
        self.with_claim(claim(claim_name, release, Some(&volume_name)))
            .with_volume(host_path_volume(&volume_name, path))
            .with_pod(pod(&format!("{owner}-0"), claim_name, Some(("StatefulSet", owner))))
    }

    pub fn reject_updates_to(&self, kind: WorkloadKind, name: &str) {
        self.reject_updates
            .lock()
            .unwrap()
            .insert((kind, name.to_string()));
    }

    pub fn replicas(&self, kind: WorkloadKind, name: &str) -> Option<i32> {
        self.workloads
            .lock()
            .unwrap()
            .get(&(kind, name.to_string()))
            .and_then(|workload| workload.replicas)
    }

    pub fn updates(&self) -> Vec<(WorkloadKind, String, i32)> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl Cluster for FakeCluster {
    async fn list_claims(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<PersistentVolumeClaim>, ClusterError> {
        let (key, value) = label_selector.split_once('=').unwrap_or((label_selector, ""));

        Ok(self
            .claims
            .iter()
            .filter(|claim| claim.metadata.namespace.as_deref() == Some(namespace))
            .filter(|claim| {
                claim
                    .metadata
                    .labels
                    .as_ref()
                    .and_then(|labels| labels.get(key))
                    .is_some_and(|label| label == value)
            })
            .cloned()
            .collect())
    }

    async fn get_volume(&self, name: &str) -> Result<PersistentVolume, ClusterError> {
        self.volumes
            .get(name)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                kind: "PersistentVolume",
                name: name.to_string(),
            })
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, ClusterError> {
        if self.fail_list_pods {
            return Err(ClusterError::Rejected("pods are unavailable".to_string()));
        }

        Ok(self
            .pods
            .iter()
            .filter(|pod| pod.metadata.namespace.as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn get_replica_set(
        &self,
        _namespace: &str,
        name: &str,
    ) -> Result<ReplicaSet, ClusterError> {
        self.replica_sets
            .get(name)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                kind: "ReplicaSet",
                name: name.to_string(),
            })
    }

    async fn workload_status(
        &self,
        kind: WorkloadKind,
        _namespace: &str,
        name: &str,
    ) -> Result<WorkloadStatus, ClusterError> {
        let mut workloads = self.workloads.lock().unwrap();
        let workload =
            workloads
                .get_mut(&(kind, name.to_string()))
                .ok_or_else(|| ClusterError::NotFound {
                    kind: kind.as_str(),
                    name: name.to_string(),
                })?;

        if workload.replicas == Some(0) && !workload.stuck {
            if workload.ready_lag > 0 {
                workload.ready_lag -= 1;
            } else {
                workload.ready_replicas = 0;
            }
        }

        Ok(WorkloadStatus {
            replicas: workload.replicas,
            ready_replicas: workload.ready_replicas,
        })
    }

    async fn set_replicas(
        &self,
        kind: WorkloadKind,
        _namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), ClusterError> {
        let key = (kind, name.to_string());
        if self.reject_updates.lock().unwrap().contains(&key) {
            return Err(ClusterError::Rejected(format!("update of {kind}/{name}")));
        }

        let mut workloads = self.workloads.lock().unwrap();
        let workload = workloads
            .get_mut(&key)
            .ok_or_else(|| ClusterError::NotFound {
                kind: kind.as_str(),
                name: name.to_string(),
            })?;

        workload.replicas = Some(replicas);
        if replicas > 0 {
            workload.ready_replicas = replicas;
        }
        self.updates
            .lock()
            .unwrap()
            .push((kind, name.to_string(), replicas));

        Ok(())
    }
}

pub const NAMESPACE: &str = "davai";
pub const RELEASE: &str = "davai-backend";

pub fn metadata(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        ..Default::default()
    }
}

pub fn claim(name: &str, release: &str, volume_name: Option<&str>) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            labels: Some(BTreeMap::from([(
                RELEASE_LABEL.to_string(),
                release.to_string(),
            )])),
            ..metadata(name)
        },
        spec: Some(PersistentVolumeClaimSpec {
            volume_name: volume_name.map(ToString::to_string),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn host_path_volume(name: &str, path: &str) -> PersistentVolume {
    PersistentVolume {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            host_path: Some(HostPathVolumeSource {
                path: path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn csi_volume(name: &str, csi_path: &str, host_path: Option<&str>) -> PersistentVolume {
    PersistentVolume {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            csi: Some(CSIPersistentVolumeSource {
                driver: "hostpath.csi.k8s.io".to_string(),
                volume_handle: name.to_string(),
                volume_attributes: Some(BTreeMap::from([(
                    "path".to_string(),
                    csi_path.to_string(),
                )])),
                ..Default::default()
            }),
            host_path: host_path.map(|path| HostPathVolumeSource {
                path: path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn owner(kind: &str, name: &str) -> OwnerReference {
    OwnerReference {
        api_version: "apps/v1".to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: format!("{name}-uid"),
        ..Default::default()
    }
}

/// A pod mounting `claim_name`, owned by `(kind, name)` when given.
pub fn pod(name: &str, claim_name: &str, owned_by: Option<(&str, &str)>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            owner_references: owned_by.map(|(kind, name)| vec![owner(kind, name)]),
            ..metadata(name)
        },
        spec: Some(PodSpec {
            volumes: Some(vec![Volume {
                name: "data".to_string(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: claim_name.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn replica_set(name: &str, deployment: &str) -> ReplicaSet {
    ReplicaSet {
        metadata: ObjectMeta {
            owner_references: Some(vec![owner("Deployment", deployment)]),
            ..metadata(name)
        },
        ..Default::default()
    }
}

/// An in memory store whose `fail_on`th delete fails, counting from one.
#[derive(Debug, Default)]
pub struct FailingDeletes {
    pub inner: InMemory,
    pub fail_on: usize,
    deletes: AtomicUsize,
}

impl FailingDeletes {
    pub fn new(fail_on: usize) -> Self {
        Self {
            fail_on,
            ..Default::default()
        }
    }
}

impl fmt::Display for FailingDeletes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FailingDeletes({})", self.inner)
    }
}

#[async_trait]
impl ObjectStore for FailingDeletes {
    async fn put_opts(
        &self,
        location: &ObjectPath,
        payload: PutPayload,
        opts: PutOptions,
    ) -> object_store::Result<PutResult> {
        self.inner.put_opts(location, payload, opts).await
    }

    async fn put_multipart_opts(
        &self,
        location: &ObjectPath,
        opts: PutMultipartOpts,
    ) -> object_store::Result<Box<dyn MultipartUpload>> {
        self.inner.put_multipart_opts(location, opts).await
    }

    async fn get_opts(
        &self,
        location: &ObjectPath,
        options: GetOptions,
    ) -> object_store::Result<GetResult> {
        self.inner.get_opts(location, options).await
    }

    async fn delete(&self, location: &ObjectPath) -> object_store::Result<()> {
        let attempt = self.deletes.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt == self.fail_on {
            return Err(object_store::Error::Generic {
                store: "FailingDeletes",
                source: format!("refused to delete {location}").into(),
            });
        }

        self.inner.delete(location).await
    }

    fn list(
        &self,
        prefix: Option<&ObjectPath>,
    ) -> BoxStream<'_, object_store::Result<StoredObject>> {
        self.inner.list(prefix)
    }

    async fn list_with_delimiter(
        &self,
        prefix: Option<&ObjectPath>,
    ) -> object_store::Result<ListResult> {
        self.inner.list_with_delimiter(prefix).await
    }

    async fn copy(&self, from: &ObjectPath, to: &ObjectPath) -> object_store::Result<()> {
        self.inner.copy(from, to).await
    }

    async fn copy_if_not_exists(
        &self,
        from: &ObjectPath,
        to: &ObjectPath,
    ) -> object_store::Result<()> {
        self.inner.copy_if_not_exists(from, to).await
    }
}
