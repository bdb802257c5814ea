//! Resolve a release's volume claims to host paths and owning workloads.
//!

use std::path::PathBuf;

use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim, Pod};
use thiserror::Error;
use tracing::warn;

use crate::{
    claim::VolumeClaimRecord,
    cluster::{Cluster, ClusterError},
    context::Context,
    workload::{WorkloadKind, WorkloadRef},
};

/// The label that associates resources with a release.
pub const RELEASE_LABEL: &str = "app.kubernetes.io/instance";

/// The label selector matching a release's resources.
pub fn release_selector(release: &str) -> String {
    format!("{RELEASE_LABEL}={release}")
}

/// Resolves claims through the cluster.
pub struct Resolver<'a, C: Cluster + ?Sized> {
    cluster: &'a C,
}

impl<'a, C: Cluster + ?Sized> Resolver<'a, C> {
    /// Create a new resolver.
    pub fn new(cluster: &'a C) -> Self {
        Self { cluster }
    }

    /// Resolve every claim of a release.
    ///
    /// A release without claims is an error, it almost always means the release label is wrong.
    pub async fn resolve(
        &self,
        context: &mut Context,
        namespace: &str,
        release: &str,
    ) -> Result<Vec<VolumeClaimRecord>, ResolveError> {
        context.current_context = "Resolve";

        let selector = release_selector(release);
        context.detail(format_args!(
            "Listing claims in {namespace} with selector '{selector}'"
        ));

        let claims = self
            .cluster
            .list_claims(namespace, &selector)
            .await
            .map_err(|e| ResolveError::Cluster(e, "list claims"))?;
        context.detail(format_args!("Found {} claims", claims.len()));

        if claims.is_empty() {
            return Err(ResolveError::NotFound {
                namespace: namespace.to_string(),
                release: release.to_string(),
            });
        }

        // Pods only matter for locating workloads, a failure here is not fatal.
        let pods = match self.cluster.list_pods(namespace).await {
            Ok(pods) => pods,
            Err(error) => {
                warn!("{context}Could not list pods in {namespace}: {error}");
                Vec::new()
            }
        };

        let mut records = Vec::with_capacity(claims.len());
        for claim in &claims {
            records.push(self.resolve_claim(context, namespace, claim, &pods).await?);
        }

        Ok(records)
    }

    async fn resolve_claim(
        &self,
        context: &Context,
        namespace: &str,
        claim: &PersistentVolumeClaim,
        pods: &[Pod],
    ) -> Result<VolumeClaimRecord, ResolveError> {
        let claim_name = claim.metadata.name.clone().unwrap_or_default();
        let claim_namespace = claim
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| namespace.to_string());

        let volume_name = claim
            .spec
            .as_ref()
            .and_then(|spec| spec.volume_name.clone())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ResolveError::Unbound(claim_name.clone()))?;

        let volume = self
            .cluster
            .get_volume(&volume_name)
            .await
            .map_err(|e| ResolveError::Cluster(e, "get volume"))?;

        let host_path = host_path(&volume).ok_or_else(|| ResolveError::UnresolvedPath {
            claim: claim_name.clone(),
            volume: volume_name.clone(),
        })?;
        context.detail(format_args!(
            "Claim {claim_name} -> volume {volume_name} -> path {}",
            host_path.display()
        ));

        let workload = self
            .find_workload(context, &claim_namespace, &claim_name, pods)
            .await;
        if workload.is_none() {
            warn!(
                "{context}No workload found mounting claim '{claim_name}', it will not be scaled"
            );
        }

        Ok(VolumeClaimRecord {
            namespace: claim_namespace,
            claim_name,
            volume_name,
            host_path,
            workload,
        })
    }

    /// Find the workload of the first pod mounting the claim that resolves to one.
    async fn find_workload(
        &self,
        context: &Context,
        namespace: &str,
        claim_name: &str,
        pods: &[Pod],
    ) -> Option<WorkloadRef> {
        for pod in pods.iter().filter(|pod| mounts_claim(pod, claim_name)) {
            let pod_name = pod.metadata.name.as_deref().unwrap_or_default();
            context.detail(format_args!("Pod {pod_name} mounts claim {claim_name}"));

            match self.resolve_owner(context, namespace, pod).await {
                Ok(Some(workload)) => {
                    context.detail(format_args!("Claim {claim_name} owned by {workload}"));
                    return Some(workload);
                }
                Ok(None) => continue,
                Err(error) => {
                    warn!("{context}Could not resolve the owner of pod '{pod_name}': {error}");
                    continue;
                }
            }
        }

        None
    }

    /// Walk a pod's owner references to a workload.
    async fn resolve_owner(
        &self,
        context: &Context,
        namespace: &str,
        pod: &Pod,
    ) -> Result<Option<WorkloadRef>, ClusterError> {
        let owners = pod.metadata.owner_references.as_deref().unwrap_or_default();

        for owner in owners {
            if owner.kind == "ReplicaSet" {
                let replica_set = self
                    .cluster
                    .get_replica_set(namespace, &owner.name)
                    .await?;
                let replica_set_owners = replica_set
                    .metadata
                    .owner_references
                    .as_deref()
                    .unwrap_or_default();

                if let Some(deployment) = replica_set_owners
                    .iter()
                    .find(|owner| owner.kind == WorkloadKind::Deployment.as_str())
                {
                    return self
                        .workload(WorkloadKind::Deployment, namespace, &deployment.name)
                        .await
                        .map(Some);
                }

                continue;
            }

            match owner.kind.parse::<WorkloadKind>() {
                Ok(kind) => return self.workload(kind, namespace, &owner.name).await.map(Some),
                Err(error) => {
                    context.detail(format_args!("Skipping owner '{}': {error}", owner.name));
                }
            }
        }

        Ok(None)
    }

    async fn workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<WorkloadRef, ClusterError> {
        let status = self.cluster.workload_status(kind, namespace, name).await?;

        Ok(WorkloadRef {
            kind,
            name: name.to_string(),
            namespace: namespace.to_string(),
            original_replicas: status.desired_replicas(),
        })
    }
}

/// The host path of a volume.
///
/// Checked in order: the CSI `path` volume attribute, the local volume path, the host path volume.
pub fn host_path(volume: &PersistentVolume) -> Option<PathBuf> {
    let spec = volume.spec.as_ref()?;

    let csi_path = spec
        .csi
        .as_ref()
        .and_then(|csi| csi.volume_attributes.as_ref())
        .and_then(|attributes| attributes.get("path"));
    if let Some(path) = csi_path {
        return Some(PathBuf::from(path));
    }

    if let Some(local) = &spec.local {
        return Some(PathBuf::from(&local.path));
    }

    spec.host_path
        .as_ref()
        .map(|host_path| PathBuf::from(&host_path.path))
}

/// Whether a pod's volumes reference a claim.
pub fn mounts_claim(pod: &Pod, claim_name: &str) -> bool {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.volumes.as_ref())
        .is_some_and(|volumes| {
            volumes.iter().any(|volume| {
                volume
                    .persistent_volume_claim
                    .as_ref()
                    .is_some_and(|source| source.claim_name == claim_name)
            })
        })
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("No claims found for release '{release}' in namespace '{namespace}'")]
    NotFound { namespace: String, release: String },

    #[error("Claim '{0}' is not bound to a volume")]
    Unbound(String),

    #[error("Could not resolve a host path for volume '{volume}' of claim '{claim}'")]
    UnresolvedPath { claim: String, volume: String },

    #[error("Failed to {1}:\n{0}")]
    Cluster(#[source] ClusterError, &'static str),
}
