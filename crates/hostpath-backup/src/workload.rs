//! Workloads that mount volume claims and can be scaled.
//!

use core::{fmt, str::FromStr};

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use thiserror::Error;

/// The kinds of workload that can be quiesced.
#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkloadKind {
    /// An `apps/v1` Deployment, reached from a pod through its ReplicaSet.
    Deployment,

    /// An `apps/v1` StatefulSet, reached directly from a pod.
    StatefulSet,
}

impl WorkloadKind {
    /// The API kind name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deployment => "Deployment",
            Self::StatefulSet => "StatefulSet",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadKind {
    type Err = UnsupportedWorkloadKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Deployment" => Ok(Self::Deployment),
            "StatefulSet" => Ok(Self::StatefulSet),
            _ => Err(UnsupportedWorkloadKind(s.to_string())),
        }
    }
}

/// A workload kind that cannot be scaled.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unsupported workload kind '{0}'")]
pub struct UnsupportedWorkloadKind(pub String);

/// A reference to a workload, with the replica count it had when it was discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadRef {
    /// The kind of workload.
    pub kind: WorkloadKind,

    /// The workload's name.
    pub name: String,

    /// The workload's namespace.
    pub namespace: String,

    /// The replica count captured at discovery. Scale back always restores this value.
    pub original_replicas: i32,
}

impl WorkloadRef {
    /// The identity used to deduplicate workloads.
    pub fn key(&self) -> (WorkloadKind, &str, &str) {
        (self.kind, &self.namespace, &self.name)
    }
}

impl fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// The replica state of a workload as reported by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadStatus {
    /// The desired replica count, unset when the API object leaves it to the default.
    pub replicas: Option<i32>,

    /// The number of ready replicas.
    pub ready_replicas: i32,
}

impl WorkloadStatus {
    /// The desired replica count, an unset count defaults to one.
    pub fn desired_replicas(&self) -> i32 {
        self.replicas.unwrap_or(1)
    }
}

/// A workload API object that has a replica count.
pub trait Replicated {
    /// The desired replica count.
    fn replicas(&self) -> Option<i32>;

    /// Set the desired replica count.
    fn set_replicas(&mut self, replicas: i32);

    /// The number of ready replicas.
    fn ready_replicas(&self) -> i32;

    /// The replica state.
    fn replica_status(&self) -> WorkloadStatus {
        WorkloadStatus {
            replicas: self.replicas(),
            ready_replicas: self.ready_replicas(),
        }
    }
}

impl Replicated for Deployment {
    fn replicas(&self) -> Option<i32> {
        self.spec.as_ref().and_then(|spec| spec.replicas)
    }

    fn set_replicas(&mut self, replicas: i32) {
        self.spec.get_or_insert_with(Default::default).replicas = Some(replicas);
    }

    fn ready_replicas(&self) -> i32 {
        self.status
            .as_ref()
            .and_then(|status| status.ready_replicas)
            .unwrap_or(0)
    }
}

impl Replicated for StatefulSet {
    fn replicas(&self) -> Option<i32> {
        self.spec.as_ref().and_then(|spec| spec.replicas)
    }

    fn set_replicas(&mut self, replicas: i32) {
        self.spec.get_or_insert_with(Default::default).replicas = Some(replicas);
    }

    fn ready_replicas(&self) -> i32 {
        self.status
            .as_ref()
            .and_then(|status| status.ready_replicas)
            .unwrap_or(0)
    }
}
