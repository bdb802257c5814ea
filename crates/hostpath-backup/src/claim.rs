//! Resolved volume claims.
//!

use core::fmt;
use std::{collections::HashSet, path::PathBuf};

use crate::workload::WorkloadRef;

/// A volume claim resolved to the host path of its volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeClaimRecord {
    /// The claim's namespace.
    pub namespace: String,

    /// The claim's name.
    pub claim_name: String,

    /// The name of the volume the claim is bound to.
    pub volume_name: String,

    /// The path of the volume's data on this node.
    pub host_path: PathBuf,

    /// The workload mounting the claim, if one was found.
    pub workload: Option<WorkloadRef>,
}

impl fmt::Display for VolumeClaimRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> volume {} -> {}",
            self.claim_name,
            self.volume_name,
            self.host_path.display()
        )?;

        match &self.workload {
            Some(workload) => write!(f, " [{workload} ({} replicas)]", workload.original_replicas),
            None => write!(f, " [no workload found]"),
        }
    }
}

/// The workloads of a set of claims, deduplicated by kind, namespace and name.
///
/// The order of first appearance is kept.
pub fn unique_workloads<'a, I>(claims: I) -> Vec<WorkloadRef>
where
    I: IntoIterator<Item = &'a VolumeClaimRecord>,
{
    let mut seen = HashSet::new();
    let mut workloads = Vec::new();

    for workload in claims.into_iter().filter_map(|claim| claim.workload.as_ref()) {
        if seen.insert(workload.key()) {
            workloads.push(workload.clone());
        }
    }

    workloads
}
