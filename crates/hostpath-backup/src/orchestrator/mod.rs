//! Backup and restore runs for a release.
//!
//! A run resolves the release's claims, quiesces the workloads mounting them, archives or
//! restores each claim's host path and then scales the workloads back. Scale back happens on every
//! exit path once the workloads are quiesced.
//!

use std::{io, path::PathBuf};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    claim::VolumeClaimRecord,
    cluster::Cluster,
    context::Context,
    naming::{NameError, NameTemplate},
    remote::{RemoteError, RemoteStore},
    resolver::ResolveError,
    scaler::{ScaleError, ScaleSettings},
    workload::WorkloadRef,
};

mod backup;
mod report;
mod restore;

pub use report::{BackupOutcome, ClaimFailure, RestoreOutcome, format_size};

/// What a run works on and how.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// The release's namespace.
    pub namespace: String,

    /// The release name.
    pub release: String,

    /// The archive name template.
    pub template: NameTemplate,

    /// The directory archives are written to.
    pub output_directory: PathBuf,

    /// Remote copies kept per claim after upload, zero keeps all.
    pub keep_last: usize,

    /// Log the plan without scaling, archiving or uploading.
    pub dry_run: bool,

    /// The scale down wait.
    pub scale: ScaleSettings,
}

/// Sequences resolution, quiescence, archiving and remote copies.
pub struct Orchestrator<'a, C: Cluster + ?Sized> {
    cluster: &'a C,
    remote: Option<&'a RemoteStore>,
    options: RunOptions,
    cancel: CancellationToken,
}

impl<'a, C: Cluster + ?Sized> Orchestrator<'a, C> {
    /// Create a new orchestrator.
    pub fn new(
        cluster: &'a C,
        remote: Option<&'a RemoteStore>,
        options: RunOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cluster,
            remote,
            options,
            cancel,
        }
    }

    fn log_scale_down_plan(&self, context: &Context, workloads: &[WorkloadRef]) {
        if workloads.is_empty() {
            info!("{context}[Dry Run] No workloads would be scaled");
        }

        for workload in workloads {
            info!(
                "{context}[Dry Run] Would scale {workload} from {} to 0 replicas",
                workload.original_replicas
            );
        }
    }

    fn log_scale_back_plan(&self, context: &Context, workloads: &[WorkloadRef]) {
        for workload in workloads {
            info!(
                "{context}[Dry Run] Would restore {workload} to {} replicas",
                workload.original_replicas
            );
        }
    }
}

/// The claim named `claim_name` among `claims`.
fn find_claim<'c>(
    claims: &'c [VolumeClaimRecord],
    claim_name: &str,
) -> Option<&'c VolumeClaimRecord> {
    claims.iter().find(|claim| claim.claim_name == claim_name)
}

/// Fail with [`RunError::Partial`] if any outcome failed.
fn check_partial(failed: usize, total: usize) -> Result<(), RunError> {
    if failed > 0 {
        return Err(RunError::Partial { failed, total });
    }

    Ok(())
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Failed to resolve claims:\n{0}")]
    Resolve(#[from] ResolveError),

    #[error("Failed to quiesce workloads:\n{0}")]
    Quiesce(#[from] ScaleError),

    #[error("Failed to match an archive name:\n{0}")]
    Name(#[from] NameError),

    #[error("Archive '{archive}' is for claim '{claim}', which is not part of the release")]
    Unmatched { claim: String, archive: String },

    #[error("Remote store request failed:\n{0}")]
    Remote(#[from] RemoteError),

    #[error("Nothing to restore, pass archives or remote credentials")]
    NoRestoreSource,

    #[error("Failed to {1}: {0}")]
    Io(#[source] io::Error, &'static str),

    #[error("{failed} of {total} claims failed")]
    Partial { failed: usize, total: usize },
}
