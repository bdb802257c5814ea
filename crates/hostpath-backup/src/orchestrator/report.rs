use std::path::PathBuf;

use thiserror::Error;
use tracing::{error, info};

use crate::{
    archive::ArchiveError,
    context::Context,
    remote::{RemoteError, RotateError},
};

/// The result of backing up one claim.
#[derive(Debug)]
pub struct BackupOutcome {
    /// The claim's name.
    pub claim: String,

    /// The rendered archive name, also its remote key.
    pub name: String,

    /// The archive's local path.
    pub archive: PathBuf,

    /// The archive's size in bytes.
    pub bytes: u64,

    /// Why the claim failed, if it did.
    pub failure: Option<ClaimFailure>,
}

/// The result of restoring one claim.
#[derive(Debug)]
pub struct RestoreOutcome {
    /// The claim's name.
    pub claim: String,

    /// The archive restored from, a local path or remote key.
    pub archive: String,

    /// Why the claim failed, if it did.
    pub failure: Option<ClaimFailure>,
}

/// Why a single claim failed.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ClaimFailure {
    #[error("Archive failed:\n{0}")]
    Archive(#[from] ArchiveError),

    #[error("Upload failed:\n{0}")]
    Upload(#[source] RemoteError),

    #[error("Rotation failed:\n{0}")]
    Rotate(#[source] RotateError),

    #[error("Cancelled before the claim was processed")]
    Cancelled,

    #[error("Archive task did not complete: {0}")]
    Join(String),
}

/// A byte count in `B`, `KB`, `MB` or `GB`, base 1024 with one decimal.
pub fn format_size(bytes: u64) -> String {
    let value = u128::from(bytes);

    let mut divisor: u128 = 1;
    let mut unit = "B";
    for next in ["KB", "MB", "GB"] {
        if value < divisor * 1024 {
            break;
        }
        divisor *= 1024;
        unit = next;
    }

    if divisor == 1 {
        return format!("{bytes} B");
    }

    let tenths = (value * 10 + divisor / 2) / divisor;
    format!("{}.{} {unit}", tenths / 10, tenths % 10)
}

pub(super) fn log_backup_summary(context: &Context, outcomes: &[BackupOutcome]) {
    info!("{context}Backup summary:");

    let mut total = 0;
    for outcome in outcomes {
        match &outcome.failure {
            None => {
                total += outcome.bytes;
                info!(
                    "{context}  {}: {} ({})",
                    outcome.claim,
                    outcome.archive.display(),
                    format_size(outcome.bytes)
                );
            }
            Some(failure) => error!("{context}  {}: FAILED {failure}", outcome.claim),
        }
    }

    let succeeded = outcomes.iter().filter(|outcome| outcome.failure.is_none()).count();
    info!(
        "{context}{succeeded}/{} claims backed up, {} total",
        outcomes.len(),
        format_size(total)
    );
}

pub(super) fn log_restore_summary(context: &Context, outcomes: &[RestoreOutcome]) {
    info!("{context}Restore summary:");

    for outcome in outcomes {
        match &outcome.failure {
            None => info!("{context}  {}: restored from {}", outcome.claim, outcome.archive),
            Some(failure) => error!("{context}  {}: FAILED {failure}", outcome.claim),
        }
    }

    let succeeded = outcomes.iter().filter(|outcome| outcome.failure.is_none()).count();
    info!("{context}{succeeded}/{} claims restored", outcomes.len());
}
