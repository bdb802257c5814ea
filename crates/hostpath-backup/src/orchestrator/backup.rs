use std::path::PathBuf;

use chrono::Local;
use tokio::{fs, task};
use tracing::{error, info, warn};

use super::{
    Orchestrator, RunError, check_partial,
    report::{BackupOutcome, ClaimFailure, format_size, log_backup_summary},
};
use crate::{
    archive,
    claim::{VolumeClaimRecord, unique_workloads},
    cluster::Cluster,
    context::Context,
    remote::RemoteStore,
    resolver::Resolver,
    scaler::ScaleController,
    workload::WorkloadRef,
};

/// A claim and the archive it will be written to.
struct PlannedArchive<'c> {
    claim: &'c VolumeClaimRecord,
    name: String,
    path: PathBuf,
}

impl<C: Cluster + ?Sized> Orchestrator<'_, C> {
    /// Back up every claim of the release.
    ///
    /// The workloads mounting the claims are held at zero replicas while the archives are written.
    /// Archive, upload and rotation failures are per claim, the run ends with
    /// [`RunError::Partial`] if any claim failed.
    pub async fn backup(&self, context: &mut Context) -> Result<Vec<BackupOutcome>, RunError> {
        let namespace = self.options.namespace.as_str();
        let release = self.options.release.as_str();

        let claims = Resolver::new(self.cluster)
            .resolve(context, namespace, release)
            .await?;

        context.current_context = "Backup";
        info!("{context}Found {} claims", claims.len());
        for claim in &claims {
            info!("{context}  {claim}");
        }

        let date = Local::now();
        let planned: Vec<PlannedArchive<'_>> = claims
            .iter()
            .map(|claim| {
                let name = self
                    .options
                    .template
                    .render(namespace, release, &claim.claim_name, date);
                let path = self.options.output_directory.join(&name);
                PlannedArchive { claim, name, path }
            })
            .collect();

        let workloads = unique_workloads(&claims);

        if self.options.dry_run {
            self.log_backup_plan(context, &planned, &workloads);
            return Ok(Vec::new());
        }

        fs::create_dir_all(&self.options.output_directory)
            .await
            .map_err(|e| RunError::Io(e, "create output directory"))?;

        let controller =
            ScaleController::new(self.cluster, self.options.scale, self.cancel.clone());
        let quiesced = controller.quiesce(context, workloads).await?;

        let mut outcomes = self.archive_claims(context, &planned).await;

        // Scale back failures are logged by the handle and never fail the run.
        if quiesced.release(context).await.is_err() {
            warn!("{context}Some workloads were not restored, check their replicas");
        }

        if let Some(remote) = self.remote {
            self.upload_and_rotate(context, remote, &mut outcomes).await;
        }

        context.current_context = "Summary";
        log_backup_summary(context, &outcomes);

        let failed = outcomes
            .iter()
            .filter(|outcome| outcome.failure.is_some())
            .count();
        check_partial(failed, outcomes.len())?;

        Ok(outcomes)
    }

    async fn archive_claims(
        &self,
        context: &mut Context,
        planned: &[PlannedArchive<'_>],
    ) -> Vec<BackupOutcome> {
        context.current_context = "Archive";

        let mut outcomes = Vec::with_capacity(planned.len());
        for PlannedArchive { claim, name, path } in planned {
            let result = if self.cancel.is_cancelled() {
                Err(ClaimFailure::Cancelled)
            } else {
                info!(
                    "{context}Archiving {} -> {}",
                    claim.host_path.display(),
                    path.display()
                );

                let source = claim.host_path.clone();
                let destination = path.clone();
                match task::spawn_blocking(move || archive::create(&source, &destination)).await {
                    Ok(Ok(bytes)) => Ok(bytes),
                    Ok(Err(e)) => Err(ClaimFailure::Archive(e)),
                    Err(e) => Err(ClaimFailure::Join(e.to_string())),
                }
            };

            let (bytes, failure) = match result {
                Ok(bytes) => {
                    info!(
                        "{context}Archived {} ({})",
                        claim.claim_name,
                        format_size(bytes)
                    );
                    (bytes, None)
                }
                Err(failure) => {
                    error!("{context}Failed to archive {}: {failure}", claim.claim_name);
                    (0, Some(failure))
                }
            };

            outcomes.push(BackupOutcome {
                claim: claim.claim_name.clone(),
                name: name.clone(),
                archive: path.clone(),
                bytes,
                failure,
            });
        }

        outcomes
    }

    /// Upload each archived claim then rotate its remote copies.
    async fn upload_and_rotate(
        &self,
        context: &mut Context,
        remote: &RemoteStore,
        outcomes: &mut [BackupOutcome],
    ) {
        context.current_context = "Upload";

        for outcome in outcomes.iter_mut().filter(|outcome| outcome.failure.is_none()) {
            match remote.upload(context, &outcome.archive, &outcome.name).await {
                Ok(bytes) => info!(
                    "{context}Uploaded {} to {} ({})",
                    outcome.name,
                    remote.bucket(),
                    format_size(bytes)
                ),
                Err(e) => {
                    error!("{context}Failed to upload {}: {e}", outcome.name);
                    outcome.failure = Some(ClaimFailure::Upload(e));
                    continue;
                }
            }

            if self.options.keep_last == 0 {
                continue;
            }

            let prefix = self.options.template.prefix(
                &self.options.namespace,
                &self.options.release,
                &outcome.claim,
            );
            match remote.rotate(context, &prefix, self.options.keep_last).await {
                Ok(deleted) => {
                    for key in &deleted {
                        info!("{context}Rotated out {key}");
                    }
                }
                Err(e) => {
                    error!(
                        "{context}Rotation of '{prefix}' stopped after deleting [{}]: {}",
                        e.deleted.join(", "),
                        e.source
                    );
                    outcome.failure = Some(ClaimFailure::Rotate(e));
                }
            }
        }
    }

    fn log_backup_plan(
        &self,
        context: &Context,
        planned: &[PlannedArchive<'_>],
        workloads: &[WorkloadRef],
    ) {
        self.log_scale_down_plan(context, workloads);

        for PlannedArchive { claim, name, path } in planned {
            info!(
                "{context}[Dry Run] Would archive {} -> {}",
                claim.host_path.display(),
                path.display()
            );

            if let Some(remote) = self.remote {
                info!("{context}[Dry Run] Would upload {name} to {}", remote.bucket());

                if self.options.keep_last > 0 {
                    let prefix = self.options.template.prefix(
                        &self.options.namespace,
                        &self.options.release,
                        &claim.claim_name,
                    );
                    info!(
                        "{context}[Dry Run] Would keep the newest {} copies under '{prefix}'",
                        self.options.keep_last
                    );
                }
            }
        }

        self.log_scale_back_plan(context, workloads);
    }
}
