use core::fmt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio::task;
use tracing::{error, info, warn};

use super::{
    Orchestrator, RunError, check_partial, find_claim,
    report::{ClaimFailure, RestoreOutcome, format_size, log_restore_summary},
};
use crate::{
    archive,
    claim::{VolumeClaimRecord, unique_workloads},
    cluster::Cluster,
    context::Context,
    resolver::Resolver,
    scaler::ScaleController,
};

/// Where an archive is read from.
#[derive(Debug, Clone)]
enum ArchiveSource {
    Local(PathBuf),
    Remote(String),
}

impl fmt::Display for ArchiveSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote(key) => write!(f, "remote:{key}"),
        }
    }
}

/// An archive matched to the claim it restores.
struct PlannedRestore<'c> {
    claim: &'c VolumeClaimRecord,
    source: ArchiveSource,
}

impl<C: Cluster + ?Sized> Orchestrator<'_, C> {
    /// Restore archives into the release's claims.
    ///
    /// `targets` are remote keys when the orchestrator has a remote store and local paths
    /// otherwise. Without targets the newest remote archive of each claim is restored. Every
    /// archive must name a claim of the release. Downloads finish before any workload is scaled.
    pub async fn restore(
        &self,
        context: &mut Context,
        targets: &[String],
    ) -> Result<Vec<RestoreOutcome>, RunError> {
        let claims = Resolver::new(self.cluster)
            .resolve(
                context,
                &self.options.namespace,
                &self.options.release,
            )
            .await?;

        context.current_context = "Restore Plan";
        let sources = self.restore_sources(context, &claims, targets).await?;
        let planned = self.match_claims(context, &claims, sources)?;
        let workloads = unique_workloads(planned.iter().map(|planned| planned.claim));

        if self.options.dry_run {
            self.log_scale_down_plan(context, &workloads);
            for PlannedRestore { claim, source } in &planned {
                info!(
                    "{context}[Dry Run] Would restore {source} -> {} ({})",
                    claim.claim_name,
                    claim.host_path.display()
                );
            }
            self.log_scale_back_plan(context, &workloads);
            return Ok(Vec::new());
        }

        if planned.is_empty() {
            info!("{context}No archives to restore");
            return Ok(Vec::new());
        }

        context.current_context = "Download";
        let scratch =
            TempDir::new().map_err(|e| RunError::Io(e, "create download directory"))?;
        let mut fetched = Vec::with_capacity(planned.len());
        for PlannedRestore { claim, source } in planned {
            let path = self.fetch(context, &source, scratch.path()).await?;
            fetched.push((claim, source, path));
        }

        let controller =
            ScaleController::new(self.cluster, self.options.scale, self.cancel.clone());
        let quiesced = controller.quiesce(context, workloads).await?;

        context.current_context = "Restore";
        let mut outcomes = Vec::with_capacity(fetched.len());
        for (claim, source, path) in &fetched {
            let failure = self.restore_claim(context, claim, source, path).await.err();
            outcomes.push(RestoreOutcome {
                claim: claim.claim_name.clone(),
                archive: source.to_string(),
                failure,
            });
        }

        // Scale back failures are logged by the handle and never fail the run.
        if quiesced.release(context).await.is_err() {
            warn!("{context}Some workloads were not restored, check their replicas");
        }

        context.current_context = "Summary";
        log_restore_summary(context, &outcomes);

        let failed = outcomes
            .iter()
            .filter(|outcome| outcome.failure.is_some())
            .count();
        check_partial(failed, outcomes.len())?;

        Ok(outcomes)
    }

    /// The archives to restore, each with the claim name recovered from it.
    async fn restore_sources(
        &self,
        context: &Context,
        claims: &[VolumeClaimRecord],
        targets: &[String],
    ) -> Result<Vec<(String, ArchiveSource)>, RunError> {
        let namespace = self.options.namespace.as_str();
        let release = self.options.release.as_str();
        let template = &self.options.template;

        if !targets.is_empty() {
            let mut sources = Vec::with_capacity(targets.len());
            for target in targets {
                let claim = match template.parse_claim(target, namespace, release) {
                    Ok(claim) => claim,
                    Err(e) if self.options.dry_run => {
                        warn!("{context}[Dry Run] Skipping '{target}': {e}");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };

                let source = match self.remote {
                    Some(_) => ArchiveSource::Remote(target.clone()),
                    None => ArchiveSource::Local(PathBuf::from(target)),
                };
                sources.push((claim, source));
            }

            return Ok(sources);
        }

        let Some(remote) = self.remote else {
            return Err(RunError::NoRestoreSource);
        };

        let mut sources = Vec::new();
        for claim in claims {
            let prefix = template.prefix(namespace, release, &claim.claim_name);

            let objects = match remote.list_by_prefix(context, &prefix).await {
                Ok(objects) => objects,
                Err(e) if self.options.dry_run => {
                    warn!(
                        "{context}[Dry Run] Could not list archives of {}: {e}",
                        claim.claim_name
                    );
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            match objects.into_iter().next() {
                Some(latest) => {
                    info!(
                        "{context}Latest archive of {}: {} ({}, {})",
                        claim.claim_name,
                        latest.key,
                        format_size(latest.size),
                        latest.last_modified
                    );
                    sources.push((claim.claim_name.clone(), ArchiveSource::Remote(latest.key)));
                }
                None => info!(
                    "{context}No remote archives of {}, skipping",
                    claim.claim_name
                ),
            }
        }

        Ok(sources)
    }

    /// Match each archive to a discovered claim.
    fn match_claims<'c>(
        &self,
        context: &Context,
        claims: &'c [VolumeClaimRecord],
        sources: Vec<(String, ArchiveSource)>,
    ) -> Result<Vec<PlannedRestore<'c>>, RunError> {
        let mut planned = Vec::with_capacity(sources.len());

        for (claim_name, source) in sources {
            match find_claim(claims, &claim_name) {
                Some(claim) => {
                    context.detail(format_args!("{source} -> claim {claim_name}"));
                    planned.push(PlannedRestore { claim, source });
                }
                None if self.options.dry_run => warn!(
                    "{context}[Dry Run] Archive {source} is for claim '{claim_name}', which is not part of the release"
                ),
                None => {
                    return Err(RunError::Unmatched {
                        claim: claim_name,
                        archive: source.to_string(),
                    });
                }
            }
        }

        Ok(planned)
    }

    /// A local path to the archive, downloading it into `scratch` if it is remote.
    async fn fetch(
        &self,
        context: &Context,
        source: &ArchiveSource,
        scratch: &Path,
    ) -> Result<PathBuf, RunError> {
        match source {
            ArchiveSource::Local(path) => Ok(path.clone()),
            ArchiveSource::Remote(key) => {
                let Some(remote) = self.remote else {
                    return Err(RunError::NoRestoreSource);
                };

                let file_name = key.rsplit('/').next().unwrap_or(key);
                let destination = scratch.join(file_name);
                let bytes = remote.download(context, key, &destination).await?;
                info!("{context}Downloaded {key} ({})", format_size(bytes));

                Ok(destination)
            }
        }
    }

    async fn restore_claim(
        &self,
        context: &Context,
        claim: &VolumeClaimRecord,
        source: &ArchiveSource,
        path: &Path,
    ) -> Result<(), ClaimFailure> {
        if self.cancel.is_cancelled() {
            error!("{context}Cancelled before restoring {}", claim.claim_name);
            return Err(ClaimFailure::Cancelled);
        }

        info!(
            "{context}Restoring {source} -> {}",
            claim.host_path.display()
        );

        let archive_path = path.to_path_buf();
        let target = claim.host_path.clone();
        let result = match task::spawn_blocking(move || archive::restore(&archive_path, &target))
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ClaimFailure::Archive(e)),
            Err(e) => Err(ClaimFailure::Join(e.to_string())),
        };

        match &result {
            Ok(()) => info!("{context}Restored {}", claim.claim_name),
            Err(failure) => error!("{context}Failed to restore {}: {failure}", claim.claim_name),
        }

        result
    }
}
