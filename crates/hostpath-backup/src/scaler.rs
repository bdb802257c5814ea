//! Scale workloads down to quiescence and back to their original replicas.
//!

use core::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    cluster::{Cluster, ClusterError},
    context::Context,
    workload::WorkloadRef,
};

const MINIMUM_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Timing of the scale down readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleSettings {
    /// How often to poll a workload's ready replicas.
    pub poll_interval: Duration,

    /// How long to wait for each workload to have no ready replicas.
    pub timeout: Duration,
}

impl Default for ScaleSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(5 * 60),
        }
    }
}

/// Drives workloads through quiescence and recovery.
pub struct ScaleController<'a, C: Cluster + ?Sized> {
    cluster: &'a C,
    settings: ScaleSettings,
    cancel: CancellationToken,
}

impl<'a, C: Cluster + ?Sized> ScaleController<'a, C> {
    /// Create a new scale controller.
    pub fn new(cluster: &'a C, settings: ScaleSettings, cancel: CancellationToken) -> Self {
        Self {
            cluster,
            settings,
            cancel,
        }
    }

    /// Scale every workload to zero then wait until none have ready replicas.
    ///
    /// Updates are issued in order and the first failure aborts the call.
    pub async fn scale_down(
        &self,
        context: &mut Context,
        workloads: &[WorkloadRef],
    ) -> Result<(), ScaleError> {
        context.current_context = "Scale Down";

        for workload in workloads {
            if self.cancel.is_cancelled() {
                return Err(ScaleError::Cancelled(workload.to_string()));
            }

            context.detail(format_args!(
                "Scaling {workload} to 0 (was {})",
                workload.original_replicas
            ));
            self.cluster
                .set_replicas(workload.kind, &workload.namespace, &workload.name, 0)
                .await
                .map_err(|e| ScaleError::Cluster(e, workload.to_string()))?;
        }

        for workload in workloads {
            self.wait_for_zero(context, workload).await?;
            context.detail(format_args!("{workload} scaled down"));
        }

        Ok(())
    }

    /// Restore every workload to its original replica count.
    ///
    /// A failure is logged and the remaining workloads are still restored, the first failure is
    /// returned. Readiness is not awaited.
    pub async fn scale_back(
        &self,
        context: &mut Context,
        workloads: &[WorkloadRef],
    ) -> Result<(), ScaleError> {
        context.current_context = "Scale Back";

        let mut first_error = None;
        for workload in workloads {
            context.detail(format_args!(
                "Restoring {workload} to {} replicas",
                workload.original_replicas
            ));

            let result = self
                .cluster
                .set_replicas(
                    workload.kind,
                    &workload.namespace,
                    &workload.name,
                    workload.original_replicas,
                )
                .await;

            if let Err(error) = result {
                error!("{context}Failed to restore {workload}: {error}");
                if first_error.is_none() {
                    first_error = Some(ScaleError::Cluster(error, workload.to_string()));
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Scale the workloads down and return a handle that scales them back when released.
    ///
    /// If scaling down fails the workloads are scaled back before the error is returned.
    pub async fn quiesce<'s>(
        &'s self,
        context: &mut Context,
        workloads: Vec<WorkloadRef>,
    ) -> Result<Quiesced<'s, 'a, C>, ScaleError> {
        if workloads.is_empty() {
            return Ok(Quiesced {
                controller: self,
                workloads,
                released: false,
            });
        }

        info!("{context}Scaling down {} workloads", workloads.len());

        if let Err(error) = self.scale_down(context, &workloads).await {
            error!("{context}Scale down failed, restoring workloads: {error}");
            if let Err(restore_error) = self.scale_back(context, &workloads).await {
                error!("{context}Failed to restore some workloads: {restore_error}");
            }
            return Err(error);
        }

        info!("{context}All workloads scaled to 0");

        Ok(Quiesced {
            controller: self,
            workloads,
            released: false,
        })
    }

    async fn wait_for_zero(
        &self,
        context: &Context,
        workload: &WorkloadRef,
    ) -> Result<(), ScaleError> {
        let deadline = Instant::now() + self.settings.timeout;
        let mut ticker = interval(self.settings.poll_interval.max(MINIMUM_POLL_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    return Err(ScaleError::Cancelled(workload.to_string()));
                }

                () = sleep_until(deadline) => {
                    return Err(ScaleError::TimedOut {
                        workload: workload.to_string(),
                        timeout: self.settings.timeout,
                    });
                }

                _ = ticker.tick() => {
                    let status = self
                        .cluster
                        .workload_status(workload.kind, &workload.namespace, &workload.name)
                        .await
                        .map_err(|e| ScaleError::Cluster(e, workload.to_string()))?;

                    context.detail(format_args!(
                        "{workload}: {} ready replicas",
                        status.ready_replicas
                    ));

                    if status.ready_replicas == 0 {
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Workloads held at zero replicas.
///
/// [`Quiesced::release`] scales the workloads back. It must be called on every exit path once the
/// workloads are quiesced.
#[must_use = "quiesced workloads must be released"]
pub struct Quiesced<'s, 'a, C: Cluster + ?Sized> {
    controller: &'s ScaleController<'a, C>,
    workloads: Vec<WorkloadRef>,
    released: bool,
}

impl<C: Cluster + ?Sized> Quiesced<'_, '_, C> {
    /// The quiesced workloads.
    pub fn workloads(&self) -> &[WorkloadRef] {
        &self.workloads
    }

    /// Scale the workloads back to their original replicas.
    ///
    /// Failures are logged, the first is returned.
    pub async fn release(mut self, context: &mut Context) -> Result<(), ScaleError> {
        self.released = true;

        if self.workloads.is_empty() {
            return Ok(());
        }

        info!("{context}Restoring workload replicas");
        let result = self.controller.scale_back(context, &self.workloads).await;
        match &result {
            Ok(()) => info!("{context}All workloads restored"),
            Err(error) => error!("{context}Failed to restore some workloads: {error}"),
        }

        result
    }
}

impl<C: Cluster + ?Sized> Drop for Quiesced<'_, '_, C> {
    fn drop(&mut self) {
        if !self.released && !self.workloads.is_empty() {
            let names: Vec<String> = self.workloads.iter().map(ToString::to_string).collect();
            error!(
                "Quiesced workloads were dropped without being released: {}",
                names.join(", ")
            );
        }
    }
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ScaleError {
    #[error("Failed to scale {1}:\n{0}")]
    Cluster(#[source] ClusterError, String),

    #[error("Timed out after {timeout:?} waiting for {workload} to scale down")]
    TimedOut { workload: String, timeout: Duration },

    #[error("Cancelled while scaling down {0}")]
    Cancelled(String),
}
