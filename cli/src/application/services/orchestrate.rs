//! Application service: a full `apply` run.
//!
//! Reads the desired state once, reconciles the cluster, bootstraps GitOps
//! when the cluster ends up present, and captures the before/after pairs.
//! Once the initial state has been observed, the final pair is captured even
//! when reconciliation or the bootstrap fails.

use anyhow::Result;
use chrono::Utc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::application::ports::{
    ClusterDriver, Confirm, DesiredConfig, GitOpsDriver, KeyRegistry, ProgressReporter, SshAgent,
};
use crate::application::services::bootstrap::{BootstrapOptions, bootstrap};
use crate::application::services::reconcile::{ReconcilePolicy, reconcile};
use crate::domain::{ClusterState, DeadlineExceeded, RunReport, StatePair};

/// The collaborators a run drives.
pub struct Drivers<'a, C, S, K, G> {
    pub cluster: &'a C,
    pub ssh: &'a S,
    pub registry: &'a K,
    pub gitops: &'a G,
}

/// Tunables of a run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub policy: ReconcilePolicy,
    pub bootstrap: BootstrapOptions,
    /// Reconciliation is abandoned at this instant; the bootstrap stops
    /// between steps and still cleans up.
    pub deadline: Option<Instant>,
}

/// A run that got as far as observing the cluster.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: RunReport,
    /// Why reconciliation or the bootstrap stopped, if it did.
    pub error: Option<anyhow::Error>,
}

impl RunOutcome {
    /// The report if the run completed, the error otherwise.
    ///
    /// # Errors
    ///
    /// Returns the error that stopped the run.
    pub fn into_result(self) -> Result<RunReport> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.report),
        }
    }
}

/// Run reconciliation followed by the GitOps bootstrap.
///
/// Deleting a present cluster is confirmed first; a declined confirmation
/// ends the run without changes and marks the report as cancelled.
///
/// A failed reconciliation or bootstrap step does not skip the report: the
/// cluster is re-observed and the failure is returned in
/// [`RunOutcome::error`]. Profile failures are not errors; they are collected
/// in the report.
///
/// # Errors
///
/// Returns an error if the desired state cannot be loaded or the delete
/// confirmation cannot be read. Nothing has been changed in either case.
pub async fn run<C, S, K, G>(
    config: &impl DesiredConfig,
    drivers: &Drivers<'_, C, S, K, G>,
    confirm: &impl Confirm,
    reporter: &impl ProgressReporter,
    opts: &RunOptions,
) -> Result<RunOutcome>
where
    C: ClusterDriver,
    S: SshAgent,
    K: KeyRegistry,
    G: GitOpsDriver,
{
    let started_at = Utc::now();
    let desired = config.load()?;
    let name = desired.cluster_name.as_str();

    let initial = StatePair {
        observed: drivers.cluster.observe(name).await,
        desired: desired.state,
    };
    info!(cluster = name, %initial, "initial state");
    reporter.step(&initial.to_string());

    if initial.observed == ClusterState::Present
        && desired.state == ClusterState::Absent
        && !confirm.confirm(
            &format!("Delete cluster '{name}' in {}?", desired.region),
            true,
        )?
    {
        reporter.warn("Cancelled.");
        return Ok(RunOutcome {
            report: RunReport {
                started_at,
                finished_at: Utc::now(),
                initial,
                final_state: initial,
                cancelled: true,
                bootstrapped: false,
                profile_failures: Vec::new(),
            },
            error: None,
        });
    }

    let reconcile_work = reconcile(&desired, drivers.cluster, reporter, &opts.policy);
    let reconciled = match opts.deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, reconcile_work)
            .await
            .unwrap_or_else(|_| {
                Err(anyhow::Error::new(DeadlineExceeded)
                    .context(format!("reconciling cluster '{name}'")))
            }),
        None => reconcile_work.await,
    };

    let mut bootstrapped = false;
    let mut profile_failures = Vec::new();
    let error = match reconciled {
        Ok(ClusterState::Present) => {
            let bootstrap_opts = BootstrapOptions {
                deadline: opts.deadline,
                ..opts.bootstrap.clone()
            };
            match bootstrap(
                &desired,
                ClusterState::Present,
                drivers.ssh,
                drivers.registry,
                drivers.gitops,
                reporter,
                &bootstrap_opts,
            )
            .await
            {
                Ok(outcome) => {
                    bootstrapped = true;
                    profile_failures = outcome.profile_failures;
                    None
                }
                Err(e) => Some(anyhow::Error::new(e)),
            }
        }
        Ok(_) => None,
        Err(e) => Some(e),
    };
    if let Some(e) = &error {
        warn!(cluster = name, error = %format!("{e:#}"), "run stopped early");
    }

    let final_state = StatePair {
        observed: drivers.cluster.observe(name).await,
        desired: reread_desired_state(config),
    };
    info!(cluster = name, %final_state, "final state");

    Ok(RunOutcome {
        report: RunReport {
            started_at,
            finished_at: Utc::now(),
            initial,
            final_state,
            cancelled: false,
            bootstrapped,
            profile_failures,
        },
        error,
    })
}

/// Read-only snapshot of one cluster.
#[derive(Debug, Clone)]
pub struct ClusterStatus {
    pub cluster_name: String,
    pub region: String,
    pub pair: StatePair,
}

/// Observe the cluster and read the desired state without changing anything.
///
/// # Errors
///
/// Returns an error if the desired state cannot be loaded.
pub async fn status(
    config: &impl DesiredConfig,
    cluster: &impl ClusterDriver,
) -> Result<ClusterStatus> {
    let desired = config.load()?;
    let observed = cluster.observe(&desired.cluster_name).await;
    Ok(ClusterStatus {
        pair: StatePair {
            observed,
            desired: desired.state,
        },
        cluster_name: desired.cluster_name,
        region: desired.region,
    })
}

/// The desired state as declared now; unreadable config counts as unknown.
fn reread_desired_state(config: &impl DesiredConfig) -> ClusterState {
    match config.load() {
        Ok(desired) => desired.state,
        Err(e) => {
            warn!(error = %format!("{e:#}"), "re-reading desired state failed");
            ClusterState::Unknown
        }
    }
}
