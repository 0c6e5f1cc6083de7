//! Application service: cluster reconciliation.
//!
//! Compares the observed cluster with the desired state and performs at most
//! one transition. Only deletion loops: teardown is asynchronous at the
//! provider and has to be polled until the cluster is gone.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::application::ports::{ClusterDriver, ProgressReporter};
use crate::domain::config::format_duration;
use crate::domain::{ClusterState, DesiredSpec, ReconcileError};

/// Wait between a delete request and the next one.
pub const DELETE_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Delete attempts before giving up (about 30 minutes at the default interval).
pub const DEFAULT_MAX_DELETE_ATTEMPTS: u32 = 60;

/// Pacing and limits of the delete-convergence loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilePolicy {
    pub poll_interval: Duration,
    /// Maximum delete attempts; `0` keeps trying forever.
    pub max_delete_attempts: u32,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            poll_interval: DELETE_POLL_INTERVAL,
            max_delete_attempts: DEFAULT_MAX_DELETE_ATTEMPTS,
        }
    }
}

impl ReconcilePolicy {
    /// Keep deleting until the cluster disappears, however long it takes.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            max_delete_attempts: 0,
            ..Self::default()
        }
    }
}

/// Drive the cluster toward `desired.state`.
///
/// Returns the state derived from the most recent observation.
///
/// | observed | desired | action |
/// |----------|---------|--------|
/// | absent   | present | one create bounded by `desired.timeout` |
/// | absent   | absent  | nothing |
/// | present  | absent  | delete, poll, repeat until absent |
/// | present  | present | write kubeconfig (update is not implemented) |
/// | any      | unknown | nothing |
/// | unknown  | any     | nothing |
///
/// # Errors
///
/// Returns an error if creation fails and the cluster is not present
/// afterwards, or if the delete loop exceeds `policy.max_delete_attempts`.
/// A kubeconfig that cannot be written is only a warning: the cluster is
/// still present and the caller proceeds.
pub async fn reconcile(
    desired: &DesiredSpec,
    driver: &impl ClusterDriver,
    reporter: &impl ProgressReporter,
    policy: &ReconcilePolicy,
) -> Result<ClusterState> {
    let name = desired.cluster_name.as_str();
    let observed = driver.observe(name).await;
    info!(cluster = name, %observed, desired = %desired.state, "reconciling");

    match (observed, desired.state) {
        (_, ClusterState::Unknown) => {
            reporter.warn("desired state is not declared; leaving the cluster as it is");
            Ok(observed)
        }
        (ClusterState::Unknown, _) => {
            reporter.warn(&format!(
                "could not observe cluster '{name}'; leaving it as it is"
            ));
            Ok(observed)
        }
        (ClusterState::Absent, ClusterState::Absent) => {
            reporter.success("cluster is absent, nothing to do");
            Ok(ClusterState::Absent)
        }
        (ClusterState::Absent, ClusterState::Present) => {
            create_cluster(desired, driver, reporter).await
        }
        (ClusterState::Present, ClusterState::Absent) => {
            delete_until_absent(name, driver, reporter, policy).await
        }
        (ClusterState::Present, ClusterState::Present) => {
            refresh_cluster(name, driver, reporter).await
        }
    }
}

/// Single creation attempt, followed by a fresh observation.
async fn create_cluster(
    desired: &DesiredSpec,
    driver: &impl ClusterDriver,
    reporter: &impl ProgressReporter,
) -> Result<ClusterState> {
    let name = desired.cluster_name.as_str();
    let template = desired
        .template_yaml()
        .context("rendering cluster template")?;

    reporter.step(&format!(
        "creating cluster '{name}' (timeout {})...",
        format_duration(desired.timeout)
    ));
    let created = driver.create(&template, desired.timeout).await;
    let observed = driver.observe(name).await;

    match created {
        Ok(()) if observed == ClusterState::Present => {
            reporter.success(&format!("cluster '{name}' created"));
            Ok(observed)
        }
        Ok(()) => {
            reporter.warn(&format!(
                "create finished but cluster '{name}' is {observed}"
            ));
            Ok(observed)
        }
        Err(e) if observed == ClusterState::Present => {
            warn!(cluster = name, error = %format!("{e:#}"), "create reported an error");
            reporter.warn(&format!(
                "create reported an error but cluster '{name}' is present: {e:#}"
            ));
            Ok(observed)
        }
        Err(e) => Err(ReconcileError::CreateFailed {
            cluster: name.to_string(),
            observed,
            source: e.into(),
        }
        .into()),
    }
}

/// Delete, re-observe and wait until the cluster is reported absent.
async fn delete_until_absent(
    name: &str,
    driver: &impl ClusterDriver,
    reporter: &impl ProgressReporter,
    policy: &ReconcilePolicy,
) -> Result<ClusterState> {
    reporter.step(&format!("deleting cluster '{name}'..."));
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        if let Err(e) = driver.delete(name).await {
            warn!(cluster = name, attempts, error = %format!("{e:#}"), "delete request failed");
            reporter.warn(&format!("delete request failed: {e:#}"));
        }

        let observed = driver.observe(name).await;
        if observed == ClusterState::Absent {
            info!(cluster = name, attempts, "cluster deleted");
            reporter.success(&format!("cluster '{name}' deleted"));
            return Ok(observed);
        }

        if policy.max_delete_attempts != 0 && attempts >= policy.max_delete_attempts {
            return Err(ReconcileError::ConvergenceTimeout {
                cluster: name.to_string(),
                attempts,
            }
            .into());
        }

        reporter.step(&format!(
            "cluster is {observed}; waiting {}s",
            policy.poll_interval.as_secs()
        ));
        tokio::time::sleep(policy.poll_interval).await;
        reporter.step("cluster still here, deleting again...");
    }
}

/// Present and desired present: there is no update path, only fresh credentials.
async fn refresh_cluster(
    name: &str,
    driver: &impl ClusterDriver,
    reporter: &impl ProgressReporter,
) -> Result<ClusterState> {
    reporter.warn("updating an existing cluster is not implemented; refreshing kubeconfig only");
    reporter.step("writing kubeconfig...");
    match driver.write_kubeconfig(name).await {
        Ok(()) => reporter.success("kubeconfig written"),
        Err(e) => {
            warn!(cluster = name, error = %format!("{e:#}"), "writing kubeconfig failed");
            reporter.warn(&format!(
                "could not write kubeconfig for cluster '{name}': {e:#}"
            ));
        }
    }
    Ok(ClusterState::Present)
}
