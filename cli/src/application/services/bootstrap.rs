//! Application service: GitOps bootstrap use-case.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.
//! All I/O is routed through injected port traits.
//!
//! The SSH agent is stopped on every path once it has started, and the
//! bootstrap key is revoked on every path once it has been registered. A run
//! deadline interrupts the step in flight, never the cleanup.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::application::ports::{
    GitOpsDriver, GitOpsTarget, KeyRegistry, ProgressReporter, SshAgent,
};
use crate::application::services::deploy_keys::replace_key;
use crate::domain::keys::{AGENT_KEY_TITLE, GITHUB_KNOWN_HOSTS, bootstrap_key_title};
use crate::domain::{
    BootstrapError, BootstrapStep, ClusterState, DeadlineExceeded, DeployKey, DesiredSpec,
    GitRepository, KeyPairPath, ProfileFailure, ProfileRef, SshSession,
};

/// Time given to the registry to propagate a new key before it is used.
pub const SETTLE_DELAY: Duration = Duration::from_secs(5);

/// Inputs of a bootstrap that do not come from the desired spec.
#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    pub repository: GitRepository,
    pub git_email: String,
    /// Where the ephemeral key pair is written.
    pub identity: KeyPairPath,
    pub settle_delay: Duration,
    /// Steps still running at this instant are abandoned; revocation and the
    /// agent stop run regardless.
    pub deadline: Option<Instant>,
}

/// Outcome of a bootstrap that reached profile enablement.
#[derive(Debug, Clone)]
pub struct BootstrapReport {
    /// Title the ephemeral key was registered under (now revoked).
    pub bootstrap_key_title: String,
    /// The GitOps agent's long-lived key as registered.
    pub agent_key: DeployKey,
    pub enabled_profiles: Vec<ProfileRef>,
    pub profile_failures: Vec<ProfileFailure>,
}

/// Run the bootstrap sequence against a present cluster.
///
/// 1. start an agent session
/// 2. generate a key pair, trust the git host, load the key
/// 3. register the public key under a fresh `push-key-*` title, replacing
///    only a key with that exact title
/// 4. wait for the registry to settle
/// 5. enable the GitOps repository
/// 6. register the agent's own key under `flux`
/// 7. revoke the bootstrap key (whatever happened in 4 to 6)
/// 8. enable each profile in order; failures are collected, not fatal
///
/// Bootstrap keys of other runs are left alone, so concurrent runs against
/// one repository do not revoke each other's keys mid-push.
///
/// # Errors
///
/// Returns `BootstrapError::ClusterNotPresent` unless `cluster_state` is
/// present, and `BootstrapError::Step` naming the step that failed otherwise.
pub async fn bootstrap(
    desired: &DesiredSpec,
    cluster_state: ClusterState,
    ssh: &impl SshAgent,
    registry: &impl KeyRegistry,
    gitops: &impl GitOpsDriver,
    reporter: &impl ProgressReporter,
    opts: &BootstrapOptions,
) -> Result<BootstrapReport, BootstrapError> {
    if cluster_state != ClusterState::Present {
        return Err(BootstrapError::ClusterNotPresent(cluster_state));
    }

    reporter.step("starting ssh-agent...");
    let session = ssh
        .start()
        .await
        .map_err(at(BootstrapStep::StartAgent))?;

    let result = bootstrap_in_session(desired, &session, ssh, registry, gitops, reporter, opts).await;

    if let Err(e) = ssh.stop(&session).await {
        warn!(pid = session.agent_pid, error = %format!("{e:#}"), "stopping ssh-agent failed");
        reporter.warn(&format!("could not stop ssh-agent: {e:#}"));
    }
    result
}

async fn bootstrap_in_session(
    desired: &DesiredSpec,
    session: &SshSession,
    ssh: &impl SshAgent,
    registry: &impl KeyRegistry,
    gitops: &impl GitOpsDriver,
    reporter: &impl ProgressReporter,
    opts: &BootstrapOptions,
) -> Result<BootstrapReport, BootstrapError> {
    reporter.step("generating bootstrap key...");
    let deadline = opts.deadline;
    let public_key = bounded(
        deadline,
        BootstrapStep::GenerateKey,
        ssh.generate_key(&opts.identity),
    )
    .await?;
    bounded(
        deadline,
        BootstrapStep::GenerateKey,
        ssh.trust_hosts(GITHUB_KNOWN_HOSTS),
    )
    .await?;
    bounded(
        deadline,
        BootstrapStep::GenerateKey,
        ssh.add_key(session, &opts.identity),
    )
    .await?;

    let title = bootstrap_key_title(&mut rand::thread_rng());
    reporter.step(&format!("registering bootstrap key '{title}'..."));
    // Not interrupted once sent: a key created without us seeing its id
    // could never be revoked.
    if deadline.is_some_and(|d| Instant::now() >= d) {
        return Err(deadline_reached(BootstrapStep::RegisterBootstrapKey));
    }
    let bootstrap_key = replace_key(registry, &title, &public_key)
        .await
        .map_err(at(BootstrapStep::RegisterBootstrapKey))?;
    info!(id = bootstrap_key.id, %title, "bootstrap key registered");

    let git_url = opts.repository.git_url();
    let target = GitOpsTarget {
        cluster_name: &desired.cluster_name,
        region: &desired.region,
        git_url: &git_url,
        git_email: &opts.git_email,
        private_key_path: opts.identity.private(),
    };

    let enabled = enable_repository(&target, session, registry, gitops, reporter, opts).await;

    reporter.step("revoking bootstrap key...");
    let revoked = registry.delete(bootstrap_key.id).await;
    let agent_key = match (enabled, revoked) {
        (Ok(agent_key), Ok(())) => {
            reporter.success("bootstrap key revoked");
            agent_key
        }
        (Ok(_), Err(e)) => return Err(BootstrapError::at(BootstrapStep::RevokeBootstrapKey, e)),
        (Err(e), Ok(())) => return Err(e),
        (Err(e), Err(revoke)) => {
            warn!(id = bootstrap_key.id, error = %format!("{revoke:#}"), "revoking bootstrap key failed");
            reporter.warn(&format!(
                "could not revoke bootstrap key '{title}': {revoke:#}"
            ));
            return Err(e);
        }
    };

    let (enabled_profiles, profile_failures) =
        enable_profiles(&desired.profiles, &target, session, gitops, reporter, deadline).await;

    Ok(BootstrapReport {
        bootstrap_key_title: title,
        agent_key,
        enabled_profiles,
        profile_failures,
    })
}

fn at(step: BootstrapStep) -> impl FnOnce(anyhow::Error) -> BootstrapError {
    move |e| BootstrapError::at(step, e)
}

/// Run one step, giving up on it once `deadline` has passed.
async fn bounded<T>(
    deadline: Option<Instant>,
    step: BootstrapStep,
    work: impl Future<Output = anyhow::Result<T>>,
) -> Result<T, BootstrapError> {
    let Some(deadline) = deadline else {
        return work.await.map_err(at(step));
    };
    match tokio::time::timeout_at(deadline, work).await {
        Ok(result) => result.map_err(at(step)),
        Err(_) => Err(deadline_reached(step)),
    }
}

fn deadline_reached(step: BootstrapStep) -> BootstrapError {
    warn!(%step, "run deadline reached");
    BootstrapError::Step {
        step,
        source: Box::new(DeadlineExceeded),
    }
}

/// Steps 4 to 6: everything that needs the bootstrap key to be authorized.
async fn enable_repository(
    target: &GitOpsTarget<'_>,
    session: &SshSession,
    registry: &impl KeyRegistry,
    gitops: &impl GitOpsDriver,
    reporter: &impl ProgressReporter,
    opts: &BootstrapOptions,
) -> Result<DeployKey, BootstrapError> {
    let deadline = opts.deadline;
    if !opts.settle_delay.is_zero() {
        reporter.step(&format!(
            "waiting {}s for the key to propagate...",
            opts.settle_delay.as_secs()
        ));
        bounded(deadline, BootstrapStep::EnableRepository, async {
            tokio::time::sleep(opts.settle_delay).await;
            Ok(())
        })
        .await?;
    }

    reporter.step(&format!("enabling GitOps repository {}...", target.git_url));
    bounded(
        deadline,
        BootstrapStep::EnableRepository,
        gitops.enable_repository(target, session),
    )
    .await?;
    reporter.success("GitOps repository enabled");

    reporter.step("reading GitOps agent deploy key...");
    let agent_key = bounded(deadline, BootstrapStep::ReadAgentKey, async {
        let key = gitops.own_deploy_key().await?;
        let key = key.trim().to_string();
        anyhow::ensure!(!key.is_empty(), "GitOps agent reported an empty deploy key");
        Ok(key)
    })
    .await?;

    reporter.step(&format!("adding deploy key '{AGENT_KEY_TITLE}' to the repository..."));
    let registered = bounded(
        deadline,
        BootstrapStep::RegisterAgentKey,
        replace_key(registry, AGENT_KEY_TITLE, &agent_key),
    )
    .await?;
    reporter.success(&format!("deploy key '{AGENT_KEY_TITLE}' registered"));
    Ok(registered)
}

/// Step 8: best-effort, in order, no rollback.
async fn enable_profiles(
    profiles: &[ProfileRef],
    target: &GitOpsTarget<'_>,
    session: &SshSession,
    gitops: &impl GitOpsDriver,
    reporter: &impl ProgressReporter,
    deadline: Option<Instant>,
) -> (Vec<ProfileRef>, Vec<ProfileFailure>) {
    let mut enabled = Vec::new();
    let mut failures = Vec::new();
    for profile in profiles {
        reporter.step(&format!("enabling profile {profile}..."));
        let outcome = match deadline {
            Some(deadline) => {
                tokio::time::timeout_at(deadline, gitops.enable_profile(target, session, profile))
                    .await
                    .unwrap_or_else(|_| Err(DeadlineExceeded.into()))
            }
            None => gitops.enable_profile(target, session, profile).await,
        };
        match outcome {
            Ok(()) => {
                reporter.success(&format!("profile {profile} enabled"));
                enabled.push(profile.clone());
            }
            Err(e) => {
                warn!(%profile, error = %format!("{e:#}"), "enabling profile failed");
                reporter.warn(&format!("profile {profile} failed: {e:#}"));
                failures.push(ProfileFailure {
                    profile: profile.clone(),
                    message: format!("{e:#}"),
                });
            }
        }
    }
    (enabled, failures)
}
