//! Infrastructure implementation of the `GitOpsDriver` port.
//!
//! Flux is installed and configured through `eksctl enable repo` /
//! `eksctl enable profile`; its deploy key is read back with `fluxctl`.

use anyhow::{Context, Result};

use crate::application::ports::{CommandRunner, GitOpsDriver, GitOpsTarget};
use crate::domain::{ProfileRef, SshSession};
use crate::infra::command_runner::{DEFAULT_GITOPS_TIMEOUT, TokioCommandRunner, checked_stdout};

/// Namespace Flux is installed into.
pub const FLUX_NAMESPACE: &str = "flux";

/// Infrastructure adapter that drives `eksctl` GitOps subcommands and `fluxctl`.
pub struct EksctlGitOps<R: CommandRunner> {
    runner: R,
}

impl<R: CommandRunner> EksctlGitOps<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    /// The underlying command runner.
    pub fn runner(&self) -> &R {
        &self.runner
    }
}

impl EksctlGitOps<TokioCommandRunner> {
    /// Convenience constructor for production use.
    #[must_use]
    pub fn default_runner() -> Self {
        Self::new(TokioCommandRunner::new(DEFAULT_GITOPS_TIMEOUT))
    }
}

/// Flags shared by `enable repo` and `enable profile`.
fn target_args(target: &GitOpsTarget<'_>) -> Vec<String> {
    vec![
        format!("--git-url={}", target.git_url),
        format!("--git-email={}", target.git_email),
        format!(
            "--git-private-ssh-key-path={}",
            target.private_key_path.display()
        ),
        format!("--cluster={}", target.cluster_name),
        format!("--region={}", target.region),
    ]
}

/// Session bindings plus the opt-in for experimental eksctl commands.
fn gitops_env(session: &SshSession) -> Vec<(String, String)> {
    let mut env = session.env();
    env.push(("EKSCTL_EXPERIMENTAL".to_string(), "true".to_string()));
    env
}

impl<R: CommandRunner> GitOpsDriver for EksctlGitOps<R> {
    async fn enable_repository(&self, target: &GitOpsTarget<'_>, session: &SshSession) -> Result<()> {
        let mut args = vec!["enable".to_string(), "repo".to_string()];
        args.extend(target_args(target));
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        let output = self
            .runner
            .run_with_env("eksctl", &args, &gitops_env(session))
            .await
            .context("eksctl enable repo")?;
        checked_stdout(&output, "eksctl enable repo")?;
        Ok(())
    }

    async fn enable_profile(
        &self,
        target: &GitOpsTarget<'_>,
        session: &SshSession,
        profile: &ProfileRef,
    ) -> Result<()> {
        let mut args = vec!["enable".to_string(), "profile".to_string()];
        args.extend(target_args(target));
        args.push(profile.to_string());
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        let output = self
            .runner
            .run_with_env("eksctl", &args, &gitops_env(session))
            .await
            .with_context(|| format!("eksctl enable profile {profile}"))?;
        checked_stdout(&output, "eksctl enable profile")?;
        Ok(())
    }

    async fn own_deploy_key(&self) -> Result<String> {
        let namespace = format!("--k8s-fwd-ns={FLUX_NAMESPACE}");
        let output = self
            .runner
            .run("fluxctl", &[&namespace, "identity"])
            .await
            .context("fluxctl identity")?;
        let key = checked_stdout(&output, "fluxctl identity")?;
        Ok(key.trim().to_string())
    }
}
