//! Apply command: reconcile, bootstrap, report.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tokio::time::Instant;

use crate::app::AppContext;
use crate::application::services::bootstrap::{BootstrapOptions, SETTLE_DELAY};
use crate::application::services::orchestrate::{self, Drivers, RunOptions};
use crate::application::services::reconcile::{
    DEFAULT_MAX_DELETE_ATTEMPTS, DELETE_POLL_INTERVAL, ReconcilePolicy,
};
use crate::domain::config::{format_duration, parse_duration};
use crate::domain::keys::DEFAULT_GIT_EMAIL;
use crate::domain::{DeadlineExceeded, ProfilesFailed, RegistryCredentials};
use crate::infra::eksctl::EksctlCluster;
use crate::infra::github::GithubKeyRegistry;
use crate::infra::gitops::EksctlGitOps;
use crate::infra::ssh::{BootstrapIdentity, OpenSshAgent};
use crate::output::{TerminalReporter, json};

/// Arguments for the apply command.
#[derive(Args)]
pub struct ApplyArgs {
    /// Where the bootstrap key pair is written [default: a temporary directory
    /// removed after the run]
    #[arg(long, value_name = "PATH")]
    pub identity_file: Option<PathBuf>,

    /// Commit email used by the GitOps agent
    #[arg(long, default_value = DEFAULT_GIT_EMAIL)]
    pub git_email: String,

    /// Delete attempts before giving up (0 keeps trying forever)
    #[arg(long, default_value_t = DEFAULT_MAX_DELETE_ATTEMPTS)]
    pub max_delete_attempts: u32,

    /// Stop the run after this long (e.g. 45m, 1h30m); the bootstrap key is
    /// still revoked and the ssh-agent still stopped
    #[arg(long, value_name = "DURATION", value_parser = parse_duration_arg)]
    pub run_timeout: Option<Duration>,
}

fn parse_duration_arg(raw: &str) -> Result<Duration, String> {
    parse_duration(raw).map_err(|e| e.to_string())
}

/// Run the apply command.
///
/// Credentials are resolved before anything is observed or changed.
///
/// # Errors
///
/// Returns an error if credentials or configuration are missing, if a step
/// fails, if the run exceeds `--run-timeout`, or if any profile failed.
pub async fn run(app: &AppContext, args: &ApplyArgs) -> Result<()> {
    let credentials = RegistryCredentials::resolve(
        std::env::var("GH_TOKEN").ok().as_deref(),
        std::env::var("GITHUB_REPOSITORY").ok().as_deref(),
    )?;
    let identity = BootstrapIdentity::resolve(args.identity_file.as_deref())?;
    if identity.overwrites_existing() {
        app.output.warn(&format!(
            "{} will be replaced by the bootstrap key",
            identity.key_pair().private().display()
        ));
    }

    let cluster = EksctlCluster::default_runner();
    cluster.check_prerequisites().await?;
    let ssh = OpenSshAgent::default_runner()?;
    let registry = GithubKeyRegistry::new(&credentials)?;
    let gitops = EksctlGitOps::default_runner();

    let drivers = Drivers {
        cluster: &cluster,
        ssh: &ssh,
        registry: &registry,
        gitops: &gitops,
    };
    let opts = RunOptions {
        policy: ReconcilePolicy {
            poll_interval: DELETE_POLL_INTERVAL,
            max_delete_attempts: args.max_delete_attempts,
        },
        bootstrap: BootstrapOptions {
            repository: credentials.repository.clone(),
            git_email: args.git_email.clone(),
            identity: identity.key_pair().clone(),
            settle_delay: SETTLE_DELAY,
            deadline: None,
        },
        deadline: args.run_timeout.map(|limit| Instant::now() + limit),
    };
    let reporter = TerminalReporter::new(&app.output);

    let outcome = orchestrate::run(&app.config, &drivers, app, &reporter, &opts).await?;
    let report = &outcome.report;
    if app.is_json() {
        println!("{}", json::format_report(report)?);
    } else {
        app.output.run_report(report);
    }

    if let Some(e) = outcome.error {
        return Err(match args.run_timeout {
            Some(limit) if e.chain().any(|c| c.is::<DeadlineExceeded>()) => {
                e.context(format!("run exceeded --run-timeout of {}", format_duration(limit)))
            }
            _ => e,
        });
    }
    if report.profile_failures.is_empty() {
        Ok(())
    } else {
        Err(ProfilesFailed(report.failed_profiles()).into())
    }
}
