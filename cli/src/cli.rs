//! CLI argument parsing with clap derive

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::app::{AppContext, AppFlags, BehaviourFlags, OutputFlags};
use crate::commands;
use crate::domain::config::DEFAULT_CONFIG_FILE;

/// Reconcile an EKS cluster toward its declared state and bootstrap Flux on it
#[derive(Parser)]
#[command(
    name = "cluster-gitops",
    version,
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Desired-state file
    #[arg(
        long,
        global = true,
        env = "CLUSTER_GITOPS_CONFIG",
        default_value = DEFAULT_CONFIG_FILE
    )]
    pub config: PathBuf,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Log every external command (sets the log filter to `debug`)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Skip confirmation prompts (implied when `CI` is set)
    #[arg(short, long, global = true)]
    pub yes: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Reconcile the cluster and bootstrap GitOps on it
    Apply(commands::apply::ApplyArgs),

    /// Show observed and desired cluster state without changing anything
    Status,

    /// Show version
    Version,
}

impl Cli {
    /// Log filter used when `RUST_LOG` is not set.
    #[must_use]
    pub fn default_log_filter(&self) -> &'static str {
        if self.verbose { "debug" } else { "warn" }
    }

    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn run(self) -> Result<()> {
        let Cli {
            config,
            json,
            quiet,
            no_color,
            verbose: _,
            yes,
            command,
        } = self;

        if matches!(command, Command::Version) {
            commands::version::run(json);
            return Ok(());
        }

        let app = AppContext::new(&AppFlags {
            config,
            output: OutputFlags {
                no_color,
                quiet,
                json,
            },
            behaviour: BehaviourFlags { yes },
        });
        match command {
            Command::Apply(args) => commands::apply::run(&app, &args).await,
            Command::Status => commands::status::run(&app).await,
            Command::Version => Ok(()),
        }
    }
}
