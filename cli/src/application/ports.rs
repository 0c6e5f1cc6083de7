//! Port trait definitions for the Application layer.
//!
//! Ports are the interfaces (contracts) that infrastructure must fulfill.
//! This file imports only from `crate::domain`; never from `crate::infra`,
//! `crate::commands`, or `crate::output`.

use std::path::Path;
use std::process::Output;
use std::time::Duration;

use anyhow::Result;

use crate::domain::{ClusterState, DeployKey, DesiredSpec, KeyPairPath, ProfileRef, SshSession};

// ── Value Types ───────────────────────────────────────────────────────────────

/// Everything the GitOps tooling needs to address a cluster and its repository.
#[derive(Debug, Clone, Copy)]
pub struct GitOpsTarget<'a> {
    pub cluster_name: &'a str,
    pub region: &'a str,
    /// SSH URL of the GitOps repository, e.g. `git@github.com:owner/repo`.
    pub git_url: &'a str,
    pub git_email: &'a str,
    /// Private key the initial push authenticates with.
    pub private_key_path: &'a Path,
}

// ── Desired State Port ────────────────────────────────────────────────────────

/// Source of the declared cluster configuration.
pub trait DesiredConfig {
    /// Read and validate the desired state.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read or fails validation.
    fn load(&self) -> Result<DesiredSpec>;
}

// ── Cluster Port ──────────────────────────────────────────────────────────────

/// Cluster provisioning backend.
#[allow(async_fn_in_trait)]
pub trait ClusterDriver {
    /// Observe whether the named cluster exists.
    ///
    /// Never fails: a backend failure is reported as `ClusterState::Unknown`.
    async fn observe(&self, name: &str) -> ClusterState;
    /// Create a cluster from a template document, bounded by `timeout`.
    async fn create(&self, template_yaml: &str, timeout: Duration) -> Result<()>;
    /// Request deletion of the named cluster.
    async fn delete(&self, name: &str) -> Result<()>;
    /// Write local credentials for accessing the named cluster.
    async fn write_kubeconfig(&self, name: &str) -> Result<()>;
}

// ── SSH Port ──────────────────────────────────────────────────────────────────

/// Ephemeral key pair and agent session management.
#[allow(async_fn_in_trait)]
pub trait SshAgent {
    /// Start a new agent and capture its control environment.
    async fn start(&self) -> Result<SshSession>;
    /// Replace any key pair at `key` with a fresh one; returns the public key.
    async fn generate_key(&self, key: &KeyPairPath) -> Result<String>;
    /// Append host keys to `known_hosts`, skipping lines already present.
    async fn trust_hosts(&self, host_keys: &[&str]) -> Result<()>;
    /// Load the private key into the session.
    async fn add_key(&self, session: &SshSession, key: &KeyPairPath) -> Result<()>;
    /// Terminate the agent.
    async fn stop(&self, session: &SshSession) -> Result<()>;
}

// ── Key Registry Port ─────────────────────────────────────────────────────────

/// Authorized deploy keys on the source-control host.
#[allow(async_fn_in_trait)]
pub trait KeyRegistry {
    /// List all deploy keys of the repository.
    async fn list(&self) -> Result<Vec<DeployKey>>;
    /// Register a write-enabled deploy key.
    async fn create(&self, title: &str, key: &str) -> Result<DeployKey>;
    /// Remove a deploy key by its host-assigned id.
    async fn delete(&self, id: u64) -> Result<()>;
}

// ── GitOps Port ───────────────────────────────────────────────────────────────

/// GitOps agent installation and profile management.
#[allow(async_fn_in_trait)]
pub trait GitOpsDriver {
    /// Install the GitOps agent and point it at the repository.
    async fn enable_repository(&self, target: &GitOpsTarget<'_>, session: &SshSession)
    -> Result<()>;
    /// Add a workload profile to the repository.
    async fn enable_profile(
        &self,
        target: &GitOpsTarget<'_>,
        session: &SshSession,
        profile: &ProfileRef,
    ) -> Result<()>;
    /// The in-cluster agent's public deploy key.
    async fn own_deploy_key(&self) -> Result<String>;
}

// ── Command Runner Port ───────────────────────────────────────────────────────

/// Abstracts process execution so infrastructure can be swapped or mocked.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Run a program with the runner's default timeout and capture its output.
    async fn run(&self, program: &str, args: &[&str]) -> Result<Output>;
    /// Run a program with a custom timeout override.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned or exceeds `timeout`.
    /// On timeout, the child process must be killed (not left orphaned).
    async fn run_with_timeout(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<Output>;
    /// Run a program with stdin piped from `stdin`.
    async fn run_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        stdin: &[u8],
        timeout: Duration,
    ) -> Result<Output>;
    /// Run a program with extra environment bindings on top of the inherited ones.
    async fn run_with_env(
        &self,
        program: &str,
        args: &[&str],
        env: &[(String, String)],
    ) -> Result<Output>;
}

// ── Progress Reporting Port ───────────────────────────────────────────────────

/// Abstracts progress reporting so services can emit events without
/// depending on the Presentation layer. Sync trait; no async needed.
pub trait ProgressReporter {
    /// Emit an in-progress step message.
    fn step(&self, message: &str);
    /// Emit a success message.
    fn success(&self, message: &str);
    /// Emit a warning message.
    fn warn(&self, message: &str);
}

/// Asks the operator before destructive transitions.
pub trait Confirm {
    /// Return whether to proceed.
    ///
    /// # Errors
    ///
    /// Returns an error if the prompt cannot be shown.
    fn confirm(&self, prompt: &str, default: bool) -> Result<bool>;
}
