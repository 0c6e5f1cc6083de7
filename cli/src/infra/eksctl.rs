//! Infrastructure implementation of the `ClusterDriver` port.
//!
//! `EksctlCluster<R>` routes all `eksctl` calls through a `CommandRunner`.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::application::ports::{ClusterDriver, CommandRunner};
use crate::domain::ClusterState;
use crate::domain::config::format_duration;
use crate::infra::command_runner::{DEFAULT_CMD_TIMEOUT, TokioCommandRunner, checked_stdout};

/// Oldest `eksctl` that ships `enable repo` / `enable profile`.
pub const EKSCTL_MIN_VERSION: semver::Version = semver::Version::new(0, 17, 0);

/// Extra time the process gets beyond `eksctl --timeout`, so that eksctl
/// gives up (and cleans up) on its own before it is killed.
pub const CREATE_GRACE: Duration = Duration::from_secs(5 * 60);

/// Upper bound of a single `eksctl delete cluster` request.
pub const DELETE_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Infrastructure adapter that drives `eksctl`.
///
/// Generic over `R: CommandRunner` so that tests can inject a mock runner
/// without spawning real processes.
pub struct EksctlCluster<R: CommandRunner> {
    runner: R,
}

impl<R: CommandRunner> EksctlCluster<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    /// The underlying command runner.
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Installed `eksctl` version.
    ///
    /// # Errors
    ///
    /// Returns an error if `eksctl` cannot be run or prints no parseable version.
    pub async fn version(&self) -> Result<semver::Version> {
        let output = self
            .runner
            .run("eksctl", &["version"])
            .await
            .context("eksctl version")?;
        let stdout = checked_stdout(&output, "eksctl version")?;
        parse_version(&stdout)
            .with_context(|| format!("unrecognised eksctl version output: {}", stdout.trim()))
    }

    /// Fail early when `eksctl` is missing or too old.
    ///
    /// # Errors
    ///
    /// Returns an error if `eksctl` is unavailable or older than
    /// [`EKSCTL_MIN_VERSION`].
    pub async fn check_prerequisites(&self) -> Result<()> {
        let version = self.version().await.map_err(|e| {
            anyhow::anyhow!("eksctl is not available: {e:#}\n\nInstall it from https://eksctl.io")
        })?;
        anyhow::ensure!(
            version >= EKSCTL_MIN_VERSION,
            "eksctl {version} is too old; {EKSCTL_MIN_VERSION} or later is required"
        );
        Ok(())
    }
}

impl EksctlCluster<TokioCommandRunner> {
    /// Convenience constructor for production use.
    #[must_use]
    pub fn default_runner() -> Self {
        Self::new(TokioCommandRunner::new(DEFAULT_CMD_TIMEOUT))
    }
}

impl<R: CommandRunner> ClusterDriver for EksctlCluster<R> {
    async fn observe(&self, name: &str) -> ClusterState {
        let output = match self
            .runner
            .run("eksctl", &["get", "cluster", "-o", "json"])
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!(cluster = name, error = %format!("{e:#}"), "eksctl get cluster failed");
                return ClusterState::Unknown;
            }
        };
        let stdout = match checked_stdout(&output, "eksctl get cluster") {
            Ok(stdout) => stdout,
            Err(e) => {
                warn!(cluster = name, error = %format!("{e:#}"), "eksctl get cluster failed");
                return ClusterState::Unknown;
            }
        };
        match cluster_listed(&stdout, name) {
            Ok(true) => ClusterState::Present,
            Ok(false) => ClusterState::Absent,
            Err(e) => {
                warn!(cluster = name, error = %format!("{e:#}"), "unreadable cluster list");
                ClusterState::Unknown
            }
        }
    }

    async fn create(&self, template_yaml: &str, timeout: Duration) -> Result<()> {
        let eksctl_timeout = format_duration(timeout);
        let output = self
            .runner
            .run_with_stdin(
                "eksctl",
                &["create", "--timeout", &eksctl_timeout, "cluster", "-f", "-"],
                template_yaml.as_bytes(),
                timeout + CREATE_GRACE,
            )
            .await
            .context("eksctl create cluster")?;
        let stdout = checked_stdout(&output, "eksctl create cluster")?;
        debug!(output = %stdout.trim(), "eksctl create cluster finished");
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let output = self
            .runner
            .run_with_timeout("eksctl", &["delete", "cluster", name], DELETE_TIMEOUT)
            .await
            .context("eksctl delete cluster")?;
        checked_stdout(&output, "eksctl delete cluster")?;
        Ok(())
    }

    async fn write_kubeconfig(&self, name: &str) -> Result<()> {
        let output = self
            .runner
            .run("eksctl", &["utils", "write-kubeconfig", "--cluster", name])
            .await
            .context("eksctl utils write-kubeconfig")?;
        checked_stdout(&output, "eksctl utils write-kubeconfig")?;
        Ok(())
    }
}

/// Whether `name` appears in the JSON output of `eksctl get cluster -o json`.
///
/// Older releases list `{"name": ..}` / `{"Name": ..}` objects, newer ones
/// nest the name under `metadata`. Empty output means no clusters.
fn cluster_listed(json: &str, name: &str) -> Result<bool> {
    if json.trim().is_empty() {
        return Ok(false);
    }
    let value: serde_json::Value = serde_json::from_str(json).context("parsing cluster list")?;
    let entries = match &value {
        serde_json::Value::Array(items) => items.as_slice(),
        serde_json::Value::Null => return Ok(false),
        single => std::slice::from_ref(single),
    };
    Ok(entries.iter().any(|entry| {
        ["/name", "/Name", "/metadata/name", "/Metadata/Name"]
            .iter()
            .filter_map(|ptr| entry.pointer(ptr).and_then(serde_json::Value::as_str))
            .any(|listed| listed == name)
    }))
}

/// First semantic version found in `eksctl version` output
/// (`0.150.0`, `0.25.0-rc.1`, or a JSON blob with a `Version` key).
fn parse_version(output: &str) -> Result<semver::Version> {
    let token = output
        .split(|c: char| c.is_whitespace() || c == '"' || c == ',')
        .map(|t| t.trim_start_matches('v'))
        .find(|t| t.starts_with(|c: char| c.is_ascii_digit()) && t.contains('.'))
        .ok_or_else(|| anyhow::anyhow!("no version number"))?;
    Ok(semver::Version::parse(token)?)
}
