//! Typed domain error enums.
//!
//! All error types implement `thiserror::Error` and convert to `anyhow::Error`
//! via the `?` operator.

use std::fmt;

use thiserror::Error;

use crate::domain::cluster::ClusterState;

/// Boxed collaborator failure carried as an error source.
pub type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

// ── Config errors ─────────────────────────────────────────────────────────────

/// Missing or malformed configuration. Always raised before anything is mutated.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required field '{0}' in cluster config")]
    MissingField(&'static str),

    #[error("Invalid value for {key}: {value}\n\nValid values: {valid}")]
    InvalidValue {
        key: String,
        value: String,
        valid: String,
    },

    #[error("Invalid duration '{0}': expected a value like 25m, 1h30m or 90s")]
    InvalidDuration(String),

    #[error("Expected {0} to be set")]
    MissingCredential(&'static str),

    #[error("Expected repository in the form of owner/repo (got: {0:?})")]
    MalformedRepository(String),
}

// ── Reconcile errors ──────────────────────────────────────────────────────────

/// Failures of the cluster reconciliation state machine.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(
        "cluster '{cluster}' still present after {attempts} delete attempts; giving up"
    )]
    ConvergenceTimeout { cluster: String, attempts: u32 },

    #[error("creating cluster '{cluster}' failed and it is now {observed}")]
    CreateFailed {
        cluster: String,
        observed: ClusterState,
        #[source]
        source: Cause,
    },
}

// ── Bootstrap errors ──────────────────────────────────────────────────────────

/// The individual steps of the GitOps bootstrap sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStep {
    StartAgent,
    GenerateKey,
    RegisterBootstrapKey,
    EnableRepository,
    ReadAgentKey,
    RegisterAgentKey,
    RevokeBootstrapKey,
}

impl BootstrapStep {
    #[must_use]
    pub fn describe(self) -> &'static str {
        match self {
            Self::StartAgent => "starting ssh-agent",
            Self::GenerateKey => "generating bootstrap key",
            Self::RegisterBootstrapKey => "registering bootstrap key",
            Self::EnableRepository => "enabling GitOps repository",
            Self::ReadAgentKey => "reading GitOps agent key",
            Self::RegisterAgentKey => "registering GitOps agent key",
            Self::RevokeBootstrapKey => "revoking bootstrap key",
        }
    }
}

impl fmt::Display for BootstrapStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Failures of the GitOps bootstrap sequence.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("GitOps bootstrap requires a present cluster (cluster is {0})")]
    ClusterNotPresent(ClusterState),

    #[error("GitOps bootstrap failed while {step}")]
    Step {
        step: BootstrapStep,
        #[source]
        source: Cause,
    },
}

impl BootstrapError {
    /// Wrap a collaborator failure with the step it happened in.
    #[must_use]
    pub fn at(step: BootstrapStep, source: anyhow::Error) -> Self {
        Self::Step {
            step,
            source: source.into(),
        }
    }

    /// The step that failed, if any.
    #[must_use]
    pub fn step(&self) -> Option<BootstrapStep> {
        match self {
            Self::Step { step, .. } => Some(*step),
            Self::ClusterNotPresent(_) => None,
        }
    }
}

// ── Registry errors ───────────────────────────────────────────────────────────

/// Failures talking to the deploy-key registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{operation} failed: could not reach the registry")]
    Transport {
        operation: &'static str,
        #[source]
        source: Cause,
    },

    #[error("{operation} failed with HTTP {status}: {message}")]
    Status {
        operation: &'static str,
        status: u16,
        message: String,
    },

    #[error("{operation} failed: unexpected response body")]
    Decode {
        operation: &'static str,
        #[source]
        source: Cause,
    },
}

// ── Deadline ──────────────────────────────────────────────────────────────────

/// The run's deadline passed before the interrupted operation finished.
///
/// Cleanup that was already owed (bootstrap key revocation, agent stop) still
/// runs after this is raised.
#[derive(Debug, Error)]
#[error("run deadline reached")]
pub struct DeadlineExceeded;

// ── Profile errors ────────────────────────────────────────────────────────────

/// Raised after a run in which one or more profiles could not be enabled.
#[derive(Debug, Error)]
#[error("{} profile(s) failed to enable: {}", .0.len(), .0.join(", "))]
pub struct ProfilesFailed(pub Vec<String>);
