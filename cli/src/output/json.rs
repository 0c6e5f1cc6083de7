//! JSON output helpers.
//!
//! Machine-readable renderings used by `--json`, including the error object
//! printed when a command fails.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::domain::{RunReport, StatePair};

/// Format a JSON error object.
///
/// Output (pretty-printed):
/// ```json
/// {
///   "error": true,
///   "message": "...",
///   "code": "..."
/// }
/// ```
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn format_error(message: &str, code: &str) -> Result<String> {
    let obj = serde_json::json!({
        "error": true,
        "message": message,
        "code": code,
    });
    serde_json::to_string_pretty(&obj).context("JSON serialization failed")
}

/// Pretty-printed `apply` result.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn format_report(report: &RunReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("JSON serialization failed")
}

#[derive(Serialize)]
struct StatusView<'a> {
    cluster: &'a str,
    #[serde(flatten)]
    pair: &'a StatePair,
    converged: bool,
}

/// Pretty-printed `status` result.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn format_status(cluster: &str, pair: &StatePair) -> Result<String> {
    serde_json::to_string_pretty(&StatusView {
        cluster,
        pair,
        converged: pair.converged(),
    })
    .context("JSON serialization failed")
}

/// Stable machine-readable code for an error chain.
#[must_use]
pub fn error_code(err: &anyhow::Error) -> &'static str {
    use crate::domain::{
        BootstrapError, ConfigError, DeadlineExceeded, ProfilesFailed, ReconcileError,
        RegistryError,
    };

    if err.chain().any(|c| c.is::<DeadlineExceeded>()) {
        return "DEADLINE_EXCEEDED";
    }
    for cause in err.chain() {
        if cause.is::<ConfigError>() {
            return "CONFIG_INVALID";
        }
        if let Some(e) = cause.downcast_ref::<ReconcileError>() {
            return match e {
                ReconcileError::ConvergenceTimeout { .. } => "CONVERGENCE_TIMEOUT",
                ReconcileError::CreateFailed { .. } => "CREATE_FAILED",
            };
        }
        if cause.is::<BootstrapError>() {
            return "BOOTSTRAP_FAILED";
        }
        if cause.is::<RegistryError>() {
            return "REGISTRY_ERROR";
        }
        if cause.is::<ProfilesFailed>() {
            return "PROFILES_FAILED";
        }
    }
    "ERROR"
}
