//! Desired cluster configuration: file schema, validation into `DesiredSpec`,
//! and Go-style duration handling.
//!
//! Pure functions only; no I/O, no async, no filesystem access.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::cluster::ClusterState;
use crate::domain::error::ConfigError;

// ── Constants ────────────────────────────────────────────────────────────────

/// Cluster creation timeout used when the config does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(25 * 60);

/// Default location of the desired-state file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "cluster.yaml";

// ── File schema ──────────────────────────────────────────────────────────────

/// Top-level layout of `cluster.yaml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClusterDocument {
    /// Creation timeout, e.g. `25m`.
    pub timeout: Option<String>,
    pub spec: ClusterDocumentSpec,
}

/// The `spec` block of `cluster.yaml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClusterDocumentSpec {
    /// `present` or `absent`.
    pub state: Option<String>,
    /// Profiles to enable on the GitOps repository, in order.
    pub profiles: Vec<String>,
    /// eksctl `ClusterConfig`, passed through untouched.
    pub template: Option<serde_yaml::Value>,
}

// ── Validated spec ───────────────────────────────────────────────────────────

/// Identifier of a workload profile (URL or slug). Enable-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileRef(String);

impl ProfileRef {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProfileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable snapshot of the desired state, parsed once per run.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredSpec {
    pub state: ClusterState,
    pub cluster_name: String,
    pub region: String,
    pub timeout: Duration,
    pub profiles: Vec<ProfileRef>,
    pub template: serde_yaml::Value,
}

impl DesiredSpec {
    /// Validate a parsed document.
    ///
    /// A missing `spec.state` yields `ClusterState::Unknown` (nothing will be
    /// changed); an unrecognised one is an error.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the template, cluster name or region is
    /// missing, or if the state or timeout cannot be parsed.
    pub fn from_document(doc: ClusterDocument) -> Result<Self, ConfigError> {
        let template = doc
            .spec
            .template
            .ok_or(ConfigError::MissingField("spec.template"))?;

        let cluster_name = metadata_field(&template, "name")
            .ok_or(ConfigError::MissingField("spec.template.metadata.name"))?;
        let region = metadata_field(&template, "region")
            .ok_or(ConfigError::MissingField("spec.template.metadata.region"))?;

        let state = match doc.spec.state.as_deref().map(str::trim) {
            None | Some("") => ClusterState::Unknown,
            Some(raw) => match raw.parse()? {
                ClusterState::Unknown => {
                    return Err(ConfigError::InvalidValue {
                        key: "spec.state".to_string(),
                        value: raw.to_string(),
                        valid: "present, absent".to_string(),
                    });
                }
                state => state,
            },
        };

        let timeout = match doc.timeout.as_deref().map(str::trim) {
            None | Some("") => DEFAULT_TIMEOUT,
            Some(raw) => parse_duration(raw)?,
        };

        Ok(Self {
            state,
            cluster_name,
            region,
            timeout,
            profiles: doc.spec.profiles.into_iter().map(ProfileRef::new).collect(),
            template,
        })
    }

    /// Parse and validate YAML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed or fails validation.
    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let doc: ClusterDocument = serde_yaml::from_str(content)?;
        Ok(Self::from_document(doc)?)
    }

    /// The cluster template rendered back to YAML for the provisioning CLI.
    ///
    /// # Errors
    ///
    /// Returns an error if the template cannot be serialized.
    pub fn template_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(&self.template)?)
    }
}

fn metadata_field(template: &serde_yaml::Value, key: &str) -> Option<String> {
    template
        .get("metadata")
        .and_then(|m| m.get(key))
        .and_then(serde_yaml::Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

// ── Durations ────────────────────────────────────────────────────────────────

/// Parse a Go-style duration made of `h`, `m` and `s` components
/// (`25m`, `1h30m`, `90s`). A bare `0` is accepted.
///
/// # Errors
///
/// Returns `ConfigError::InvalidDuration` for anything else.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration(input.to_string());
    let trimmed = input.trim();
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }
    if trimmed.is_empty() {
        return Err(invalid());
    }

    let mut total: u64 = 0;
    let mut digits = String::new();
    for c in trimmed.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let value: u64 = digits.parse().map_err(|_| invalid())?;
        digits.clear();
        let scale = match c {
            'h' => 3600,
            'm' => 60,
            's' => 1,
            _ => return Err(invalid()),
        };
        total = value
            .checked_mul(scale)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(invalid)?;
    }
    if !digits.is_empty() {
        return Err(invalid());
    }
    Ok(Duration::from_secs(total))
}

/// Render a duration in the largest whole unit that represents it exactly.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs != 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs != 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

// ── Unit tests ───────────────────────────────────────────────────────────────
