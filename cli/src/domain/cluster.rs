//! Cluster existence states and the observed/desired pair used in reports.
//!
//! Pure types only; no I/O.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::error::ConfigError;

/// Existence of a cluster, either as observed at the provider or as declared.
///
/// `Unknown` is produced by a failed observation or an undeclared desired
/// state. It is never interchangeable with `Absent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterState {
    Unknown,
    Present,
    Absent,
}

impl ClusterState {
    /// Lowercase label used in config files and reports.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Present => "present",
            Self::Absent => "absent",
        }
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClusterState {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "present" => Ok(Self::Present),
            "absent" => Ok(Self::Absent),
            "unknown" => Ok(Self::Unknown),
            other => Err(ConfigError::InvalidValue {
                key: "spec.state".to_string(),
                value: other.to_string(),
                valid: "present, absent".to_string(),
            }),
        }
    }
}

/// Observed and desired state captured at the same moment of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatePair {
    pub observed: ClusterState,
    pub desired: ClusterState,
}

impl StatePair {
    /// `true` when the observation matches a meaningful desired state.
    #[must_use]
    pub fn converged(&self) -> bool {
        self.desired != ClusterState::Unknown && self.observed == self.desired
    }
}

impl fmt::Display for StatePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cluster state: {:?} => desired state: {:?}",
            self.observed.as_str(),
            self.desired.as_str()
        )
    }
}
