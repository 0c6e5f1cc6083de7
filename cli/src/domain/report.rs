//! Run summary types rendered at the end of `apply`.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::cluster::StatePair;
use crate::domain::config::ProfileRef;

/// A profile whose enablement failed; later profiles were still attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileFailure {
    pub profile: ProfileRef,
    pub message: String,
}

/// Before/after comparison of a full run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub initial: StatePair,
    #[serde(rename = "final")]
    pub final_state: StatePair,
    /// The operator declined a destructive transition; nothing was changed.
    pub cancelled: bool,
    /// Whether the GitOps bootstrap ran.
    pub bootstrapped: bool,
    pub profile_failures: Vec<ProfileFailure>,
}

impl RunReport {
    /// `true` if the run ended converged with every profile enabled.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        !self.cancelled && self.final_state.converged() && self.profile_failures.is_empty()
    }

    /// Names of the profiles that failed, in the order they were attempted.
    #[must_use]
    pub fn failed_profiles(&self) -> Vec<String> {
        self.profile_failures
            .iter()
            .map(|f| f.profile.to_string())
            .collect()
    }
}
