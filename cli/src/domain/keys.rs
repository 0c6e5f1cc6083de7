//! Deploy keys, repository identifiers and registry credentials.
//!
//! Pure functions only; no I/O.

use std::fmt;
use std::sync::LazyLock;

use rand::Rng;
use rand::distributions::Alphanumeric;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::error::ConfigError;

// ── Constants ────────────────────────────────────────────────────────────────

/// Title of the GitOps agent's long-lived deploy key.
pub const AGENT_KEY_TITLE: &str = "flux";

/// Prefix of the per-run bootstrap key title.
pub const BOOTSTRAP_KEY_PREFIX: &str = "push-key-";

/// Length of the random suffix appended to [`BOOTSTRAP_KEY_PREFIX`].
pub const BOOTSTRAP_SUFFIX_LEN: usize = 10;

/// Commit author used by the GitOps agent.
pub const DEFAULT_GIT_EMAIL: &str = "flux@noreply.gitops";

/// Host that serves the GitOps repository.
pub const GIT_HOST: &str = "github.com";

/// Published `github.com` host keys, appended to `known_hosts` so that the
/// first push never stops at an interactive trust prompt.
pub const GITHUB_KNOWN_HOSTS: &[&str] = &[
    "github.com ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl",
    "github.com ecdsa-sha2-nistp256 AAAAE2VjZHNhLXNoYTItbmlzdHAyNTYAAAAIbmlzdHAyNTYAAABBBEmKSENjQEezOmxkZMy7opKgwFB9nkt5YRrYMjNuG5N87uRgg6CLrbo5wAdT/y6v0mKV0U2w0WZ2YB/++Tpockg=",
    "github.com ssh-rsa AAAAB3NzaC1yc2EAAAADAQABAAABgQCj7ndNxQowgcQnjshcLrqPEiiphnt+VTTvDP6mHBL9j1aNUkY4Ue1gvwnGLVlOhGeYrnZaMgRK6+PKCUXaDbC7qtbW8gIkhL7aGCsOr/C56SJMy/BCZfxd1nWzAOxSDPgVsmerOBYfNqltV9/hWCqBywINIR+5dIg6JTJ72pcEpEjcYgXkE2YEFXV1JHnsKgbLWNlhScqb2UmyRkQyytRLtL+38TGxkxCflmO+5Z8CSSNY7GidjMIZ7Q4zMjA2n1nGrlTDkzwDCsw+wqFPGQA179cnfGWOWRVruj16z6XyvxvjJwbz0wQZ75XK5tKSb7FNyeIEs4TT4jk+S4dhPeAUC5y+bDYirYgM4GC7uEnztnZyaVWQ7B381AK4Qdrwt51ZqExKbQpTUNn+EjqoTwvqNj4kqx5QUCI0ThS/YkOxJCXmPUWZbhjpCg56i+2aB6CmK2JGhn57K5mj0MNdBXA4/WnwH6XoPWJzK5Nyu2zB3nAZp+S5hpQs+p1vN1/wsjk=",
];

static REPO_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)] // literal pattern
    Regex::new(r"^[A-Za-z0-9_.-]+$").expect("valid regex")
});

// ── Deploy keys ──────────────────────────────────────────────────────────────

/// A public key registered with the source-control host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployKey {
    /// Host-assigned identifier.
    pub id: u64,
    pub title: String,
    /// Public key material, e.g. `ssh-rsa AAAA...`.
    pub key: String,
}

/// Generate a fresh bootstrap key title, `push-key-` plus 10 alphanumerics.
pub fn bootstrap_key_title(rng: &mut impl Rng) -> String {
    let suffix: String = rng
        .sample_iter(&Alphanumeric)
        .take(BOOTSTRAP_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("{BOOTSTRAP_KEY_PREFIX}{suffix}")
}

/// `true` if `title` has the shape produced by [`bootstrap_key_title`].
#[must_use]
pub fn is_bootstrap_title(title: &str) -> bool {
    title.strip_prefix(BOOTSTRAP_KEY_PREFIX).is_some_and(|suffix| {
        suffix.len() == BOOTSTRAP_SUFFIX_LEN && suffix.chars().all(|c| c.is_ascii_alphanumeric())
    })
}

// ── Repository ───────────────────────────────────────────────────────────────

/// An `owner/repo` identifier on the source-control host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitRepository {
    pub owner: String,
    pub name: String,
}

impl GitRepository {
    /// Parse `owner/repo`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MalformedRepository` unless the input is exactly
    /// two non-empty segments of `[A-Za-z0-9_.-]`.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let malformed = || ConfigError::MalformedRepository(input.to_string());
        let (owner, name) = input.trim().split_once('/').ok_or_else(malformed)?;
        if !REPO_SEGMENT.is_match(owner) || !REPO_SEGMENT.is_match(name) {
            return Err(malformed());
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    /// SSH URL the GitOps agent pushes to and pulls from.
    #[must_use]
    pub fn git_url(&self) -> String {
        format!("git@{GIT_HOST}:{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for GitRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

// ── Credentials ──────────────────────────────────────────────────────────────

/// Everything needed to talk to the key registry. Built before any mutation.
#[derive(Clone)]
pub struct RegistryCredentials {
    pub token: String,
    pub repository: GitRepository,
}

impl RegistryCredentials {
    /// Validate raw token and repository values (typically from `GH_TOKEN`
    /// and `GITHUB_REPOSITORY`).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if either value is missing/empty or the
    /// repository is not `owner/repo`.
    pub fn resolve(token: Option<&str>, repository: Option<&str>) -> Result<Self, ConfigError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::MissingCredential("GH_TOKEN"))?;
        let repository = repository
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or(ConfigError::MissingCredential("GITHUB_REPOSITORY"))?;
        Ok(Self {
            token: token.to_string(),
            repository: GitRepository::parse(repository)?,
        })
    }
}

impl fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("token", &"<redacted>")
            .field("repository", &self.repository)
            .finish()
    }
}

// ── Unit tests ───────────────────────────────────────────────────────────────
