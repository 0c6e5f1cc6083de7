//! Infrastructure implementation of the `SshAgent` port.
//!
//! `OpenSshAgent` drives the OpenSSH tools (`ssh-agent`, `ssh-keygen`,
//! `ssh-add`) through a `CommandRunner`; `KnownHostsManager` maintains the
//! user's `known_hosts` file; `BootstrapIdentity` decides where the bootstrap
//! key pair lives.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;
use tracing::debug;

use crate::application::ports::{CommandRunner, SshAgent};
use crate::domain::{KeyPairPath, SshSession};
use crate::infra::command_runner::{DEFAULT_CMD_TIMEOUT, TokioCommandRunner, checked_stdout};

/// RSA key size of the ephemeral bootstrap key.
const KEY_BITS: &str = "4096";

/// Manages an OpenSSH `known_hosts` file.
pub struct KnownHostsManager {
    path: PathBuf,
}

impl KnownHostsManager {
    /// Creates a manager pointing at `~/.ssh/known_hosts`.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new() -> Result<Self> {
        let home =
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
        Ok(Self::with_path(home.join(".ssh").join("known_hosts")))
    }

    /// Creates a manager pointing at an arbitrary path (for testing).
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends each line not already present, creating the file and its
    /// parent directory as needed.
    ///
    /// Sets file permissions to 600 and parent directory to 700 on Unix.
    /// Returns the number of lines appended.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, written, or chmod-ed.
    pub fn append(&self, lines: &[&str]) -> Result<usize> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create dir {}", parent.display()))?;
            set_permissions(parent, 0o700)?;
        }

        let mut content = match std::fs::read_to_string(&self.path) {
            Ok(existing) => existing,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("read {}", self.path.display()));
            }
        };

        let mut added = 0;
        for line in lines.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
            if content.lines().any(|existing| existing.trim() == line) {
                continue;
            }
            if !content.is_empty() && !content.ends_with('\n') {
                content.push('\n');
            }
            content.push_str(line);
            content.push('\n');
            added += 1;
        }

        if added > 0 || !self.path.exists() {
            std::fs::write(&self.path, &content)
                .with_context(|| format!("write {}", self.path.display()))?;
        }
        set_permissions(&self.path, 0o600)?;
        Ok(added)
    }

    /// Returns `true` if the `known_hosts` file exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .with_context(|| format!("set permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
    }
}

/// Where one run writes its bootstrap key pair.
///
/// Without an explicit path the pair goes into a private temporary directory
/// that is deleted, keys included, when this value is dropped.
pub struct BootstrapIdentity {
    key_pair: KeyPairPath,
    _dir: Option<TempDir>,
}

impl BootstrapIdentity {
    /// Use `explicit` if given, otherwise a fresh temporary directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary directory cannot be created.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Ok(Self {
                key_pair: KeyPairPath::new(path),
                _dir: None,
            });
        }
        let dir = tempfile::Builder::new()
            .prefix("cluster-gitops-")
            .tempdir()
            .context("create temporary key directory")?;
        debug!(dir = %dir.path().display(), "bootstrap key directory created");
        Ok(Self {
            key_pair: KeyPairPath::new(dir.path().join("id_rsa")),
            _dir: Some(dir),
        })
    }

    #[must_use]
    pub fn key_pair(&self) -> &KeyPairPath {
        &self.key_pair
    }

    /// `true` if generating the key will replace an existing file.
    #[must_use]
    pub fn overwrites_existing(&self) -> bool {
        self.key_pair.private().exists() || self.key_pair.public().exists()
    }
}

/// `SshAgent` backed by the OpenSSH command-line tools.
pub struct OpenSshAgent<R: CommandRunner> {
    runner: R,
    known_hosts: KnownHostsManager,
}

impl<R: CommandRunner> OpenSshAgent<R> {
    pub fn new(runner: R, known_hosts: KnownHostsManager) -> Self {
        Self {
            runner,
            known_hosts,
        }
    }

    /// The underlying command runner.
    pub fn runner(&self) -> &R {
        &self.runner
    }
}

impl OpenSshAgent<TokioCommandRunner> {
    /// Convenience constructor for production use.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn default_runner() -> Result<Self> {
        Ok(Self::new(
            TokioCommandRunner::new(DEFAULT_CMD_TIMEOUT),
            KnownHostsManager::new()?,
        ))
    }
}

impl<R: CommandRunner> SshAgent for OpenSshAgent<R> {
    async fn start(&self) -> Result<SshSession> {
        let output = self
            .runner
            .run("ssh-agent", &["-s"])
            .await
            .context("ssh-agent -s")?;
        let stdout = checked_stdout(&output, "ssh-agent")?;
        let session = SshSession::from_agent_output(&stdout)?;
        debug!(pid = session.agent_pid, sock = %session.auth_sock, "ssh-agent started");
        Ok(session)
    }

    async fn generate_key(&self, key: &KeyPairPath) -> Result<String> {
        let private = key.private();
        let public = key.public();
        remove_if_exists(private)?;
        remove_if_exists(&public)?;
        if let Some(parent) = private.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create dir {}", parent.display()))?;
            set_permissions(parent, 0o700)?;
        }

        let path = private.to_string_lossy();
        let output = self
            .runner
            .run(
                "ssh-keygen",
                &["-q", "-t", "rsa", "-b", KEY_BITS, "-N", "", "-f", &path],
            )
            .await
            .context("ssh-keygen")?;
        checked_stdout(&output, "ssh-keygen")?;

        let public_key = std::fs::read_to_string(&public)
            .with_context(|| format!("read {}", public.display()))?;
        let public_key = public_key.trim().to_string();
        anyhow::ensure!(!public_key.is_empty(), "{} is empty", public.display());
        Ok(public_key)
    }

    async fn trust_hosts(&self, host_keys: &[&str]) -> Result<()> {
        let added = self.known_hosts.append(host_keys)?;
        debug!(added, path = %self.known_hosts.path().display(), "known_hosts updated");
        Ok(())
    }

    async fn add_key(&self, session: &SshSession, key: &KeyPairPath) -> Result<()> {
        let path = key.private().to_string_lossy();
        let output = self
            .runner
            .run_with_env("ssh-add", &[&path], &session.env())
            .await
            .context("ssh-add")?;
        checked_stdout(&output, "ssh-add")?;
        Ok(())
    }

    async fn stop(&self, session: &SshSession) -> Result<()> {
        let output = self
            .runner
            .run_with_env("ssh-agent", &["-k"], &session.env())
            .await
            .context("ssh-agent -k")?;
        checked_stdout(&output, "ssh-agent -k")?;
        Ok(())
    }
}
