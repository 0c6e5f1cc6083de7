//! SSH agent session and key-pair locations used by the GitOps bootstrap.

use std::path::{Path, PathBuf};

use anyhow::Result;

/// A running `ssh-agent` and the bindings child processes need to use it.
///
/// The session is passed explicitly to every call that needs the agent; it is
/// never exported into this process's environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshSession {
    pub auth_sock: String,
    pub agent_pid: u32,
}

impl SshSession {
    /// Environment bindings for child processes.
    #[must_use]
    pub fn env(&self) -> Vec<(String, String)> {
        vec![
            ("SSH_AUTH_SOCK".to_string(), self.auth_sock.clone()),
            ("SSH_AGENT_PID".to_string(), self.agent_pid.to_string()),
        ]
    }

    /// Parse the Bourne-shell output of `ssh-agent -s`:
    ///
    /// ```text
    /// SSH_AUTH_SOCK=/tmp/ssh-XXXX/agent.123; export SSH_AUTH_SOCK;
    /// SSH_AGENT_PID=124; export SSH_AGENT_PID;
    /// echo Agent pid 124;
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if either binding is missing or the PID is not numeric.
    pub fn from_agent_output(output: &str) -> Result<Self> {
        let mut auth_sock = None;
        let mut agent_pid = None;
        for statement in output.split([';', '\n']) {
            let Some((key, value)) = statement.trim().split_once('=') else {
                continue;
            };
            match key {
                "SSH_AUTH_SOCK" => auth_sock = Some(value.trim().to_string()),
                "SSH_AGENT_PID" => agent_pid = Some(value.trim().to_string()),
                _ => {}
            }
        }
        let auth_sock = auth_sock
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow::anyhow!("ssh-agent did not report SSH_AUTH_SOCK"))?;
        let agent_pid = agent_pid
            .ok_or_else(|| anyhow::anyhow!("ssh-agent did not report SSH_AGENT_PID"))?
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid SSH_AGENT_PID: {e}"))?;
        Ok(Self {
            auth_sock,
            agent_pid,
        })
    }
}

/// Location of a private key and its `.pub` companion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPairPath {
    private: PathBuf,
}

impl KeyPairPath {
    #[must_use]
    pub fn new(private: impl Into<PathBuf>) -> Self {
        Self {
            private: private.into(),
        }
    }

    #[must_use]
    pub fn private(&self) -> &Path {
        &self.private
    }

    #[must_use]
    pub fn public(&self) -> PathBuf {
        let mut name = self.private.as_os_str().to_owned();
        name.push(".pub");
        PathBuf::from(name)
    }
}
