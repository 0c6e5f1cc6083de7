//! Infrastructure implementation of the `CommandRunner` port.
//!
//! `TokioCommandRunner` is the production implementation that uses tokio
//! for async process execution with guaranteed timeout and kill on all platforms.

use std::process::{Output, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::application::ports::CommandRunner;

/// Default timeout for short tool invocations (`ssh-keygen`, `eksctl get`, ...).
pub const DEFAULT_CMD_TIMEOUT: Duration = Duration::from_secs(60);

/// Default timeout for GitOps commands, which push to the repository and wait
/// for in-cluster rollouts.
pub const DEFAULT_GITOPS_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Production `CommandRunner` using tokio for async process execution
/// with guaranteed timeout and kill on all platforms.
///
/// `tokio::time::timeout` around `.output().await` drops the future but may
/// leave the OS process running. This implementation uses `tokio::select!`
/// with an explicit `child.kill()` so the process is always terminated.
pub struct TokioCommandRunner {
    timeout: Duration,
}

impl TokioCommandRunner {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// One process invocation.
struct Invocation<'a> {
    program: &'a str,
    args: &'a [&'a str],
    env: &'a [(String, String)],
    stdin: Option<&'a [u8]>,
    timeout: Duration,
}

impl CommandRunner for TokioCommandRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<Output> {
        self.run_with_timeout(program, args, self.timeout).await
    }

    async fn run_with_timeout(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<Output> {
        execute(Invocation {
            program,
            args,
            env: &[],
            stdin: None,
            timeout,
        })
        .await
    }

    async fn run_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        stdin: &[u8],
        timeout: Duration,
    ) -> Result<Output> {
        execute(Invocation {
            program,
            args,
            env: &[],
            stdin: Some(stdin),
            timeout,
        })
        .await
    }

    async fn run_with_env(
        &self,
        program: &str,
        args: &[&str],
        env: &[(String, String)],
    ) -> Result<Output> {
        execute(Invocation {
            program,
            args,
            env,
            stdin: None,
            timeout: self.timeout,
        })
        .await
    }
}

async fn execute(inv: Invocation<'_>) -> Result<Output> {
    let program = inv.program;
    debug!(
        program,
        args = ?inv.args,
        env = ?inv.env.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
        timeout_secs = inv.timeout.as_secs(),
        "spawning command"
    );

    let mut command = tokio::process::Command::new(program);
    command
        .args(inv.args)
        .envs(inv.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(if inv.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let mut child = command
        .spawn()
        .with_context(|| format!("failed to spawn {program}"))?;

    let stdin_handle = child.stdin.take();
    let input = inv.stdin.map(<[u8]>::to_vec).unwrap_or_default();
    let stdin_task = tokio::spawn(async move {
        if let Some(mut stdin) = stdin_handle {
            let _ = stdin.write_all(&input).await;
        }
    });

    let mut stdout_handle = child.stdout.take();
    let mut stderr_handle = child.stderr.take();

    tokio::select! {
        result = async {
            let (status, stdout, stderr) = tokio::join!(
                child.wait(),
                async {
                    let mut buf = Vec::new();
                    if let Some(ref mut h) = stdout_handle {
                        let _ = h.read_to_end(&mut buf).await;
                    }
                    buf
                },
                async {
                    let mut buf = Vec::new();
                    if let Some(ref mut h) = stderr_handle {
                        let _ = h.read_to_end(&mut buf).await;
                    }
                    buf
                },
            );
            let _ = stdin_task.await;
            let output = Output {
                status: status.with_context(|| format!("waiting for {program}"))?,
                stdout,
                stderr,
            };
            debug!(program, status = ?output.status, "command finished");
            Ok(output)
        } => result,
        () = tokio::time::sleep(inv.timeout) => {
            let _ = child.kill().await;
            anyhow::bail!("{program} timed out after {}s", inv.timeout.as_secs())
        }
    }
}

/// Fail with the command's stderr unless it exited successfully; otherwise
/// return its stdout as text.
///
/// # Errors
///
/// Returns an error naming `what` if the exit status is non-zero.
pub fn checked_stdout(output: &Output, what: &str) -> Result<String> {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("{what} failed ({}): {}", output.status, stderr.trim());
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
