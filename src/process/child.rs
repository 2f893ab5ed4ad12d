//! Spawned tool processes
//!
//! [`ManagedChild`] wraps a tokio child with the two guarantees the relay
//! depends on: its stderr is drained continuously on a separate task (a
//! full pipe would stall the tool), and it is always reaped, escalating to a
//! forced kill when a grace period runs out.
//!
//! Tools echo their arguments back in diagnostics (ffmpeg prints the output
//! URL on connection errors), so a process can be given a secret that is
//! masked in every stderr line before it is logged.

use std::fmt;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

/// How long a reaped process's stderr reader may keep running
const STDERR_FLUSH: Duration = Duration::from_millis(500);

/// Replacement for a masked secret in logged tool output
pub const REDACTED: &str = "[REDACTED]";

/// What a spawned process is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    /// Short-lived, one per item: media URI in, raw stream on stdout
    Decode,
    /// Long-lived, one per session: raw stream on stdin, RTMP out
    Publish,
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessRole::Decode => f.write_str("decode"),
            ProcessRole::Publish => f.write_str("publish"),
        }
    }
}

/// A running tool process owned by one relay worker
#[derive(Debug)]
pub struct ManagedChild {
    role: ProcessRole,
    program: String,
    child: Child,
    stderr_task: Option<JoinHandle<()>>,
}

impl ManagedChild {
    /// Spawn `command` in `role`
    ///
    /// Decode processes get a piped stdout, publish processes a piped stdin;
    /// stderr is always piped and drained into the log.
    pub fn spawn(role: ProcessRole, command: Command) -> io::Result<Self> {
        Self::spawn_redacted(role, command, None)
    }

    /// Spawn `command` in `role`, masking `secret` in its logged stderr
    pub fn spawn_redacted(
        role: ProcessRole,
        mut command: Command,
        secret: Option<String>,
    ) -> io::Result<Self> {
        let program = command
            .as_std()
            .get_program()
            .to_string_lossy()
            .into_owned();

        match role {
            ProcessRole::Decode => {
                command.stdin(Stdio::null()).stdout(Stdio::piped());
            }
            ProcessRole::Publish => {
                command.stdin(Stdio::piped()).stdout(Stdio::null());
            }
        }
        command.stderr(Stdio::piped()).kill_on_drop(true);

        let mut child = command.spawn()?;
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(drain_stderr(role, child.id(), stderr, secret)));

        tracing::debug!(role = %role, program = %program, pid = ?child.id(), "Process spawned");

        Ok(Self {
            role,
            program,
            child,
            stderr_task,
        })
    }

    /// Program name the process was started from
    pub fn program(&self) -> &str {
        &self.program
    }

    /// OS process id, if the process has not been reaped yet
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Take the input pipe (publish processes)
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// Take the output pipe (decode processes)
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Wait for the process to exit on its own
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Reap the process, killing it if it outlives `grace`
    ///
    /// The caller performs the graceful step first (closing stdin, dropping
    /// stdout). The process is always waited on, so it never lingers as a
    /// zombie.
    pub async fn reap(&mut self, grace: Duration) -> io::Result<ExitStatus> {
        // Anything still held here is released: that is the graceful step.
        drop(self.child.stdin.take());
        drop(self.child.stdout.take());

        let status = match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(
                    role = %self.role,
                    pid = ?self.child.id(),
                    grace_ms = grace.as_millis() as u64,
                    "Process did not exit within grace period, killing"
                );
                self.child.start_kill()?;
                self.child.wait().await?
            }
        };

        if let Some(mut task) = self.stderr_task.take() {
            // Let the last diagnostics through, but a grandchild may still
            // hold stderr open.
            if tokio::time::timeout(STDERR_FLUSH, &mut task).await.is_err() {
                task.abort();
            }
        }

        tracing::debug!(role = %self.role, status = %status, "Process reaped");
        Ok(status)
    }
}

/// Mask every occurrence of `secret` in `line`
fn redact(line: String, secret: Option<&str>) -> String {
    match secret {
        Some(secret) if !secret.is_empty() && line.contains(secret) => {
            line.replace(secret, REDACTED)
        }
        _ => line,
    }
}

async fn drain_stderr(
    role: ProcessRole,
    pid: Option<u32>,
    stderr: ChildStderr,
    secret: Option<String>,
) {
    let mut lines = BufReader::new(stderr).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => {
                let line = redact(line, secret.as_deref());
                match role {
                    ProcessRole::Publish => {
                        tracing::info!(target: "vod_relay::tool", role = %role, pid = ?pid, "{}", line);
                    }
                    ProcessRole::Decode => {
                        tracing::debug!(target: "vod_relay::tool", role = %role, pid = ?pid, "{}", line);
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(role = %role, pid = ?pid, error = %e, "stderr drain stopped");
                break;
            }
        }
    }
}
