//! Long-lived child processes
//!
//! Stop is always terminate, wait with timeout, then kill.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};

/// A child whose stdout is read line by line
pub struct ManagedChild {
    name: String,
    child: Child,
    stdout: Option<Lines<BufReader<ChildStdout>>>,
}

impl ManagedChild {
    /// Spawn `command` with piped stdout. Stderr is logged at debug level.
    pub fn spawn(name: &str, mut command: Command) -> std::io::Result<Self> {
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(stderr) = child.stderr.take() {
            let name = name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!("{} stderr: {}", name, line);
                }
            });
        }

        let stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
        tracing::debug!("Spawned {} (pid {:?})", name, child.id());
        Ok(Self {
            name: name.to_string(),
            child,
            stdout,
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Next stdout line; `None` once stdout is closed
    pub async fn next_line(&mut self) -> Option<String> {
        let lines = self.stdout.as_mut()?;
        match lines.next_line().await {
            Ok(Some(line)) => Some(line),
            Ok(None) => {
                self.stdout = None;
                None
            }
            Err(e) => {
                tracing::debug!("Reading {} stdout failed: {}", self.name, e);
                self.stdout = None;
                None
            }
        }
    }

    /// Wait for the child to exit
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// SIGTERM, wait up to `timeout`, then SIGKILL
    pub async fn stop(mut self, timeout: Duration) {
        if let Ok(Some(status)) = self.child.try_wait() {
            tracing::debug!("{} already exited with {}", self.name, status);
            return;
        }

        if let Some(pid) = self.child.id() {
            terminate(pid);
        }

        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => tracing::info!("{} stopped ({})", self.name, status),
            Ok(Err(e)) => tracing::warn!("Waiting for {} failed: {}", self.name, e),
            Err(_) => {
                tracing::warn!("{} ignored SIGTERM for {:?}, killing", self.name, timeout);
                if let Err(e) = self.child.kill().await {
                    tracing::warn!("Failed to kill {}: {}", self.name, e);
                }
            }
        }
    }
}

#[cfg(unix)]
fn terminate(pid: u32) {
    // SAFETY: plain kill(2) on a pid we spawned and have not yet reaped
    let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if result != 0 {
        tracing::debug!(
            "SIGTERM to pid {} failed: {}",
            pid,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn terminate(_pid: u32) {}
