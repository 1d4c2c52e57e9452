// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Worker process lifecycle.

use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, ExitStatus};
use std::time::{Duration, Instant};

use crate::error::{BridgeError, Result};

/// Handle to a running worker process. Killed on drop if still alive.
pub struct ProcessHandle {
    child: Child,
    name: String,
}

impl ProcessHandle {
    pub fn spawn(mut command: Command, name: &str) -> Result<Self> {
        let child = command.spawn().map_err(|e| {
            BridgeError::ResourceSetup(format!("Failed to spawn worker '{}': {}", name, e))
        })?;

        tracing::info!("[{}] Spawned worker with PID {}", name, child.id());

        Ok(Self {
            child,
            name: name.to_string(),
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    pub fn kill(&mut self) {
        tracing::warn!("[{}] Force killing worker (PID {})", self.name, self.child.id());
        if let Err(e) = self.child.kill() {
            tracing::debug!("[{}] kill: {}", self.name, e);
        }
        let _ = self.child.wait();
    }

    /// Wait up to `timeout` for a voluntary exit, then force kill.
    pub fn shutdown(&mut self, timeout: Duration) -> Option<ExitStatus> {
        let start = Instant::now();
        while start.elapsed() < timeout {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    tracing::info!("[{}] Worker exited with status: {}", self.name, status);
                    return Some(status);
                }
                Ok(None) => std::thread::sleep(Duration::from_millis(10)),
                Err(e) => {
                    tracing::warn!("[{}] Failed to poll worker: {}", self.name, e);
                    break;
                }
            }
        }

        tracing::warn!(
            "[{}] Worker did not exit within {:?}, force killing",
            self.name,
            timeout
        );
        self.kill();
        None
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.is_running() {
            tracing::warn!("[{}] ProcessHandle dropped while worker still running", self.name);
            self.kill();
        }
    }
}
