// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Offline dependency installation into a freshly extracted runtime.

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::{BridgeError, Result};

/// Inputs for one installer run.
#[derive(Debug, Clone, Copy)]
pub struct InstallRequest<'a> {
    pub executable: &'a Path,
    pub manifest: &'a Path,
    /// Local wheel cache passed as `--find-links`.
    pub wheel_dir: &'a Path,
}

/// Installs the packages listed in a dependency manifest.
///
/// Implementations block until installation finishes. A failure aborts the
/// bootstrap and is not retried.
pub trait PackageInstaller: Send + Sync {
    fn install(&self, request: &InstallRequest<'_>) -> Result<()>;
}

/// `<python> -m pip install --no-index --find-links <wheels> -r <manifest>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PipInstaller;

impl PackageInstaller for PipInstaller {
    fn install(&self, request: &InstallRequest<'_>) -> Result<()> {
        tracing::info!(
            "Bootstrap: installing dependencies from '{}' (offline, wheels at '{}')",
            request.manifest.display(),
            request.wheel_dir.display()
        );

        let mut child = Command::new(request.executable)
            .args(["-m", "pip", "install", "--no-index", "--find-links"])
            .arg(request.wheel_dir)
            .arg("-r")
            .arg(request.manifest)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                BridgeError::Installer(format!(
                    "Failed to spawn '{}': {}",
                    request.executable.display(),
                    e
                ))
            })?;

        let stderr_thread = child.stderr.take().map(|stderr| {
            std::thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
                    tracing::warn!(target: "pybridge::installer", "{}", line);
                }
            })
        });

        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines().map_while(|l| l.ok()) {
                tracing::info!(target: "pybridge::installer", "{}", line);
            }
        }

        let status = child
            .wait()
            .map_err(|e| BridgeError::Installer(format!("Failed to wait for pip: {}", e)))?;
        if let Some(handle) = stderr_thread {
            let _ = handle.join();
        }

        if !status.success() {
            return Err(BridgeError::Installer(format!(
                "pip exited with {}",
                status
            )));
        }
        tracing::info!("Bootstrap: dependency installation complete");
        Ok(())
    }
}
