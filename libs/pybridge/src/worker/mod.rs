// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Worker process plumbing: lifecycle, envelope, payload regions.

pub mod channel;
mod daemon;
pub mod process_handle;
pub mod protocol;

pub use daemon::{DaemonBackend, DaemonLauncher};

use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;

use crate::bootstrap::ProvisionedRuntime;
use crate::config::BridgeConfig;
use crate::error::Result;

/// Forward each line a worker writes to stderr into the log under target
/// `pybridge::worker`.
pub fn forward_stderr<R: Read + Send + 'static>(stderr: R, name: String) -> Result<()> {
    std::thread::Builder::new()
        .name(format!("{}-stderr", name))
        .spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
                tracing::info!(target: "pybridge::worker", "[{}] {}", name, line);
            }
        })?;
    Ok(())
}

/// Pick the interpreter for worker processes.
///
/// An explicit `interpreter` wins, then the provisioned runtime's
/// executable, then whatever `python3` / `python` resolves to on `PATH`.
pub fn resolve_interpreter(config: &BridgeConfig, runtime: Option<&ProvisionedRuntime>) -> PathBuf {
    if let Some(interpreter) = &config.interpreter {
        return interpreter.clone();
    }
    if let Some(runtime) = runtime {
        if runtime.executable.is_file() {
            return runtime.executable.clone();
        }
        tracing::warn!(
            "Provisioned interpreter '{}' is missing, falling back to PATH",
            runtime.executable.display()
        );
    }
    let fallback = PathBuf::from(if cfg!(windows) { "python" } else { "python3" });
    tracing::warn!("No interpreter configured, using '{}' from PATH", fallback.display());
    fallback
}
