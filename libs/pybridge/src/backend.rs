// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The seam between a session and whatever executes its tasks.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::BridgeConfig;
use crate::error::{DispatchError, Result};
use crate::layout::WorkDirLayout;

/// One task handed to a backend. Borrowed for the duration of the call.
#[derive(Debug, Clone, Copy)]
pub struct TaskRequest<'a> {
    pub task_type: &'a str,
    /// Opaque, used only to correlate logs across the boundary.
    pub correlation_id: &'a str,
    pub metadata: &'a str,
    pub input: &'a [u8],
}

/// Values bound to the worker once per session.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub session_key: String,
    pub model_path: String,
    pub confidence: f64,
    pub work_dir: PathBuf,
}

/// A task executor owned by exactly one session.
///
/// Calls are serialized by the session; implementations need not be `Sync`.
pub trait Backend: Send {
    /// Bind session parameters. Called once per successful initialize.
    fn handshake(&mut self, handshake: &Handshake) -> Result<()>;

    /// Run one task to completion and return its output bytes.
    fn execute(&mut self, request: &TaskRequest<'_>) -> std::result::Result<Vec<u8>, DispatchError>;

    /// Release the worker. Best effort; never fails.
    fn shutdown(&mut self, timeout: Duration);
}

/// Everything a launcher needs to build a backend for a session.
pub struct LaunchContext<'a> {
    pub config: &'a BridgeConfig,
    pub layout: &'a WorkDirLayout,
    pub interpreter: &'a Path,
}

pub trait BackendLauncher: Send + Sync {
    fn launch(&self, ctx: &LaunchContext<'_>) -> Result<Box<dyn Backend>>;
}
