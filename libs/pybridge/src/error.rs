// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Resource setup failed: {0}")]
    ResourceSetup(String),

    #[error("Runtime bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("Archive entry rejected: {0}")]
    Archive(String),

    #[error("Package installer failed: {0}")]
    Installer(String),

    #[error("Worker handshake failed: {0}")]
    Handshake(String),

    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Session not ready: {0}")]
    NotReady(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Failure of a single dispatch. Local to one request; never changes
/// session state.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("worker is not running: {0}")]
    WorkerGone(String),

    #[error("no reply from worker within {0:?}")]
    Timeout(Duration),

    #[error("worker reported error: {0}")]
    Worker(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("payload region unavailable: {0}")]
    Region(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
