// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod exec;
pub mod provision;
pub mod session;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use pybridge::{BridgeClient, BridgeConfig, BridgeSession};

/// Config file (if given), then `PYBRIDGE_*` env, then `--work-dir`.
pub fn load_config(path: Option<&Path>, work_dir: Option<PathBuf>) -> Result<BridgeConfig> {
    let mut config = BridgeConfig::resolve(path).context("Failed to load bridge config")?;
    if let Some(work_dir) = work_dir {
        config.work_dir = work_dir;
    }
    config.validate()?;
    Ok(config)
}

/// Initialize a session off the executor and wrap it in a client.
pub async fn connect(config: BridgeConfig) -> Result<BridgeClient> {
    let session = Arc::new(BridgeSession::new(config));
    Arc::clone(&session)
        .initialize_async(None)
        .await
        .context("Failed to initialize bridge session")?;
    Ok(BridgeClient::new(session))
}

/// Client whose session is never initialized. The legacy file transport
/// prepares the work dir on its own and does not need the worker.
pub fn detached(config: BridgeConfig) -> BridgeClient {
    BridgeClient::new(Arc::new(BridgeSession::new(config)))
}
