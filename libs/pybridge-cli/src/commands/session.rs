// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Session startup and status commands.

use std::sync::Arc;

use anyhow::{Context, Result};
use pybridge::{BridgeClient, BridgeConfig, BridgeSession};

pub async fn init(config: BridgeConfig, session_key: Option<String>) -> Result<()> {
    let session = Arc::new(BridgeSession::new(config));
    Arc::clone(&session)
        .initialize_async(session_key)
        .await
        .context("Failed to initialize bridge session")?;

    println!("Session ready");
    println!("  Work dir:    {}", session.work_dir().display());
    if let Some(key) = session.session_key() {
        println!("  Session key: {}", key);
    }
    match session.runtime() {
        Some(runtime) => {
            println!("  Runtime:     {}", runtime.runtime_root.display());
            println!("  Python:      {}", runtime.executable.display());
            println!("  Provision:   {:?}", runtime.outcome);
        }
        None => println!("  Runtime:     external interpreter"),
    }

    session.shutdown();
    Ok(())
}

pub fn status(client: &BridgeClient) -> Result<()> {
    let report = serde_json::to_string_pretty(&client.status().to_json())?;
    println!("{}", report);
    Ok(())
}
