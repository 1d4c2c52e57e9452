// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Standalone runtime provisioning (no worker is started).

use std::path::Path;

use anyhow::{Context, Result};
use pybridge::Bootstrapper;

pub fn run(target: &Path, archive: &Path) -> Result<()> {
    let runtime = Bootstrapper::new(archive, target)
        .ensure_provisioned()
        .with_context(|| format!("Failed to provision {}", target.display()))?;

    println!("Runtime provisioned ({:?})", runtime.outcome);
    println!("  Root:   {}", runtime.runtime_root.display());
    println!("  Python: {}", runtime.executable.display());
    Ok(())
}
