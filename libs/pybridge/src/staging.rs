// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Work directory preparation: create it, stage the worker entry script and
//! mirror the plugin tree from the source script directory.

use std::path::Path;

use crate::error::{BridgeError, Result};
use crate::layout::{PLUGINS_DIR, WORKER_SCRIPT, WorkDirLayout};

/// What [`prepare_work_dir`] did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StagingReport {
    pub script_copied: bool,
    pub plugin_files: usize,
}

pub fn prepare_work_dir(layout: &WorkDirLayout, source_dir: Option<&Path>) -> Result<StagingReport> {
    let root = layout.root();
    std::fs::create_dir_all(root).map_err(|e| {
        BridgeError::ResourceSetup(format!(
            "Failed to create work directory '{}': {}",
            root.display(),
            e
        ))
    })?;

    let mut report = StagingReport::default();
    let Some(source_dir) = source_dir else {
        tracing::debug!("No source script directory configured, using work dir as-is");
        return Ok(report);
    };

    let script = source_dir.join(WORKER_SCRIPT);
    if script.is_file() {
        std::fs::copy(&script, layout.worker_script()).map_err(|e| {
            BridgeError::ResourceSetup(format!(
                "Failed to copy '{}' into '{}': {}",
                script.display(),
                root.display(),
                e
            ))
        })?;
        tracing::info!("Staged {} from '{}'", WORKER_SCRIPT, source_dir.display());
        report.script_copied = true;
    } else {
        tracing::warn!(
            "Worker script '{}' not found, keeping existing work dir copy",
            script.display()
        );
    }

    let plugins = source_dir.join(PLUGINS_DIR);
    if plugins.is_dir() {
        report.plugin_files = mirror_tree(&plugins, &layout.plugins_dir()).map_err(|e| {
            BridgeError::ResourceSetup(format!(
                "Failed to mirror plugins from '{}': {}",
                plugins.display(),
                e
            ))
        })?;
        tracing::info!("Mirrored {} plugin files", report.plugin_files);
    }

    Ok(report)
}

/// Recursively copy `from` into `to`, overwriting existing files. Returns
/// the number of files copied.
fn mirror_tree(from: &Path, to: &Path) -> std::io::Result<usize> {
    std::fs::create_dir_all(to)?;
    let mut copied = 0;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copied += mirror_tree(&entry.path(), &target)?;
        } else if file_type.is_file() {
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}
