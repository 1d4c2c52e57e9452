// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Work directory layout.
//!
//! ```text
//! <work_dir>/
//! ├── ai_worker.py          # Worker entry script (staged from the source dir)
//! ├── plugins/              # Mirrored plugin tree
//! ├── python_dist/          # Provisioned runtime
//! │   └── .installed        # Bootstrap marker
//! ├── channel/              # File-backed fast channel regions
//! ├── input_image.dat       # Legacy request frame
//! └── output_image.dat      # Legacy response frame
//! ```

use std::path::{Path, PathBuf};

pub const WORKER_SCRIPT: &str = "ai_worker.py";
pub const PLUGINS_DIR: &str = "plugins";
pub const CHANNEL_DIR: &str = "channel";
pub const LEGACY_INPUT: &str = "input_image.dat";
pub const LEGACY_OUTPUT: &str = "output_image.dat";
pub const INSTALL_MARKER: &str = ".installed";

#[derive(Debug, Clone)]
pub struct WorkDirLayout {
    root: PathBuf,
}

impl WorkDirLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn worker_script(&self) -> PathBuf {
        self.root.join(WORKER_SCRIPT)
    }

    pub fn plugins_dir(&self) -> PathBuf {
        self.root.join(PLUGINS_DIR)
    }

    pub fn channel_dir(&self) -> PathBuf {
        self.root.join(CHANNEL_DIR)
    }

    pub fn legacy_input(&self) -> PathBuf {
        self.root.join(LEGACY_INPUT)
    }

    pub fn legacy_output(&self) -> PathBuf {
        self.root.join(LEGACY_OUTPUT)
    }
}

/// Canonical form of a work directory, used as the session registry key.
/// Falls back to the absolute (non-resolved) path when it does not exist yet.
pub fn canonical_work_dir(path: &Path) -> PathBuf {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
