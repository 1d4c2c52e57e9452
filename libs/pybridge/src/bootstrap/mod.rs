// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Embedded runtime provisioning.
//!
//! [`Bootstrapper::ensure_provisioned`] brings `<work_dir>/python_dist` to a
//! runnable state once and records that fact in a marker file. It performs
//! no locking of its own; the owning session serializes callers.

mod archive;
mod installer;

pub use archive::{extract_archive, file_digest, resolve_entry_path};
pub use installer::{InstallRequest, PackageInstaller, PipInstaller};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::layout::INSTALL_MARKER;

/// How a call to [`Bootstrapper::ensure_provisioned`] was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// Marker already present.
    AlreadyInstalled,
    /// Marker missing but the runtime was intact; marker re-created.
    Recovered,
    /// Full extract (and install, when a manifest exists).
    Installed,
}

/// Whether a dependency manifest accompanied the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestState {
    Present(PathBuf),
    Absent,
}

#[derive(Debug, Clone)]
pub struct ProvisionedRuntime {
    pub runtime_root: PathBuf,
    pub executable: PathBuf,
    pub outcome: ProvisionOutcome,
}

pub struct Bootstrapper {
    archive: PathBuf,
    runtime_root: PathBuf,
    executable: PathBuf,
    known_components: Vec<PathBuf>,
    installer: Arc<dyn PackageInstaller>,
}

impl Bootstrapper {
    pub fn new(archive: impl Into<PathBuf>, runtime_root: impl Into<PathBuf>) -> Self {
        let defaults = crate::config::RuntimeConfig::default();
        let runtime_root = runtime_root.into();
        Self {
            archive: archive.into(),
            executable: runtime_root.join(&defaults.executable),
            runtime_root,
            known_components: defaults.known_components,
            installer: Arc::new(PipInstaller),
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        let runtime_root = config.runtime_root();
        Self {
            archive: config.runtime_archive(),
            executable: runtime_root.join(&config.runtime.executable),
            runtime_root,
            known_components: config.runtime.known_components.clone(),
            installer: Arc::new(PipInstaller),
        }
    }

    /// Interpreter path relative to the runtime root.
    pub fn with_executable(mut self, relative: impl AsRef<Path>) -> Self {
        self.executable = self.runtime_root.join(relative);
        self
    }

    pub fn with_known_components(mut self, components: Vec<PathBuf>) -> Self {
        self.known_components = components;
        self
    }

    pub fn with_installer(mut self, installer: Arc<dyn PackageInstaller>) -> Self {
        self.installer = installer;
        self
    }

    pub fn runtime_root(&self) -> &Path {
        &self.runtime_root
    }

    pub fn marker_path(&self) -> PathBuf {
        self.runtime_root.join(INSTALL_MARKER)
    }

    /// Manifest and wheel cache live next to the runtime root.
    pub fn manifest_state(&self) -> ManifestState {
        let manifest = self.parent_dir().join("requirements.txt");
        if manifest.is_file() {
            ManifestState::Present(manifest)
        } else {
            ManifestState::Absent
        }
    }

    fn parent_dir(&self) -> &Path {
        self.runtime_root.parent().unwrap_or(&self.runtime_root)
    }

    fn provisioned(&self, outcome: ProvisionOutcome) -> ProvisionedRuntime {
        ProvisionedRuntime {
            runtime_root: self.runtime_root.clone(),
            executable: self.executable.clone(),
            outcome,
        }
    }

    /// Executable present plus at least one known component.
    fn looks_installed(&self) -> bool {
        self.executable.is_file()
            && self
                .known_components
                .iter()
                .any(|component| self.runtime_root.join(component).exists())
    }

    pub fn ensure_provisioned(&self) -> Result<ProvisionedRuntime> {
        let marker = self.marker_path();
        if marker.exists() {
            tracing::debug!("Bootstrap: marker present at '{}'", marker.display());
            return Ok(self.provisioned(ProvisionOutcome::AlreadyInstalled));
        }

        if self.looks_installed() {
            tracing::warn!(
                "Bootstrap: marker missing but runtime at '{}' is intact, recreating marker",
                self.runtime_root.display()
            );
            std::fs::write(&marker, "recovered\n").map_err(|e| {
                BridgeError::Bootstrap(format!(
                    "Failed to write marker '{}': {}",
                    marker.display(),
                    e
                ))
            })?;
            return Ok(self.provisioned(ProvisionOutcome::Recovered));
        }

        if !self.archive.is_file() {
            return Err(BridgeError::Bootstrap(format!(
                "runtime not installed at '{}' and archive '{}' not found",
                self.runtime_root.display(),
                self.archive.display()
            )));
        }

        tracing::info!(
            "Bootstrap: provisioning runtime from '{}' into '{}'",
            self.archive.display(),
            self.runtime_root.display()
        );

        let existed = self.runtime_root.exists();
        if let Err(e) = self.install_fresh(&marker) {
            tracing::error!("Bootstrap: provisioning failed: {}", e);
            if !existed {
                let _ = std::fs::remove_dir_all(&self.runtime_root);
            }
            return Err(e);
        }

        tracing::info!(
            "Bootstrap: runtime ready at '{}'",
            self.runtime_root.display()
        );
        Ok(self.provisioned(ProvisionOutcome::Installed))
    }

    fn install_fresh(&self, marker: &Path) -> Result<()> {
        extract_archive(&self.archive, &self.runtime_root)?;
        enable_site_imports(&self.runtime_root)?;

        match self.manifest_state() {
            ManifestState::Present(manifest) => {
                let wheel_dir = self.parent_dir().join("wheels");
                self.installer.install(&InstallRequest {
                    executable: &self.executable,
                    manifest: &manifest,
                    wheel_dir: &wheel_dir,
                })?;
            }
            ManifestState::Absent => {
                tracing::info!(
                    "Bootstrap: no requirements.txt next to '{}', skipping dependency installation",
                    self.runtime_root.display()
                );
            }
        }

        let digest = file_digest(&self.archive)?;
        std::fs::write(marker, format!("archive_sha256={}\n", digest)).map_err(|e| {
            BridgeError::Bootstrap(format!(
                "Failed to write marker '{}': {}",
                marker.display(),
                e
            ))
        })
    }
}

/// Uncomment `import site` in any `python*._pth` file under `runtime_root`
/// so the embedded interpreter sees `site-packages`.
pub fn enable_site_imports(runtime_root: &Path) -> Result<usize> {
    let mut patched = 0;
    for entry in std::fs::read_dir(runtime_root)? {
        let path = entry?.path();
        let is_pth = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("python") && n.ends_with("._pth"));
        if !is_pth {
            continue;
        }
        let content = std::fs::read_to_string(&path)?;
        if !content.contains("#import site") {
            continue;
        }
        std::fs::write(&path, content.replace("#import site", "import site"))?;
        tracing::debug!("Bootstrap: enabled site imports in '{}'", path.display());
        patched += 1;
    }
    Ok(patched)
}
