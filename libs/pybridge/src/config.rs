// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Bridge configuration via `pybridge.toml` plus `PYBRIDGE_*` overrides.
//!
//! Resolution order:
//! 1. Values from an explicit TOML file ([`BridgeConfig::load`]), or defaults
//! 2. `PYBRIDGE_*` environment variables ([`BridgeConfig::apply_env_overrides`])
//! 3. Validation ([`BridgeConfig::validate`])

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

pub const ENV_WORK_DIR: &str = "PYBRIDGE_WORK_DIR";
pub const ENV_SOURCE_DIR: &str = "PYBRIDGE_SOURCE_DIR";
pub const ENV_MODEL_PATH: &str = "PYBRIDGE_MODEL_PATH";
pub const ENV_CONFIDENCE: &str = "PYBRIDGE_CONFIDENCE";
pub const ENV_DISPATCH_TIMEOUT_SECS: &str = "PYBRIDGE_DISPATCH_TIMEOUT_SECS";

/// How request/response payloads travel between host and worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FastChannel {
    /// Shared memory, falling back to framed files for any call whose
    /// mapping cannot be created.
    #[default]
    Auto,
    SharedMemory,
    File,
}

/// Embedded runtime distribution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Provision the embedded runtime on initialize. When false the worker
    /// runs on `interpreter` (or `python3` from `PATH`).
    pub provision: bool,
    /// Distribution archive. Defaults to `<work_dir>/<dir_name>.zip`.
    pub archive: Option<PathBuf>,
    /// Directory under the work dir the runtime is extracted into.
    pub dir_name: String,
    /// Interpreter path relative to the runtime root.
    pub executable: PathBuf,
    /// Paths relative to the runtime root whose presence proves a previous
    /// install completed even if the marker is gone.
    pub known_components: Vec<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            provision: true,
            archive: None,
            dir_name: "python_dist".to_string(),
            executable: default_executable(),
            known_components: vec![
                PathBuf::from("Lib/site-packages/numpy"),
                PathBuf::from("Lib/site-packages/cv2"),
                PathBuf::from("Lib/site-packages/ultralytics"),
            ],
        }
    }
}

#[cfg(windows)]
fn default_executable() -> PathBuf {
    PathBuf::from("python.exe")
}

#[cfg(not(windows))]
fn default_executable() -> PathBuf {
    PathBuf::from("bin/python3")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub work_dir: PathBuf,
    /// Directory holding `ai_worker.py` and `plugins/` to stage into the
    /// work dir on initialize.
    pub source_script_dir: Option<PathBuf>,
    pub model_path: String,
    pub confidence: f64,
    /// Explicit interpreter, bypassing the provisioned runtime.
    pub interpreter: Option<PathBuf>,
    pub runtime: RuntimeConfig,
    pub fast_channel: FastChannel,
    /// Upper bound on a single task's output region.
    pub output_capacity: usize,
    pub dispatch_timeout_secs: u64,
    pub startup_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            source_script_dir: None,
            model_path: "yolov8n.pt".to_string(),
            confidence: 0.5,
            interpreter: None,
            runtime: RuntimeConfig::default(),
            fast_channel: FastChannel::Auto,
            output_capacity: 1024 * 1024,
            dispatch_timeout_secs: 120,
            startup_timeout_secs: 600,
        }
    }
}

/// `<data_local_dir>/pybridge`, or `./pybridge` when the platform has no
/// notion of one.
pub fn default_work_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pybridge")
}

impl BridgeConfig {
    /// Conventional configuration file name.
    pub const FILE_NAME: &'static str = "pybridge.toml";

    /// Config for `work_dir` with every other field defaulted.
    pub fn for_work_dir(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file. Errors if the file is missing or
    /// cannot be parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content).map_err(|e| {
            BridgeError::Configuration(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        tracing::info!("Loaded bridge config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// File config (if given), then environment overrides, then validation.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `PYBRIDGE_*` environment variables on top of the current values.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var(ENV_WORK_DIR) {
            self.work_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var(ENV_SOURCE_DIR) {
            self.source_script_dir = Some(PathBuf::from(dir));
        }
        if let Ok(model) = std::env::var(ENV_MODEL_PATH) {
            self.model_path = model;
        }
        if let Ok(raw) = std::env::var(ENV_CONFIDENCE) {
            self.confidence = raw.trim().parse().map_err(|e| {
                BridgeError::Configuration(format!("{}={:?}: {}", ENV_CONFIDENCE, raw, e))
            })?;
        }
        if let Ok(raw) = std::env::var(ENV_DISPATCH_TIMEOUT_SECS) {
            self.dispatch_timeout_secs = raw.trim().parse().map_err(|e| {
                BridgeError::Configuration(format!(
                    "{}={:?}: {}",
                    ENV_DISPATCH_TIMEOUT_SECS, raw, e
                ))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(BridgeError::Configuration(format!(
                "confidence must be within [0, 1], got {}",
                self.confidence
            )));
        }
        if self.work_dir.as_os_str().is_empty() {
            return Err(BridgeError::Configuration(
                "work_dir must not be empty".to_string(),
            ));
        }
        if self.dispatch_timeout_secs == 0 {
            return Err(BridgeError::Configuration(
                "dispatch_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.output_capacity == 0 {
            return Err(BridgeError::Configuration(
                "output_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn runtime_root(&self) -> PathBuf {
        self.work_dir.join(&self.runtime.dir_name)
    }

    pub fn runtime_archive(&self) -> PathBuf {
        match &self.runtime.archive {
            Some(archive) => archive.clone(),
            None => self
                .work_dir
                .join(format!("{}.zip", self.runtime.dir_name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            ENV_WORK_DIR,
            ENV_SOURCE_DIR,
            ENV_MODEL_PATH,
            ENV_CONFIDENCE,
            ENV_DISPATCH_TIMEOUT_SECS,
        ] {
            // SAFETY: tests touching the environment run under #[serial].
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = BridgeConfig::default();
        assert_eq!(config.confidence, 0.5);
        assert_eq!(config.fast_channel, FastChannel::Auto);
        assert_eq!(config.output_capacity, 1024 * 1024);
        assert_eq!(config.startup_timeout(), Duration::from_secs(600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_missing_file_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = BridgeConfig::load(&dir.path().join(BridgeConfig::FILE_NAME)).unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(_)));
    }

    #[test]
    fn load_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(BridgeConfig::FILE_NAME);
        std::fs::write(
            &path,
            r#"
work_dir = "/srv/bridge"
confidence = 0.25
fast_channel = "file"

[runtime]
archive = "/opt/dist/python_dist.zip"
"#,
        )
        .unwrap();

        let config = BridgeConfig::load(&path).unwrap();
        assert_eq!(config.work_dir, PathBuf::from("/srv/bridge"));
        assert_eq!(config.confidence, 0.25);
        assert_eq!(config.fast_channel, FastChannel::File);
        assert_eq!(config.runtime.dir_name, "python_dist");
        assert_eq!(
            config.runtime_archive(),
            PathBuf::from("/opt/dist/python_dist.zip")
        );
        assert_eq!(config.runtime_root(), PathBuf::from("/srv/bridge/python_dist"));
    }

    #[test]
    #[serial]
    fn env_overrides_win_over_file_values() {
        clear_env();
        let mut config = BridgeConfig::for_work_dir("/from/file");
        // SAFETY: serialized with other env tests.
        unsafe {
            std::env::set_var(ENV_WORK_DIR, "/from/env");
            std::env::set_var(ENV_CONFIDENCE, "0.8");
            std::env::set_var(ENV_MODEL_PATH, "custom.pt");
        }
        config.apply_env_overrides().unwrap();
        clear_env();

        assert_eq!(config.work_dir, PathBuf::from("/from/env"));
        assert_eq!(config.confidence, 0.8);
        assert_eq!(config.model_path, "custom.pt");
    }

    #[test]
    #[serial]
    fn malformed_env_confidence_is_rejected() {
        clear_env();
        let mut config = BridgeConfig::default();
        // SAFETY: serialized with other env tests.
        unsafe { std::env::set_var(ENV_CONFIDENCE, "high") };
        let result = config.apply_env_overrides();
        clear_env();
        assert!(matches!(result, Err(BridgeError::Configuration(_))));
    }

    #[test]
    fn out_of_range_confidence_fails_validation() {
        let mut config = BridgeConfig::default();
        config.confidence = 1.5;
        assert!(matches!(
            config.validate(),
            Err(BridgeError::Configuration(_))
        ));
    }

    #[test]
    fn zero_output_capacity_fails_validation() {
        let mut config = BridgeConfig::default();
        config.output_capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(BridgeError::Configuration(_))
        ));
    }
}
