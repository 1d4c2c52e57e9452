// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use pybridge::bootstrap::InstallRequest;
use pybridge::{BridgeConfig, BridgeError, FastChannel, PackageInstaller, RuntimeConfig};
use zip::write::SimpleFileOptions;

pub fn stub_worker() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_pybridge_stub_worker"))
}

/// Config running the stub worker directly, no embedded runtime.
pub fn stub_config(work_dir: &Path) -> BridgeConfig {
    let mut config = BridgeConfig::for_work_dir(work_dir);
    config.interpreter = Some(stub_worker());
    config.runtime.provision = false;
    config.fast_channel = FastChannel::File;
    config.startup_timeout_secs = 30;
    config.dispatch_timeout_secs = 30;
    config
}

/// Config that provisions from `<work_dir>/python_dist.zip` and then runs
/// the stub worker.
pub fn provisioning_config(work_dir: &Path) -> BridgeConfig {
    let mut config = stub_config(work_dir);
    config.runtime.provision = true;
    config
}

pub fn spawn_count(work_dir: &Path) -> usize {
    std::fs::read_to_string(work_dir.join("stub_spawns.log"))
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

/// Write a minimal runtime distribution archive.
pub fn write_runtime_archive(path: &Path) {
    let executable = RuntimeConfig::default().executable;
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let exec_options = SimpleFileOptions::default().unix_permissions(0o755);
    let options = SimpleFileOptions::default();

    zip.start_file(executable.to_string_lossy().into_owned(), exec_options)
        .unwrap();
    zip.write_all(b"#!/bin/sh\n").unwrap();
    zip.start_file("python311._pth", options).unwrap();
    zip.write_all(b"python311.zip\n.\n#import site\n").unwrap();
    zip.start_file("Lib/site-packages/numpy/__init__.py", options)
        .unwrap();
    zip.write_all(b"").unwrap();
    zip.finish().unwrap();
}

/// Archive whose second entry tries to escape the extraction root.
pub fn write_malicious_archive(path: &Path) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default();
    zip.start_file("python.exe", options).unwrap();
    zip.write_all(b"benign").unwrap();
    zip.start_file("../../evil", options).unwrap();
    zip.write_all(b"payload").unwrap();
    zip.finish().unwrap();
}

/// Installer that only counts invocations, slowly enough to widen races.
#[derive(Default)]
pub struct CountingInstaller {
    pub calls: AtomicUsize,
}

impl CountingInstaller {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PackageInstaller for CountingInstaller {
    fn install(&self, request: &InstallRequest<'_>) -> pybridge::Result<()> {
        assert!(request.manifest.is_file());
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(100));
        Ok(())
    }
}

/// Installer that always fails, as a non-zero pip exit would.
pub struct FailingInstaller;

impl PackageInstaller for FailingInstaller {
    fn install(&self, _request: &InstallRequest<'_>) -> pybridge::Result<()> {
        Err(BridgeError::Installer("pip exited with exit status: 1".into()))
    }
}

pub fn counting_installer() -> Arc<CountingInstaller> {
    Arc::new(CountingInstaller::default())
}
