// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Runtime provisioning: marker fast path, crash recovery, zip-slip guard,
//! installer failure cleanup.

mod common;

use std::sync::Arc;

use pybridge::{BridgeError, Bootstrapper, ProvisionOutcome};

use common::{FailingInstaller, counting_installer, write_malicious_archive, write_runtime_archive};

#[test]
fn fresh_install_extracts_patches_installs_and_marks() {
    let work = tempfile::tempdir().unwrap();
    let archive = work.path().join("python_dist.zip");
    write_runtime_archive(&archive);
    std::fs::write(work.path().join("requirements.txt"), "numpy\n").unwrap();

    let installer = counting_installer();
    let bootstrapper = Bootstrapper::new(&archive, work.path().join("python_dist"))
        .with_installer(installer.clone());

    let runtime = bootstrapper.ensure_provisioned().unwrap();
    assert_eq!(runtime.outcome, ProvisionOutcome::Installed);
    assert!(runtime.executable.is_file());
    assert_eq!(installer.calls(), 1);

    let marker = std::fs::read_to_string(bootstrapper.marker_path()).unwrap();
    assert!(marker.starts_with("archive_sha256="));
    let pth = std::fs::read_to_string(work.path().join("python_dist/python311._pth")).unwrap();
    assert!(pth.contains("\nimport site"));
    assert!(!pth.contains("#import site"));

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&runtime.executable).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    // Marker present: nothing runs again.
    let again = bootstrapper.ensure_provisioned().unwrap();
    assert_eq!(again.outcome, ProvisionOutcome::AlreadyInstalled);
    assert_eq!(installer.calls(), 1);
}

#[test]
fn missing_marker_with_intact_runtime_is_recovered_without_reinstall() {
    let work = tempfile::tempdir().unwrap();
    let archive = work.path().join("python_dist.zip");
    write_runtime_archive(&archive);
    std::fs::write(work.path().join("requirements.txt"), "numpy\n").unwrap();

    let installer = counting_installer();
    let bootstrapper = Bootstrapper::new(&archive, work.path().join("python_dist"))
        .with_installer(installer.clone());
    bootstrapper.ensure_provisioned().unwrap();

    // Simulate a crash between install and marker creation, then make sure
    // re-extraction would be noticed.
    std::fs::remove_file(bootstrapper.marker_path()).unwrap();
    std::fs::remove_file(&archive).unwrap();

    let recovered = bootstrapper.ensure_provisioned().unwrap();
    assert_eq!(recovered.outcome, ProvisionOutcome::Recovered);
    assert!(bootstrapper.marker_path().exists());
    assert_eq!(installer.calls(), 1);
}

#[test]
fn executable_without_known_component_is_not_recovered() {
    let work = tempfile::tempdir().unwrap();
    let bootstrapper = Bootstrapper::new(
        work.path().join("python_dist.zip"),
        work.path().join("python_dist"),
    );
    let executable = work
        .path()
        .join("python_dist")
        .join(pybridge::RuntimeConfig::default().executable);
    std::fs::create_dir_all(executable.parent().unwrap()).unwrap();
    std::fs::write(&executable, "").unwrap();

    let err = bootstrapper.ensure_provisioned().unwrap_err();
    assert!(matches!(err, BridgeError::Bootstrap(_)), "{err}");
    assert!(!bootstrapper.marker_path().exists());
}

#[test]
fn escaping_archive_entry_is_rejected_before_writing() {
    let outer = tempfile::tempdir().unwrap();
    let work = outer.path().join("a/b");
    std::fs::create_dir_all(&work).unwrap();
    let archive = work.join("python_dist.zip");
    write_malicious_archive(&archive);

    let bootstrapper = Bootstrapper::new(&archive, work.join("python_dist"));
    let err = bootstrapper.ensure_provisioned().unwrap_err();
    assert!(matches!(err, BridgeError::Archive(_)), "{err}");

    assert!(!outer.path().join("a/evil").exists());
    assert!(!work.join("evil").exists());
    assert!(!work.join("python_dist/python.exe").exists());
    assert!(!bootstrapper.marker_path().exists());
}

#[test]
fn installer_failure_aborts_and_removes_partial_runtime() {
    let work = tempfile::tempdir().unwrap();
    let archive = work.path().join("python_dist.zip");
    write_runtime_archive(&archive);
    std::fs::write(work.path().join("requirements.txt"), "numpy\n").unwrap();

    let bootstrapper = Bootstrapper::new(&archive, work.path().join("python_dist"))
        .with_installer(Arc::new(FailingInstaller));
    let err = bootstrapper.ensure_provisioned().unwrap_err();
    assert!(matches!(err, BridgeError::Installer(_)), "{err}");
    assert!(!work.path().join("python_dist").exists());
}

#[test]
fn absent_manifest_skips_installer() {
    let work = tempfile::tempdir().unwrap();
    let archive = work.path().join("python_dist.zip");
    write_runtime_archive(&archive);

    let installer = counting_installer();
    let runtime = Bootstrapper::new(&archive, work.path().join("python_dist"))
        .with_installer(installer.clone())
        .ensure_provisioned()
        .unwrap();
    assert_eq!(runtime.outcome, ProvisionOutcome::Installed);
    assert_eq!(installer.calls(), 0);
}
