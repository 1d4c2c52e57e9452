// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Runtime distribution archive extraction.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use zip::ZipArchive;

use crate::error::{BridgeError, Result};

/// Resolve an archive entry name against `target_dir`, refusing anything
/// that would land outside it (absolute paths, `..` escapes, drive prefixes).
pub fn resolve_entry_path(target_dir: &Path, entry_name: &str) -> Result<PathBuf> {
    let mut resolved = target_dir.to_path_buf();
    for component in Path::new(entry_name).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if resolved == target_dir || !resolved.pop() || !resolved.starts_with(target_dir) {
                    return Err(BridgeError::Archive(format!(
                        "entry '{}' escapes {}",
                        entry_name,
                        target_dir.display()
                    )));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(BridgeError::Archive(format!(
                    "entry '{}' is an absolute path",
                    entry_name
                )));
            }
        }
    }
    if !resolved.starts_with(target_dir) {
        return Err(BridgeError::Archive(format!(
            "entry '{}' escapes {}",
            entry_name,
            target_dir.display()
        )));
    }
    Ok(resolved)
}

/// Extract `archive_path` into `target_dir`.
///
/// Every entry name is validated before the first byte is written, so an
/// archive carrying a single escaping entry leaves the filesystem untouched.
/// Returns the number of files written.
pub fn extract_archive(archive_path: &Path, target_dir: &Path) -> Result<usize> {
    let file = File::open(archive_path).map_err(|e| {
        BridgeError::Bootstrap(format!(
            "Failed to open runtime archive {}: {}",
            archive_path.display(),
            e
        ))
    })?;
    let mut archive = ZipArchive::new(BufReader::new(file)).map_err(|e| {
        BridgeError::Bootstrap(format!(
            "Failed to read runtime archive {}: {}",
            archive_path.display(),
            e
        ))
    })?;

    let mut plan = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive
            .by_index_raw(index)
            .map_err(|e| BridgeError::Bootstrap(format!("Corrupt archive entry {}: {}", index, e)))?;
        let name = entry.name().to_string();
        if entry.enclosed_name().is_none() {
            tracing::error!("Bootstrap: rejecting archive entry '{}'", name);
            return Err(BridgeError::Archive(format!(
                "entry '{}' is not enclosed by the archive root",
                name
            )));
        }
        let out_path = resolve_entry_path(target_dir, &name)?;
        plan.push((index, out_path, entry.is_dir()));
    }

    std::fs::create_dir_all(target_dir)?;

    let mut written = 0;
    for (index, out_path, is_dir) in plan {
        if is_dir {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut entry = archive
            .by_index(index)
            .map_err(|e| BridgeError::Bootstrap(format!("Corrupt archive entry {}: {}", index, e)))?;
        let mut out = File::create(&out_path)?;
        io::copy(&mut entry, &mut out)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode & 0o7777))?;
        }
        written += 1;
    }

    tracing::debug!(
        "Bootstrap: extracted {} files from {} into {}",
        written,
        archive_path.display(),
        target_dir.display()
    );
    Ok(written)
}

/// Hex SHA-256 of a file, recorded in the install marker.
pub fn file_digest(path: &Path) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut file = File::open(path)?;
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}
