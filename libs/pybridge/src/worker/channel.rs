// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Per-call payload regions.
//!
//! The shared-memory channel maps named POSIX shared memory objects (file
//! mappings on Windows), the same objects Python's
//! `multiprocessing.shared_memory` attaches to by name. The file channel
//! uses framed files under the work dir. A shared-memory allocation that
//! fails falls back to files for that call. Both regions of a call are
//! released when the [`RegionPair`] drops.

use std::fmt;
use std::path::{Path, PathBuf};

use shared_memory::{Shmem, ShmemConf};

use crate::config::FastChannel;
use crate::error::DispatchError;
use crate::framing;
use crate::worker::protocol::Region;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelKind {
    /// Mapped regions; `fallback_dir` holds file regions when mapping fails.
    SharedMemory { fallback_dir: PathBuf },
    File { dir: PathBuf },
}

impl ChannelKind {
    pub fn select(preference: FastChannel, file_dir: &Path) -> Self {
        match preference {
            FastChannel::File => ChannelKind::File {
                dir: file_dir.to_path_buf(),
            },
            FastChannel::Auto | FastChannel::SharedMemory => ChannelKind::SharedMemory {
                fallback_dir: file_dir.to_path_buf(),
            },
        }
    }
}

/// OS-level identifier for a region name. Python prepends `/` to names on
/// POSIX before calling `shm_open`, so the host does the same.
pub fn shm_os_id(name: &str) -> String {
    if cfg!(unix) {
        format!("/{}", name)
    } else {
        name.to_string()
    }
}

/// Correlation id reduced to characters that are safe in file and shared
/// memory names.
fn sanitize_id(correlation_id: &str) -> String {
    let cleaned: String = correlation_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "anon".to_string()
    } else {
        cleaned
    }
}

/// First eight characters of the sanitized correlation id.
fn short_id(correlation_id: &str) -> String {
    sanitize_id(correlation_id).chars().take(8).collect()
}

enum Backing {
    Mapped { input: Shmem, output: Shmem },
    Files { input: PathBuf, output: PathBuf },
}

/// Input and output regions for one call.
pub struct RegionPair {
    input: Region,
    output: Region,
    backing: Backing,
}

impl fmt::Debug for RegionPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionPair")
            .field("input", &self.input)
            .field("output", &self.output)
            .finish()
    }
}

impl RegionPair {
    /// Create both regions and copy `input` into the input region.
    pub fn allocate(
        kind: &ChannelKind,
        session_key: &str,
        correlation_id: &str,
        input: &[u8],
        output_capacity: usize,
    ) -> Result<Self, DispatchError> {
        match kind {
            ChannelKind::SharedMemory { fallback_dir } => {
                match Self::allocate_mapped(session_key, correlation_id, input, output_capacity) {
                    Ok(pair) => Ok(pair),
                    Err(e) => {
                        tracing::warn!(
                            request_id = %correlation_id,
                            "Shared memory unavailable ({}), using file channel for this call",
                            e
                        );
                        Self::allocate_files(fallback_dir, correlation_id, input, output_capacity)
                    }
                }
            }
            ChannelKind::File { dir } => {
                Self::allocate_files(dir, correlation_id, input, output_capacity)
            }
        }
    }

    fn allocate_mapped(
        session_key: &str,
        correlation_id: &str,
        input: &[u8],
        output_capacity: usize,
    ) -> Result<Self, DispatchError> {
        let id8 = short_id(correlation_id);
        let input_name = format!("{}_{}", session_key, id8);
        let output_name = format!("{}_out_{}", session_key, id8);

        // A zero-length object cannot be mapped by the worker.
        let mut input_map = create_mapping(&input_name, input.len().max(1))?;
        // SAFETY: the mapping was just created by this process and is at
        // least `input.len()` bytes; the worker only attaches after the
        // execute message is sent.
        let target = unsafe { input_map.as_slice_mut() };
        target[..input.len()].copy_from_slice(input);
        let output_map = create_mapping(&output_name, output_capacity.max(1))?;

        Ok(Self {
            input: Region::Shm {
                name: input_name,
                len: input.len(),
            },
            output: Region::Shm {
                name: output_name,
                len: output_capacity,
            },
            backing: Backing::Mapped {
                input: input_map,
                output: output_map,
            },
        })
    }

    fn allocate_files(
        dir: &Path,
        correlation_id: &str,
        input: &[u8],
        output_capacity: usize,
    ) -> Result<Self, DispatchError> {
        std::fs::create_dir_all(dir)?;
        let id = sanitize_id(correlation_id);
        let input_path = dir.join(format!("input_{}.dat", id));
        let output_path = dir.join(format!("output_{}.dat", id));

        remove_if_present(&output_path);
        framing::write_frame_file(&input_path, input)?;

        Ok(Self {
            input: Region::File {
                path: input_path.clone(),
                len: input.len(),
            },
            output: Region::File {
                path: output_path.clone(),
                len: output_capacity,
            },
            backing: Backing::Files {
                input: input_path,
                output: output_path,
            },
        })
    }

    pub fn input(&self) -> &Region {
        &self.input
    }

    pub fn output(&self) -> &Region {
        &self.output
    }

    /// Read `len` bytes of worker output.
    pub fn read_output(&self, len: usize) -> Result<Vec<u8>, DispatchError> {
        let capacity = self.output.len();
        if len > capacity {
            return Err(DispatchError::Protocol(format!(
                "worker reported {} output bytes, region capacity is {}",
                len, capacity
            )));
        }
        match &self.backing {
            Backing::Mapped { output, .. } => {
                // SAFETY: the worker has replied, so it no longer writes to
                // the region; the mapping outlives this borrow.
                let mapped = unsafe { output.as_slice() };
                mapped.get(..len).map(<[u8]>::to_vec).ok_or_else(|| {
                    DispatchError::Protocol(format!(
                        "output mapping holds {} bytes, worker reported {}",
                        mapped.len(),
                        len
                    ))
                })
            }
            Backing::Files { output, .. } => {
                if !output.exists() {
                    return Err(DispatchError::Protocol(format!(
                        "worker reported success but did not write '{}'",
                        output.display()
                    )));
                }
                let payload = framing::read_frame_file(output)?;
                if payload.len() != len {
                    return Err(DispatchError::Protocol(format!(
                        "worker reported {} output bytes, file holds {}",
                        len,
                        payload.len()
                    )));
                }
                Ok(payload)
            }
        }
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.backing, Backing::Mapped { .. })
    }
}

impl Drop for RegionPair {
    fn drop(&mut self) {
        // Owned mappings unlink themselves when dropped.
        if let Backing::Files { input, output } = &self.backing {
            remove_if_present(input);
            remove_if_present(output);
        }
    }
}

fn create_mapping(name: &str, size: usize) -> Result<Shmem, DispatchError> {
    ShmemConf::new()
        .size(size)
        .os_id(shm_os_id(name))
        .create()
        .map_err(|e| DispatchError::Region(format!("Failed to create '{}': {}", name, e)))
}

fn remove_if_present(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove region '{}': {}", path.display(), e),
    }
}
