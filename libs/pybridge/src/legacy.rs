// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! File-based slow path: one worker process per call, fixed-name frame
//! files in the work dir, result copied back into the caller's buffer.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use parking_lot::Mutex;

use crate::buffer::HandoffBuffer;
use crate::error::{BridgeError, Result};
use crate::framing;
use crate::layout::WorkDirLayout;

/// Returned when the worker exits without producing `output_image.dat`.
pub const MISSING_OUTPUT: &str = "Error: Python did not create output file";

/// Prefix for every other slow-path failure.
pub const INTERACTION_ERROR_PREFIX: &str = "Error interacting with Python: ";

pub struct LegacyTransport {
    layout: WorkDirLayout,
    interpreter: PathBuf,
    // Input/output file names are fixed per work dir.
    exclusive: Mutex<()>,
}

impl LegacyTransport {
    pub fn new(work_dir: impl Into<PathBuf>, interpreter: impl Into<PathBuf>) -> Self {
        Self {
            layout: WorkDirLayout::new(work_dir),
            interpreter: interpreter.into(),
            exclusive: Mutex::new(()),
        }
    }

    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    /// Run the worker once over `buffer`.
    ///
    /// Returns the worker's combined stdout/stderr, trimmed. On success the
    /// worker's output frame has been copied into `buffer` and its cursor
    /// rewound. Failures come back as `"Error..."` sentinel strings.
    pub fn run_raw<B>(&self, buffer: &mut HandoffBuffer<B>, width: u32, height: u32, channels: u32) -> String
    where
        B: AsRef<[u8]> + AsMut<[u8]>,
    {
        match self.try_run_raw(buffer, width, height, channels) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Legacy transport failed: {}", e);
                format!("{}{}", INTERACTION_ERROR_PREFIX, e)
            }
        }
    }

    fn try_run_raw<B>(
        &self,
        buffer: &mut HandoffBuffer<B>,
        width: u32,
        height: u32,
        channels: u32,
    ) -> Result<String>
    where
        B: AsRef<[u8]> + AsMut<[u8]>,
    {
        let _exclusive = self.exclusive.lock();
        let input_path = self.layout.legacy_input();
        let output_path = self.layout.legacy_output();

        buffer.rewind();
        framing::write_frame_file(&input_path, buffer.as_slice())?;

        match std::fs::remove_file(&output_path) {
            Ok(()) => tracing::debug!("Removed stale '{}'", output_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(BridgeError::ResourceSetup(format!(
                    "Failed to remove stale '{}': {}",
                    output_path.display(),
                    e
                )));
            }
        }

        let mut child = Command::new(&self.interpreter)
            .arg(self.layout.worker_script())
            .arg(width.to_string())
            .arg(height.to_string())
            .arg(channels.to_string())
            .current_dir(self.layout.root())
            .env("PYTHONIOENCODING", "utf-8")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                BridgeError::ResourceSetup(format!(
                    "Failed to spawn '{}': {}",
                    self.interpreter.display(),
                    e
                ))
            })?;

        let (tx, rx) = crossbeam_channel::unbounded::<String>();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_line_reader(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_line_reader(stderr, tx.clone()));
        }
        drop(tx);

        let mut combined = String::new();
        for line in rx.iter() {
            tracing::debug!(target: "pybridge::worker", "{}", line);
            combined.push_str(&line);
            combined.push('\n');
        }
        for reader in readers {
            let _ = reader.join();
        }

        let status = child.wait()?;
        if !status.success() {
            tracing::warn!("Worker exited with {}, reading output anyway", status);
        }

        if !output_path.exists() {
            tracing::error!("Worker did not create '{}'", output_path.display());
            return Ok(MISSING_OUTPUT.to_string());
        }

        let payload = framing::read_frame_file(&output_path)?;
        let copied = buffer.write_back(&payload);
        tracing::debug!("Copied {} bytes back into caller buffer", copied);

        Ok(combined.trim().to_string())
    }
}

fn spawn_line_reader<R: Read + Send + 'static>(
    stream: R,
    tx: crossbeam_channel::Sender<String>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        for line in BufReader::new(stream).lines().map_while(|l| l.ok()) {
            if tx.send(line).is_err() {
                break;
            }
        }
    })
}
