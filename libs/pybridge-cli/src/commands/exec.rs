// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! One-shot task dispatch over the fast path and the legacy transport.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, bail};
use pybridge::BridgeClient;

/// Input bytes from `--input FILE` or `--text S`; empty when neither is set.
pub fn read_input(input: Option<&Path>, text: Option<&str>) -> Result<Vec<u8>> {
    match (input, text) {
        (Some(path), _) => {
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
        }
        (None, Some(text)) => Ok(text.as_bytes().to_vec()),
        (None, None) => Ok(Vec::new()),
    }
}

pub fn run(
    client: &BridgeClient,
    task: &str,
    metadata: &str,
    input: &[u8],
    output: Option<&Path>,
) -> Result<()> {
    let Some(result) = client.execute(task, metadata, input) else {
        bail!("Task {} failed (see log for details)", task);
    };

    match output {
        Some(path) => {
            std::fs::write(path, &result)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {} bytes to {}", result.len(), path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&result)?;
            stdout.write_all(b"\n")?;
        }
    }
    Ok(())
}

/// Rewrites `input` with the worker's output.
pub fn raw(client: &BridgeClient, input: &Path, width: u32, height: u32, channels: u32) -> Result<()> {
    let mut pixels =
        std::fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let expected = width as usize * height as usize * channels as usize;
    if pixels.len() != expected {
        tracing::warn!(
            "{} holds {} bytes, expected {} for {}x{}x{}",
            input.display(),
            pixels.len(),
            expected,
            width,
            height,
            channels
        );
    }

    let reply = client.process_image_raw(&mut pixels, width, height, channels);
    if reply.starts_with("Error") {
        bail!("{}", reply);
    }
    std::fs::write(input, &pixels)
        .with_context(|| format!("Failed to write {}", input.display()))?;
    println!("{}", reply);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_prefers_file_then_text() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("input.bin");
        std::fs::write(&file, [1u8, 2, 3]).unwrap();

        assert_eq!(read_input(Some(&file), Some("ignored")).unwrap(), vec![1, 2, 3]);
        assert_eq!(read_input(None, Some("hi")).unwrap(), b"hi".to_vec());
        assert!(read_input(None, None).unwrap().is_empty());
        assert!(read_input(Some(&dir.path().join("missing")), None).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn raw_runs_without_a_worker_handshake() {
        use pybridge::layout::{LEGACY_OUTPUT, WORKER_SCRIPT};
        use pybridge::{BridgeConfig, SessionState};

        let work = tempfile::tempdir().unwrap();
        std::fs::write(
            work.path().join(WORKER_SCRIPT),
            format!("printf '\\000\\000\\000\\003abc' > {}\n", LEGACY_OUTPUT),
        )
        .unwrap();
        let mut config = BridgeConfig::for_work_dir(work.path());
        config.interpreter = Some("/bin/sh".into());
        config.runtime.provision = false;

        let pixels = work.path().join("pixels.raw");
        std::fs::write(&pixels, [0u8, 0, 0]).unwrap();

        let client = crate::commands::detached(config);
        raw(&client, &pixels, 1, 1, 3).unwrap();
        assert_eq!(std::fs::read(&pixels).unwrap(), b"abc");
        assert_eq!(client.session().state(), SessionState::Uninitialized);
    }
}
