// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Length-prefixed framing shared by the legacy file transport, the fast
//! channel's file regions and the worker envelope.
//!
//! A frame is a 4-byte big-endian unsigned length `L` followed by exactly
//! `L` payload bytes. `L = 0` is a valid, empty frame.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Size of the length header in bytes.
pub const HEADER_LEN: usize = 4;

/// Encode a payload length as a frame header.
pub fn encode_header(len: usize) -> io::Result<[u8; HEADER_LEN]> {
    let len = u32::try_from(len).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("payload of {} bytes does not fit a u32 frame header", len),
        )
    })?;
    Ok(len.to_be_bytes())
}

/// Write one frame (header + payload) and flush.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    writer.write_all(&encode_header(payload.len())?)?;
    writer.write_all(payload)?;
    writer.flush()
}

/// Read a frame header.
pub fn read_header<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut len_buf = [0u8; HEADER_LEN];
    reader.read_exact(&mut len_buf)?;
    Ok(u32::from_be_bytes(len_buf))
}

/// Read up to `declared` payload bytes, looping over short reads until the
/// length is satisfied or the stream ends. Returns what was actually read,
/// which is shorter than `declared` only if the producer truncated the frame.
pub fn read_payload<R: Read>(reader: &mut R, declared: u32) -> io::Result<Vec<u8>> {
    let mut payload = Vec::with_capacity((declared as usize).min(1 << 20));
    reader
        .by_ref()
        .take(u64::from(declared)).read_to_end(&mut payload)?;
    if payload.len() < declared as usize {
        tracing::warn!(
            "Frame declared {} bytes but stream ended after {}",
            declared,
            payload.len()
        );
    }
    Ok(payload)
}

/// Read one complete frame. Unlike [`read_payload`], a truncated payload is
/// an error here, and frames larger than `max_len` are refused before any
/// allocation.
pub fn read_frame<R: Read>(reader: &mut R, max_len: u32) -> io::Result<Vec<u8>> {
    let declared = read_header(reader)?;
    if declared > max_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit of {}", declared, max_len),
        ));
    }
    let mut payload = vec![0u8; declared as usize];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

/// Write `payload` as a single frame to `path`, replacing any existing file.
pub fn write_frame_file(path: &Path, payload: &[u8]) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_frame(&mut writer, payload)
}

/// Read a framed file, tolerating a payload shorter than its header claims.
pub fn read_frame_file(path: &Path) -> io::Result<Vec<u8>> {
    let mut reader = BufReader::new(File::open(path)?);
    let declared = read_header(&mut reader)?;
    read_payload(&mut reader, declared)
}
