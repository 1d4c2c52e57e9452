// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Byte regions handed across the host/worker boundary.
//!
//! A [`HandoffBuffer`] tracks an explicit length and a read cursor over a
//! contiguous region. The region is either owned ([`BytesMut`]) or borrowed
//! from the host (`&mut [u8]`, e.g. memory pinned by a JVM direct buffer),
//! so the raw path can mutate the caller's memory in place without an
//! intermediate managed copy.

use std::io::{self, Read};

use bytes::{Bytes, BytesMut};

pub struct HandoffBuffer<B = BytesMut> {
    storage: B,
    cursor: usize,
}

impl HandoffBuffer<BytesMut> {
    /// Owned buffer holding a copy of `data`.
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self {
            storage: BytesMut::from(data),
            cursor: 0,
        }
    }

    /// Owned, zero-filled buffer of `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        Self {
            storage: BytesMut::zeroed(len),
            cursor: 0,
        }
    }

    pub fn freeze(self) -> Bytes {
        self.storage.freeze()
    }
}

impl<'a> HandoffBuffer<&'a mut [u8]> {
    /// Borrow a caller-owned region for the duration of one call.
    pub fn wrap(region: &'a mut [u8]) -> Self {
        Self {
            storage: region,
            cursor: 0,
        }
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> HandoffBuffer<B> {
    pub fn len(&self) -> usize {
        self.storage.as_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Reset the cursor to the start of the region.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// The full tracked region, independent of the cursor.
    pub fn as_slice(&self) -> &[u8] {
        self.storage.as_ref()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.storage.as_mut()
    }

    /// Bytes between the cursor and the end of the region.
    pub fn remaining(&self) -> &[u8] {
        &self.storage.as_ref()[self.cursor..]
    }

    /// Copy a worker result back into the region from offset 0 and rewind.
    ///
    /// Never writes past the tracked length; a longer payload is truncated
    /// and a shorter one leaves the tail untouched. Returns the number of
    /// bytes copied.
    pub fn write_back(&mut self, payload: &[u8]) -> usize {
        let len = self.len();
        if payload.len() != len {
            tracing::warn!(
                "Write-back size mismatch: region holds {} bytes, worker produced {}",
                len,
                payload.len()
            );
        }
        let n = payload.len().min(len);
        self.storage.as_mut()[..n].copy_from_slice(&payload[..n]);
        self.cursor = 0;
        n
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Read for HandoffBuffer<B> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.remaining();
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.cursor += n;
        Ok(n)
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> std::fmt::Debug for HandoffBuffer<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandoffBuffer")
            .field("len", &self.len())
            .field("cursor", &self.cursor)
            .finish()
    }
}
