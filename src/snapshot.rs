// Copyright (C) 2025 Dayton Fishell
// PAL-64 Home Computer Emulator
// This file is part of PAL-64.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Machine-state snapshot encoding.
//!
//! Every stateful component implements [`Snapshot`] against an ordered byte
//! stream (little-endian). Composite components delegate depth-first to their
//! sub-components in a fixed field order, and restore uses the same order.
//! Array sections are framed `[marker][len:u32][elements...][marker]` with a
//! reserved sentinel so a corrupted or misaligned stream is rejected at the
//! first frame boundary instead of being read as garbage.

use thiserror::Error;

/// Reserved marker written before and after every array section.
pub const SECTION_MARKER: u32 = 0xFDFD_FDFD;

/// Errors produced while restoring a snapshot stream.
///
/// All of these are fatal: a stream that fails to restore must be discarded,
/// never partially applied.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("snapshot stream truncated at offset {offset}")]
    Truncated { offset: usize },

    #[error(
        "section marker mismatch at offset {offset}: expected {expected:#010X}, found {found:#010X}"
    )]
    MarkerMismatch {
        offset: usize,
        expected: u32,
        found: u32,
    },

    #[error("array length {len} exceeds destination capacity {capacity}")]
    LengthExceedsCapacity { len: usize, capacity: usize },

    #[error("bad snapshot magic {found:02X?}")]
    BadMagic { found: [u8; 4] },

    #[error("unsupported snapshot version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("restored field out of range: {field} = {value}")]
    FieldOutOfRange { field: &'static str, value: u64 },
}

/// A stateful component that can save and restore itself byte-for-byte.
pub trait Snapshot {
    /// Append this component's state to the stream.
    fn save(&self, w: &mut SnapshotWriter);

    /// Restore this component's state from the stream.
    ///
    /// On error the component may be left in a reset-equivalent state, but the
    /// caller must treat the whole stream as unusable.
    fn restore(&mut self, r: &mut SnapshotReader<'_>) -> Result<(), SnapshotError>;
}

/// Append-only byte sink for snapshot encoding.
pub struct SnapshotWriter {
    buf: Vec<u8>,
}

impl SnapshotWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Write a marker-framed, length-prefixed section of raw bytes.
    pub fn write_u8_section(&mut self, data: &[u8]) {
        self.write_u32(SECTION_MARKER);
        self.write_u32(data.len() as u32);
        self.buf.extend_from_slice(data);
        self.write_u32(SECTION_MARKER);
    }

    /// Write a marker-framed, length-prefixed section of 32-bit words.
    pub fn write_u32_section(&mut self, data: &[u32]) {
        self.write_u32(SECTION_MARKER);
        self.write_u32(data.len() as u32);
        for &word in data {
            self.write_u32(word);
        }
        self.write_u32(SECTION_MARKER);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

impl Default for SnapshotWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounds-checked cursor over a snapshot byte stream.
pub struct SnapshotReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SnapshotReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current read offset, for diagnostics.
    pub fn offset(&self) -> usize {
        self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], SnapshotError> {
        if self.pos + len > self.data.len() {
            return Err(SnapshotError::Truncated { offset: self.pos });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, SnapshotError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, SnapshotError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, SnapshotError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, SnapshotError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn read_bool(&mut self) -> Result<bool, SnapshotError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], SnapshotError> {
        self.take(len)
    }

    fn expect_marker(&mut self) -> Result<(), SnapshotError> {
        let offset = self.pos;
        let found = self.read_u32()?;
        if found != SECTION_MARKER {
            return Err(SnapshotError::MarkerMismatch {
                offset,
                expected: SECTION_MARKER,
                found,
            });
        }
        Ok(())
    }

    /// Read a marker-framed byte section into `dest`.
    ///
    /// The section length must exactly match `dest.len()`; destination buffers
    /// are fixed by chip geometry and a mismatched length means the stream was
    /// produced by a differently-configured machine.
    pub fn read_u8_section(&mut self, dest: &mut [u8]) -> Result<(), SnapshotError> {
        self.expect_marker()?;
        let len = self.read_u32()? as usize;
        if len > dest.len() {
            return Err(SnapshotError::LengthExceedsCapacity {
                len,
                capacity: dest.len(),
            });
        }
        let bytes = self.take(len)?;
        dest[..len].copy_from_slice(bytes);
        self.expect_marker()
    }

    /// Read a marker-framed 32-bit word section into `dest`.
    pub fn read_u32_section(&mut self, dest: &mut [u32]) -> Result<(), SnapshotError> {
        self.expect_marker()?;
        let len = self.read_u32()? as usize;
        if len > dest.len() {
            return Err(SnapshotError::LengthExceedsCapacity {
                len,
                capacity: dest.len(),
            });
        }
        for slot in dest.iter_mut().take(len) {
            *slot = self.read_u32()?;
        }
        self.expect_marker()
    }

    /// Bytes remaining past the current offset.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}
