// Copyright (C) 2025 Dayton Fishell
// PAL-64 Home Computer Emulator
// This file is part of PAL-64.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Raster video synthesis engine.
//!
//! Converts the video chip's per-cycle pixel stream into a full-resolution
//! framebuffer and an optionally down-scaled, bilinearly blended output
//! buffer, while maintaining a dirty-region cache that lets a renderer skip
//! cells whose content provably has not changed.
//!
//! All sub-pixel positions use 10-bit fixed point: fractions are values in
//! `[0, 1024)` and one output pixel is `1024` units wide. Down-scaling by a
//! factor `s` advances the scaled cursor by `s * 1024` units per emitted
//! pixel; an output pixel is committed whenever the fractional part wraps.

use crate::event::{EventBus, VideoEvent};
use crate::snapshot::{Snapshot, SnapshotError, SnapshotReader, SnapshotWriter};

/// One fixed-point unit (10 fractional bits).
pub const FRAC_ONE: u32 = 1024;
const FRAC_BITS: u32 = 10;
const FRAC_MASK: u32 = FRAC_ONE - 1;

/// Hashed dirty-cache columns per output row.
pub const DIRTY_COLS: usize = 32;

/// Sentinel for a dirty cell whose last-painted color is unknown.
const DIRTY_UNKNOWN: u64 = u64::MAX;

/// Opaque black in ARGB8888, the cleared-buffer color.
const BLACK: u32 = 0xFF00_0000;

/// How an emitted pixel is committed to the scaled buffer.
///
/// Selected once at construction from the scale ratio; `Direct` skips all
/// blend math when no down-scaling is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelCommit {
    /// Scale factor 1: the scaled buffer is a plain copy.
    Direct,
    /// Scale factor below 1: fixed-point bilinear blend over the 2x2
    /// neighborhood of full-resolution samples.
    Blend,
}

/// The mutable position of the raster scan.
///
/// Saved and restored as a unit: a partial restore would desynchronize the
/// full-resolution and scaled cursors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelCursor {
    /// Linear index into the full-resolution buffer.
    index: usize,
    /// Fixed-point linear index into the scaled buffer.
    scaled_index: u32,
    /// Per-pixel advance in fixed-point units, derived from the scale ratio.
    step: u32,
    /// Vertical fraction of the current scan line.
    line_frac: u32,
    /// True when the current scan line contributes to the scaled output.
    paint_line: bool,
}

pub struct RasterEngine {
    width: usize,
    height: usize,
    scaled_width: usize,
    scaled_height: usize,
    commit: PixelCommit,
    cursor: PixelCursor,
    saved_cursor: PixelCursor,
    saved_row_acc: u32,
    /// Vertical fixed-point accumulator; `row_acc >> 10` is the output row.
    row_acc: u32,
    pixels: Vec<u32>,
    scaled: Vec<u32>,
    dirty: Vec<u64>,
    border_color: u32,
    frame: u64,
    events: EventBus<VideoEvent>,
}

impl RasterEngine {
    /// Create an engine for a `width` x `height` raster, down-scaled by
    /// `scale` in `(0, 1]`. Out-of-range scales fall back to 1.
    pub fn new(width: usize, height: usize, scale: f64) -> Self {
        let scale = if scale.is_finite() && scale > 0.0 && scale <= 1.0 {
            scale
        } else {
            log::warn!("invalid scale factor {scale}, using 1.0");
            1.0
        };
        let step = ((scale * f64::from(FRAC_ONE)).round() as u32).clamp(1, FRAC_ONE);
        let commit = if step == FRAC_ONE {
            PixelCommit::Direct
        } else {
            PixelCommit::Blend
        };
        let (scaled_width, scaled_height) = match commit {
            PixelCommit::Direct => (width, height),
            // One output pixel per fractional wrap of the cursor.
            PixelCommit::Blend => (
                (width as u32 * step >> FRAC_BITS) as usize,
                (height as u32 * step >> FRAC_BITS) as usize,
            ),
        };
        let cursor = PixelCursor {
            index: 0,
            scaled_index: 0,
            step,
            line_frac: 0,
            paint_line: commit == PixelCommit::Direct,
        };
        Self {
            width,
            height,
            scaled_width,
            scaled_height,
            commit,
            cursor,
            saved_cursor: cursor,
            saved_row_acc: 0,
            row_acc: 0,
            pixels: vec![BLACK; width * height],
            scaled: vec![BLACK; scaled_width * scaled_height],
            dirty: vec![DIRTY_UNKNOWN; scaled_height * DIRTY_COLS],
            border_color: BLACK,
            frame: 0,
            events: EventBus::new(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn scaled_width(&self) -> usize {
        self.scaled_width
    }

    pub fn scaled_height(&self) -> usize {
        self.scaled_height
    }

    pub fn commit_strategy(&self) -> PixelCommit {
        self.commit
    }

    /// Completed frames since construction or reset.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn cursor(&self) -> PixelCursor {
        self.cursor
    }

    /// The full-resolution pixel buffer, row-major ARGB8888.
    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    /// The scaled output buffer, row-major ARGB8888.
    pub fn scaled(&self) -> &[u32] {
        &self.scaled
    }

    pub fn border_color(&self) -> u32 {
        self.border_color
    }

    /// Subscribe to frame-ready and border-color-changed notifications.
    pub fn subscribe(&mut self, listener: impl Fn(&VideoEvent) + Send + 'static) {
        self.events.subscribe(listener);
    }

    /// Set the border color, notifying subscribers only on an actual change.
    pub fn set_border_color(&mut self, color: u32) {
        if color != self.border_color {
            self.border_color = color;
            self.events.emit(&VideoEvent::BorderColorChanged { color });
        }
    }

    /// Emit one pixel at the current cursor and advance by one raster cycle.
    ///
    /// Called exactly once per video-chip cycle that lands in the visible or
    /// border region. Wraps to the next frame automatically after the last
    /// pixel of the raster.
    pub fn emit_pixel(&mut self, color: u32) {
        let idx = self.cursor.index;

        match self.commit {
            PixelCommit::Direct => {
                // Same geometry on both buffers, no blend math.
                self.scaled[idx] = color;
            }
            PixelCommit::Blend => {
                if self.cursor.paint_line {
                    let frac_x = self.cursor.scaled_index & FRAC_MASK;
                    if frac_x + self.cursor.step >= FRAC_ONE {
                        let dest = (self.cursor.scaled_index >> FRAC_BITS) as usize;
                        let blended = self.blend(idx, color, frac_x, self.cursor.line_frac);
                        if dest < self.scaled.len() {
                            self.scaled[dest] = blended;
                        }
                    }
                }
            }
        }

        // A changed pixel invalidates the dirty cells that depend on it: the
        // cell at the current output row, and the one below it, whose blend
        // samples reach back into this row.
        if self.pixels[idx] != color {
            let x = idx % self.width;
            let row = (self.row_acc >> FRAC_BITS) as usize;
            let col = x * DIRTY_COLS / self.width;
            self.invalidate_dirty(row, col);
            self.invalidate_dirty(row + 1, col);
        }

        self.pixels[idx] = color;
        self.advance();
    }

    /// Bilinear blend of the 2x2 neighborhood ending at `idx`.
    ///
    /// The four corner weights are products of the complementary fractions,
    /// renormalized by the fixed-point shift; the fourth weight is computed as
    /// the remainder so the weights always sum to exactly one unit. Identical
    /// corner colors therefore blend to exactly that color.
    fn blend(&self, idx: usize, color: u32, frac_x: u32, frac_y: u32) -> u32 {
        let x = idx % self.width;
        let y = idx / self.width;
        // Clamp at the raster origin: the first row and column have no
        // neighbor above or to the left.
        let left = if x == 0 { idx } else { idx - 1 };
        let above = if y == 0 { idx } else { idx - self.width };
        let above_left = if x == 0 { above } else { above - 1 };

        let c00 = self.pixels[above_left];
        let c01 = self.pixels[above];
        let c10 = self.pixels[left];
        let c11 = color;

        let w00 = ((FRAC_ONE - frac_x) * (FRAC_ONE - frac_y)) >> FRAC_BITS;
        let w01 = (frac_x * (FRAC_ONE - frac_y)) >> FRAC_BITS;
        let w10 = ((FRAC_ONE - frac_x) * frac_y) >> FRAC_BITS;
        let w11 = FRAC_ONE - w00 - w01 - w10;

        let mut out = 0u32;
        for shift in [0u32, 8, 16, 24] {
            let ch = ((c00 >> shift & 0xFF) * w00
                + (c01 >> shift & 0xFF) * w01
                + (c10 >> shift & 0xFF) * w10
                + (c11 >> shift & 0xFF) * w11)
                >> FRAC_BITS;
            out |= (ch & 0xFF) << shift;
        }
        out
    }

    fn advance(&mut self) {
        self.cursor.index += 1;
        self.cursor.scaled_index += self.cursor.step;
        if self.cursor.index % self.width == 0 {
            if self.cursor.index == self.pixels.len() {
                self.finish_frame();
            } else {
                self.begin_line();
            }
        }
    }

    fn begin_line(&mut self) {
        self.row_acc += self.cursor.step;
        let frac = self.row_acc & FRAC_MASK;
        self.cursor.line_frac = frac;
        self.cursor.paint_line = match self.commit {
            PixelCommit::Direct => true,
            // The line contributes when advancing past it wraps the vertical
            // fraction, finalizing one scaled row.
            PixelCommit::Blend => frac + self.cursor.step >= FRAC_ONE,
        };
        // Restart the scaled cursor at this line's output row so its
        // fractional bits track the horizontal position only.
        self.cursor.scaled_index =
            (self.row_acc >> FRAC_BITS) * (self.scaled_width as u32) << FRAC_BITS;
    }

    fn finish_frame(&mut self) {
        self.frame += 1;
        self.cursor.index = 0;
        self.cursor.scaled_index = 0;
        self.cursor.line_frac = 0;
        self.cursor.paint_line = self.commit == PixelCommit::Direct;
        self.row_acc = 0;
        let frame = self.frame;
        self.events.emit(&VideoEvent::FrameReady { frame });
    }

    /// Save the complete cursor before a speculative pass over the scan line.
    pub fn save_cursor(&mut self) {
        self.saved_cursor = self.cursor;
        self.saved_row_acc = self.row_acc;
    }

    /// Restore every cursor field saved by [`save_cursor`](Self::save_cursor).
    pub fn restore_cursor(&mut self) {
        self.cursor = self.saved_cursor;
        self.row_acc = self.saved_row_acc;
    }

    /// Clear both pixel buffers and the dirty cache to their initial state.
    pub fn reset(&mut self) {
        self.pixels.fill(BLACK);
        self.scaled.fill(BLACK);
        self.dirty.fill(DIRTY_UNKNOWN);
        self.cursor.index = 0;
        self.cursor.scaled_index = 0;
        self.cursor.line_frac = 0;
        self.cursor.paint_line = self.commit == PixelCommit::Direct;
        self.row_acc = 0;
        self.frame = 0;
    }

    /// True when the renderer must repaint the cell: its cached color is
    /// unknown or differs from `color`.
    pub fn needs_repaint(&self, row: usize, col: usize, color: u32) -> bool {
        match self.dirty_cell(row, col) {
            Some(cached) => cached != color,
            None => true,
        }
    }

    /// The cached last-painted color of a cell, or `None` if unknown.
    pub fn dirty_cell(&self, row: usize, col: usize) -> Option<u32> {
        let cell = self.dirty[row * DIRTY_COLS + col];
        if cell == DIRTY_UNKNOWN {
            None
        } else {
            Some(cell as u32)
        }
    }

    /// Record that the renderer painted `color` into the given cell.
    pub fn mark_painted(&mut self, row: usize, col: usize, color: u32) {
        self.dirty[row * DIRTY_COLS + col] = u64::from(color);
    }

    fn invalidate_dirty(&mut self, row: usize, col: usize) {
        if row < self.scaled_height {
            self.dirty[row * DIRTY_COLS + col] = DIRTY_UNKNOWN;
        }
    }
}

impl Snapshot for RasterEngine {
    fn save(&self, w: &mut SnapshotWriter) {
        // The pixel buffers and dirty cache are derived state, rebuilt by the
        // forced repaint after a restore; only the cursors are persisted.
        w.write_u32(self.cursor.index as u32);
        w.write_u32(self.cursor.scaled_index);
        w.write_u32(self.cursor.step);
        w.write_u32(self.cursor.line_frac);
        w.write_bool(self.cursor.paint_line);
        w.write_u32(self.row_acc);
        w.write_u32(self.border_color);
        w.write_u64(self.frame);
    }

    fn restore(&mut self, r: &mut SnapshotReader<'_>) -> Result<(), SnapshotError> {
        let index = r.read_u32()? as usize;
        let scaled_index = r.read_u32()?;
        let step = r.read_u32()?;
        let line_frac = r.read_u32()?;
        let paint_line = r.read_bool()?;
        let row_acc = r.read_u32()?;
        let border_color = r.read_u32()?;
        let frame = r.read_u64()?;

        if index >= self.pixels.len() {
            return Err(SnapshotError::FieldOutOfRange {
                field: "cursor.index",
                value: index as u64,
            });
        }
        if step != self.cursor.step {
            // Streams from a differently-scaled machine cannot be applied.
            return Err(SnapshotError::FieldOutOfRange {
                field: "cursor.step",
                value: u64::from(step),
            });
        }

        self.cursor = PixelCursor {
            index,
            scaled_index,
            step,
            line_frac,
            paint_line,
        };
        self.saved_cursor = self.cursor;
        self.row_acc = row_acc;
        self.saved_row_acc = row_acc;
        self.border_color = border_color;
        self.frame = frame;
        // Derived buffers restart from scratch; the next full frame repaints.
        self.pixels.fill(BLACK);
        self.scaled.fill(BLACK);
        self.dirty.fill(DIRTY_UNKNOWN);
        Ok(())
    }
}
