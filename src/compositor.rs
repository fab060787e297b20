// this_file: src/compositor.rs

//! Finished tiles and the shared pixel buffer they are merged into.
//!
//! Workers push [`CompletionItem`]s; once per frame the controller drains
//! whatever is ready under a single [`PixelLock`], writes each tile as
//! opaque grayscale, and drops the item, which returns its buffer to the
//! pool. Draining never blocks on outstanding compute.

use crate::bufpool::PooledBuffer;
use crate::error::{Error, Result};
use crate::grid::{PlanePoint, SlotIndex, TexelPoint};
use crate::iterate::intensity;
use crate::queue::{ControlledQueue, SendError};
use crate::work_queue::WorkItem;
use image::RgbaImage;
use log::{trace, warn};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Bytes per texel (RGBA8)
pub const BYTES_PER_TEXEL: usize = 4;

/// A computed tile waiting to be composited.
#[derive(Debug)]
pub struct CompletionItem {
    pub slot: SlotIndex,
    pub origin: PlanePoint,
    pub scale: f64,
    /// Top-left texel of the destination slot
    pub dest: TexelPoint,
    /// Texels per row of the destination pixel buffer
    pub stride: usize,
    pub buffer: PooledBuffer,
}

impl CompletionItem {
    pub fn new(work: WorkItem, stride: usize, buffer: PooledBuffer) -> Self {
        Self {
            slot: work.slot,
            origin: work.origin,
            scale: work.scale,
            dest: work.dest,
            stride,
            buffer,
        }
    }
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainStats {
    /// Tiles written into the pixel buffer
    pub composited: usize,
    /// Tiles discarded because their slot has since been reassigned
    pub stale: usize,
}

impl DrainStats {
    /// Every completion consumed, composited or not.
    pub fn total(&self) -> usize {
        self.composited + self.stale
    }
}

/// RGBA8 backing store for every tile slot, row-major, alpha always 255.
#[derive(Debug)]
pub struct PixelBuffer {
    width: usize,
    height: usize,
    data: Mutex<Vec<u8>>,
}

impl PixelBuffer {
    /// Allocate an opaque black `width` x `height` buffer.
    pub fn new(width: usize, height: usize) -> Result<Self> {
        let bytes = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(BYTES_PER_TEXEL))
            .ok_or(Error::Allocation { bytes: usize::MAX })?;
        let mut data = Vec::new();
        data.try_reserve_exact(bytes)
            .map_err(|_| Error::Allocation { bytes })?;
        for _ in 0..width * height {
            data.extend_from_slice(&[0, 0, 0, 255]);
        }
        Ok(Self {
            width,
            height,
            data: Mutex::new(data),
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Copy a wrapped region starting at backing texel `start` into a new image.
    pub fn copy_rect(&self, start: TexelPoint, width: usize, height: usize) -> Result<RgbaImage> {
        self.lock().copy_wrapped(start, width, height)
    }

    /// Exclusive access until the returned guard drops.
    pub fn lock(&self) -> PixelLock<'_> {
        PixelLock {
            width: self.width,
            height: self.height,
            data: self.data.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

/// Scoped exclusive access to a [`PixelBuffer`].
pub struct PixelLock<'a> {
    width: usize,
    height: usize,
    data: MutexGuard<'a, Vec<u8>>,
}

impl<'a> PixelLock<'a> {
    /// Raw RGBA bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// RGBA value at (x, y).
    pub fn pixel(&self, x: usize, y: usize) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y * self.width + x) * BYTES_PER_TEXEL;
        let px = self.data.get(i..i + BYTES_PER_TEXEL)?;
        Some([px[0], px[1], px[2], px[3]])
    }

    /// Write a finished tile as grayscale at its destination. Returns
    /// `false` (writing nothing) if the tile does not fit.
    pub fn write_tile(&mut self, item: &CompletionItem, max_it: u32) -> bool {
        let side = item.buffer.side();
        let stride = item.stride;
        let fits = item.dest.x + side <= stride
            && (item.dest.y + side) * stride * BYTES_PER_TEXEL <= self.data.len();
        if !fits {
            warn!(
                "Tile for slot {:?} at ({}, {}) does not fit a {}-texel stride buffer",
                item.slot, item.dest.x, item.dest.y, stride
            );
            return false;
        }
        for y in 0..side {
            let Some(counts) = item.buffer.row(y) else {
                continue;
            };
            let start = ((item.dest.y + y) * stride + item.dest.x) * BYTES_PER_TEXEL;
            let row = &mut self.data[start..start + side * BYTES_PER_TEXEL];
            for (px, &count) in row.chunks_exact_mut(BYTES_PER_TEXEL).zip(counts) {
                let v = intensity(count, max_it);
                px.copy_from_slice(&[v, v, v, 255]);
            }
        }
        true
    }

    /// Copy a `width` x `height` region whose top-left texel is `start`,
    /// wrapping around the buffer edges, into a new image.
    pub fn copy_wrapped(&self, start: TexelPoint, width: usize, height: usize) -> Result<RgbaImage> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidConfig("Pixel buffer is empty".into()));
        }
        let mut out = Vec::new();
        let bytes = width * height * BYTES_PER_TEXEL;
        out.try_reserve_exact(bytes)
            .map_err(|_| Error::Allocation { bytes })?;
        for y in 0..height {
            let sy = (start.y + y) % self.height;
            let mut x = 0;
            while x < width {
                let sx = (start.x + x) % self.width;
                // Longest run before the right edge wraps.
                let run = (width - x).min(self.width - sx);
                let i = (sy * self.width + sx) * BYTES_PER_TEXEL;
                out.extend_from_slice(&self.data[i..i + run * BYTES_PER_TEXEL]);
                x += run;
            }
        }
        RgbaImage::from_raw(width as u32, height as u32, out)
            .ok_or(Error::Allocation { bytes })
    }
}

/// Finished tiles on their way back to the controller.
#[derive(Debug, Default)]
pub struct CompletionQueue {
    queue: ControlledQueue<CompletionItem>,
}

impl CompletionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand a finished tile to the controller. Fails once closed.
    pub fn send(&self, item: CompletionItem) -> std::result::Result<(), SendError<CompletionItem>> {
        self.queue.send(item)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Close the queue; queued tiles are dropped and their buffers released.
    pub fn close(&self) -> bool {
        self.queue.close()
    }

    /// Composite every tile that is ready right now, then stop.
    ///
    /// `is_current` decides whether a tile still matches its slot; tiles
    /// that do not are discarded.
    pub fn drain_ready<F>(&self, pixels: &mut PixelLock<'_>, max_it: u32, mut is_current: F) -> DrainStats
    where
        F: FnMut(&CompletionItem) -> bool,
    {
        let mut stats = DrainStats::default();
        while let Ok(Some(item)) = self.queue.try_recv() {
            if is_current(&item) {
                if pixels.write_tile(&item, max_it) {
                    stats.composited += 1;
                } else {
                    stats.stale += 1;
                }
            } else {
                trace!("Discarding stale tile for slot {:?}", item.slot);
                stats.stale += 1;
            }
            item.buffer.release();
        }
        stats
    }
}
