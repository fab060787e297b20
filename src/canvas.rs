// this_file: src/canvas.rs

//! Pipeline controller.
//!
//! A [`Canvas`] owns the tile grid, the pixel buffer, and the three queues
//! that connect it to its workers. Only the controller (the thread holding
//! the canvas) regenerates the grid, composites, presents, or shuts the
//! pipeline down; workers only ever see the queues.

use crate::bufpool::{BufferPool, PoolStats};
use crate::compositor::{CompletionQueue, DrainStats, PixelBuffer};
use crate::config::CanvasConfig;
use crate::error::{Error, Result};
use crate::grid::{PlanePoint, PlaneRect, TexelRect, TileGrid};
use crate::work_queue::{Submission, WorkItem, WorkQueue};
use crate::worker::{CancelToken, WorkerContext, WorkerPool};
use image::{Rgba, RgbaImage};
use log::{debug, info, trace, warn};
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Outcome of shutting the pipeline down.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ShutdownReport {
    /// Tiles each worker computed over its lifetime
    pub tiles_per_worker: Vec<usize>,
    /// Work items still queued when the pipeline closed
    pub abandoned: usize,
    /// Completed tiles never composited
    pub uncomposited: usize,
}

/// Incremental fractal canvas: grid + pixel buffer + worker pipeline.
pub struct Canvas {
    config: CanvasConfig,
    grid: TileGrid,
    pixels: PixelBuffer,
    work: Arc<WorkQueue>,
    pool: BufferPool,
    completions: Arc<CompletionQueue>,
    cancel: CancelToken,
    workers: Option<WorkerPool>,
    outstanding: usize,
}

impl Canvas {
    /// Build the pipeline for `config` at a fixed `scale` and start its
    /// workers. The grid is positioned for `view_origin` but nothing is
    /// requested until the first [`generate`](Self::generate).
    pub fn new(config: &CanvasConfig, view_origin: PlanePoint, scale: f64) -> Result<Self> {
        config.validate()?;
        let (cols, rows) = TileGrid::dims_for_viewport(config.width, config.height, config.tile_size);
        let mut grid = TileGrid::new(cols, rows, config.tile_size, scale)?;
        grid.set_origin(view_origin)?;
        let pixels = PixelBuffer::new(grid.texel_width(), grid.texel_height())?;
        let pool = BufferPool::new(config.pool_capacity, config.tile_size)?;
        let work = Arc::new(WorkQueue::new());
        let completions = Arc::new(CompletionQueue::new());
        let cancel = CancelToken::new();

        let ctx = WorkerContext {
            work: Arc::clone(&work),
            pool: pool.clone(),
            completions: Arc::clone(&completions),
            cancel: cancel.clone(),
            max_iterations: config.max_iterations,
            stride: grid.texel_width(),
        };
        let workers = WorkerPool::spawn(config.resolved_workers(), ctx)?;

        info!(
            "Canvas {}x{} tiles of {} texels, {} workers, pool of {}",
            cols,
            rows,
            config.tile_size,
            workers.len(),
            config.pool_capacity
        );
        Ok(Self {
            config: config.clone(),
            grid,
            pixels,
            work,
            pool,
            completions,
            cancel,
            workers: Some(workers),
            outstanding: 0,
        })
    }

    pub fn config(&self) -> &CanvasConfig {
        &self.config
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn pixels(&self) -> &PixelBuffer {
        &self.pixels
    }

    /// Plane units per pixel.
    pub fn scale(&self) -> f64 {
        self.grid.scale()
    }

    /// Reposition the grid for `view_origin` and queue every tile that no
    /// longer matches its slot. Returns how many were queued or replaced.
    pub fn generate(&mut self, view_origin: PlanePoint) -> Result<usize> {
        let requests = self.grid.regenerate(view_origin)?;
        let submitted = requests.len();
        for request in requests {
            match self.work.submit(WorkItem::from(request))? {
                Submission::Queued => self.outstanding += 1,
                Submission::Replaced => {}
            }
        }
        if submitted > 0 {
            debug!(
                "Submitted {} tiles, origin tile ({}, {})",
                submitted,
                self.grid.origin_tile().x,
                self.grid.origin_tile().y
            );
        }
        Ok(submitted)
    }

    /// Composite every finished tile that is ready. Never blocks on workers.
    pub fn composite(&mut self) -> DrainStats {
        let grid = &self.grid;
        let stats = self
            .completions
            .drain_ready(&mut self.pixels.lock(), self.config.max_iterations, |item| {
                grid.is_current(item.slot, item.origin, item.scale)
            });
        self.outstanding = self.outstanding.saturating_sub(stats.total());
        if stats.total() > 0 {
            trace!("Composited {} tiles, {} stale", stats.composited, stats.stale);
        }
        stats
    }

    /// Copy the part of the pixel buffer covering `rect` into a new image.
    pub fn present(&self, rect: PlaneRect) -> Result<RgbaImage> {
        let texels = self.project(rect)?;
        let start = self.grid.wrap_texel(texels.x, texels.y);
        self.pixels.copy_rect(start, texels.width, texels.height)
    }

    fn project(&self, rect: PlaneRect) -> Result<TexelRect> {
        self.grid.project(rect).map_err(|bounds| {
            for edge in bounds.edges() {
                warn!("View rectangle out of bounds: {}", edge);
            }
            Error::OutOfBounds(bounds)
        })
    }

    /// The whole backing buffer, unwrapped so the grid's top-left tile sits
    /// at the top-left, with `rect` outlined in red when it projects inside.
    pub fn dump(&self, rect: PlaneRect) -> Result<RgbaImage> {
        let start = self.grid.wrap_texel(0, 0);
        let mut image =
            self.pixels
                .copy_rect(start, self.grid.texel_width(), self.grid.texel_height())?;
        if let Ok(texels) = self.project(rect) {
            outline(&mut image, texels, Rgba([255, 0, 0, 255]));
        }
        Ok(image)
    }

    /// Tiles queued or in flight that have not been composited yet.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Buffer pool occupancy.
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Composite repeatedly until nothing is outstanding or `timeout`
    /// elapses. Returns whether the canvas went idle.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.composite();
            if self.outstanding == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                warn!("Still {} tiles outstanding after {:?}", self.outstanding, timeout);
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Stop the workers and release the pipeline.
    pub fn shutdown(mut self) -> Result<ShutdownReport> {
        self.close()
    }

    fn close(&mut self) -> Result<ShutdownReport> {
        let Some(workers) = self.workers.take() else {
            return Ok(ShutdownReport::default());
        };
        debug!("Shutting down canvas pipeline");
        self.cancel.cancel();
        let abandoned = self.work.len();
        self.work.close();
        self.pool.close();
        let uncomposited = self.completions.len();
        self.completions.close();
        let tiles_per_worker = workers.join()?;
        debug!("Workers joined: {:?}", tiles_per_worker);
        self.outstanding = 0;
        Ok(ShutdownReport {
            tiles_per_worker,
            abandoned,
            uncomposited,
        })
    }
}

impl Drop for Canvas {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Canvas shutdown failed: {}", e);
        }
    }
}

fn outline(image: &mut RgbaImage, rect: TexelRect, color: Rgba<u8>) {
    if rect.width == 0 || rect.height == 0 {
        return;
    }
    let (x0, y0) = (rect.x as u32, rect.y as u32);
    let (x1, y1) = (x0 + rect.width as u32 - 1, y0 + rect.height as u32 - 1);
    for x in x0..=x1 {
        for y in [y0, y1] {
            if let Some(px) = image.get_pixel_mut_checked(x, y) {
                *px = color;
            }
        }
    }
    for y in y0..=y1 {
        for x in [x0, x1] {
            if let Some(px) = image.get_pixel_mut_checked(x, y) {
                *px = color;
            }
        }
    }
}
