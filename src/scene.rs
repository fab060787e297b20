// this_file: src/scene.rs

//! View state, input handling, and the per-frame generate / composite /
//! present sequence.

use crate::canvas::Canvas;
use crate::config::{CanvasConfig, ViewConfig, MAX_PLANE_COORD};
use crate::error::{Error, Result};
use crate::grid::{PlanePoint, PlaneRect};
use crate::logging::Timer;
use image::RgbaImage;
use log::{debug, info};
use serde::{Deserialize, Serialize};

/// What part of the plane is on screen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct View {
    /// Plane coordinate of the top-left pixel
    pub origin: PlanePoint,
    /// Plane units per pixel
    pub scale: f64,
    pub width: usize,
    pub height: usize,
}

impl Default for View {
    fn default() -> Self {
        Self {
            origin: PlanePoint::new(-2.0, 1.0),
            scale: 0.003,
            width: 800,
            height: 600,
        }
    }
}

impl View {
    /// View sized by `config`, positioned by `start` where given.
    pub fn from_config(config: &CanvasConfig, start: Option<&ViewConfig>) -> Self {
        let base = Self {
            width: config.width,
            height: config.height,
            ..Self::default()
        };
        match start {
            Some(start) => Self {
                origin: start.origin.unwrap_or(base.origin),
                scale: start.scale.unwrap_or(base.scale),
                ..base
            },
            None => base,
        }
    }

    /// Plane rectangle covered by the viewport.
    pub fn rect(&self) -> PlaneRect {
        PlaneRect {
            re: self.origin.re,
            im: self.origin.im,
            width: self.width as f64 * self.scale,
            height: self.height as f64 * self.scale,
        }
    }

    /// Move the view by a pixel delta. Positive `dx` looks right, positive
    /// `dy` looks down. The origin stays within [`MAX_PLANE_COORD`] on each
    /// axis; non-finite deltas are ignored.
    pub fn pan_pixels(&mut self, dx: f64, dy: f64) {
        if !(dx.is_finite() && dy.is_finite()) {
            return;
        }
        let clamp = |v: f64| v.clamp(-MAX_PLANE_COORD, MAX_PLANE_COORD);
        self.origin.re = clamp(self.origin.re + dx * self.scale);
        self.origin.im = clamp(self.origin.im - dy * self.scale);
    }
}

/// Keys the scene reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Key {
    Escape,
    Left,
    Right,
    Up,
    Down,
    #[serde(other)]
    Other,
}

/// One input event, in window pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    Quit,
    PointerDown { x: f64, y: f64 },
    PointerUp { x: f64, y: f64 },
    Key { key: Key },
}

/// Whether the event loop keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Quit,
}

/// Per-stage wall time of one frame, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FrameTiming {
    pub generate_ms: f64,
    pub composite_ms: f64,
    pub present_ms: f64,
    pub total_ms: f64,
}

/// Summary of one frame (one JSONL line in replay output).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameReport {
    pub frame: usize,
    /// Tiles queued or replaced by this frame's regeneration
    pub submitted: usize,
    pub composited: usize,
    pub stale: usize,
    /// Tiles still queued or in flight after compositing
    pub outstanding: usize,
    /// Whether the view could be presented
    pub presented: bool,
    /// Edges crossed when the view could not be presented
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub out_of_bounds: Vec<String>,
    pub origin: PlanePoint,
    pub timing: FrameTiming,
    /// Base64 PNG of the presented frame, when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub png_base64: Option<String>,
}

/// A frame's report plus the presented image, if any.
#[derive(Debug)]
pub struct Frame {
    pub report: FrameReport,
    pub image: Option<RgbaImage>,
}

/// Interactive state driving a [`Canvas`].
#[derive(Debug, Clone)]
pub struct Scene {
    view: View,
    tile_size: usize,
    pointer_down: Option<(f64, f64)>,
    frames: usize,
}

impl Scene {
    pub fn new(view: View, tile_size: usize) -> Self {
        Self {
            view,
            tile_size,
            pointer_down: None,
            frames: 0,
        }
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    /// Frames rendered so far.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Apply one input event to the view.
    pub fn handle(&mut self, event: InputEvent) -> Control {
        match event {
            InputEvent::Quit | InputEvent::Key { key: Key::Escape } => {
                info!("Quit requested");
                return Control::Quit;
            }
            InputEvent::PointerDown { x, y } => self.pointer_down = Some((x, y)),
            InputEvent::PointerUp { x, y } => {
                if let Some((down_x, down_y)) = self.pointer_down.take() {
                    // Content follows the pointer.
                    self.view.pan_pixels(down_x - x, down_y - y);
                    debug!("Drag panned view to ({}, {})", self.view.origin.re, self.view.origin.im);
                }
            }
            InputEvent::Key { key } => {
                let step = self.tile_size as f64;
                match key {
                    Key::Left => self.view.pan_pixels(-step, 0.0),
                    Key::Right => self.view.pan_pixels(step, 0.0),
                    Key::Up => self.view.pan_pixels(0.0, -step),
                    Key::Down => self.view.pan_pixels(0.0, step),
                    Key::Escape | Key::Other => {}
                }
            }
        }
        Control::Continue
    }

    /// Run one frame: regenerate, composite what is ready, present the view.
    /// A view that falls outside the cached region is reported, not fatal.
    pub fn frame(&mut self, canvas: &mut Canvas) -> Result<Frame> {
        let total = Timer::new(format!("frame {}", self.frames));

        let stage = Timer::new("generate");
        let submitted = canvas.generate(self.view.origin)?;
        let generate_ms = stage.elapsed_ms();
        drop(stage);

        let stage = Timer::new("composite");
        let drained = canvas.composite();
        let composite_ms = stage.elapsed_ms();
        drop(stage);

        let stage = Timer::new("present");
        let (image, out_of_bounds) = match canvas.present(self.view.rect()) {
            Ok(image) => (Some(image), Vec::new()),
            Err(Error::OutOfBounds(bounds)) => {
                (None, bounds.edges().into_iter().map(String::from).collect())
            }
            Err(e) => return Err(e),
        };
        let present_ms = stage.elapsed_ms();
        drop(stage);

        let report = FrameReport {
            frame: self.frames,
            submitted,
            composited: drained.composited,
            stale: drained.stale,
            outstanding: canvas.outstanding(),
            presented: image.is_some(),
            out_of_bounds,
            origin: self.view.origin,
            timing: FrameTiming {
                generate_ms,
                composite_ms,
                present_ms,
                total_ms: total.elapsed_ms(),
            },
            png_base64: None,
        };
        self.frames += 1;
        Ok(Frame { report, image })
    }
}
