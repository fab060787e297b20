// this_file: src/script.rs

//! Headless event scripts and JSONL frame output.
//!
//! A script is a JSON document listing input events; replaying it renders
//! one frame before the first event and one after each event, emitting a
//! [`FrameReport`] per frame as a single JSON line.

use crate::canvas::{Canvas, ShutdownReport};
use crate::config::{
    CanvasConfig, ViewConfig, MAX_EVENTS_PER_SCRIPT, MAX_JSON_SIZE, MAX_POINTER_COORD,
};
use crate::error::{Error, Result};
use crate::scene::{Control, FrameReport, InputEvent, Scene, View};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{ImageFormat, RgbaImage};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Write};
use std::time::Duration;

/// Script format version accepted by [`EventScript::validate`]
pub const SCRIPT_VERSION: &str = "1.0";

/// A recorded or hand-written input session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventScript {
    /// Format version (must be "1.0")
    pub version: String,
    /// Starting view; defaults apply where absent
    #[serde(default)]
    pub view: Option<ViewConfig>,
    /// Events in the order they are delivered
    #[serde(default)]
    pub events: Vec<InputEvent>,
}

impl EventScript {
    /// Parse and validate a script.
    pub fn parse(json: &str) -> Result<Self> {
        if json.len() > MAX_JSON_SIZE {
            return Err(Error::InvalidScript {
                reason: format!(
                    "Script too large: {} bytes (max: {} bytes)",
                    json.len(),
                    MAX_JSON_SIZE
                ),
            });
        }
        let script: Self = serde_json::from_str(json)?;
        script.validate()?;
        Ok(script)
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != SCRIPT_VERSION {
            return Err(Error::InvalidScript {
                reason: format!(
                    "Unsupported script version '{}', expected '{}'",
                    self.version, SCRIPT_VERSION
                ),
            });
        }
        if self.events.len() > MAX_EVENTS_PER_SCRIPT {
            return Err(Error::InvalidScript {
                reason: format!(
                    "Too many events: {} (max: {})",
                    self.events.len(),
                    MAX_EVENTS_PER_SCRIPT
                ),
            });
        }
        if let Some(view) = &self.view {
            view.validate().map_err(|e| Error::InvalidScript {
                reason: e.to_string(),
            })?;
        }
        for (index, event) in self.events.iter().enumerate() {
            let (x, y) = match *event {
                InputEvent::PointerDown { x, y } | InputEvent::PointerUp { x, y } => (x, y),
                InputEvent::Quit | InputEvent::Key { .. } => continue,
            };
            let in_range = |v: f64| v.is_finite() && v.abs() <= MAX_POINTER_COORD;
            if !(in_range(x) && in_range(y)) {
                return Err(Error::InvalidScript {
                    reason: format!(
                        "Event {} has pointer position ({}, {}) outside +/-{}",
                        index, x, y, MAX_POINTER_COORD
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Replay knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayOptions {
    /// Attach a base64 PNG of each presented frame to its report
    pub embed_frames: bool,
    /// Wait this long for outstanding tiles before each frame
    pub settle: Option<Duration>,
}

/// What a replay produced.
#[derive(Debug)]
pub struct ReplayOutcome {
    pub frames: usize,
    /// Last image successfully presented
    pub last_image: Option<RgbaImage>,
    pub shutdown: ShutdownReport,
}

/// Encode an image as PNG bytes.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

/// Encode an image as base64 PNG.
pub fn encode_png_base64(image: &RgbaImage) -> Result<String> {
    Ok(STANDARD.encode(encode_png(image)?))
}

/// Write one report as a JSON line.
pub fn write_report<W: Write>(out: &mut W, report: &FrameReport) -> Result<()> {
    serde_json::to_writer(&mut *out, report)?;
    out.write_all(b"\n")?;
    Ok(())
}

/// Drive a fresh canvas through `script`, writing a JSONL report per frame.
pub fn replay<W: Write>(
    script: &EventScript,
    config: &CanvasConfig,
    options: ReplayOptions,
    out: &mut W,
) -> Result<ReplayOutcome> {
    script.validate()?;
    let view = View::from_config(config, script.view.as_ref());
    let mut canvas = Canvas::new(config, view.origin, view.scale)?;
    let mut scene = Scene::new(view, config.tile_size);
    let mut last_image = None;

    info!("Replaying {} events", script.events.len());
    let mut events = script.events.iter();
    loop {
        if let Some(settle) = options.settle {
            canvas.wait_idle(settle);
        }
        let frame = scene.frame(&mut canvas)?;
        let mut report = frame.report;
        if let Some(image) = frame.image {
            if options.embed_frames {
                report.png_base64 = Some(encode_png_base64(&image)?);
            }
            last_image = Some(image);
        }
        write_report(out, &report)?;

        let Some(event) = events.next() else {
            break;
        };
        debug!("Event {:?}", event);
        if scene.handle(*event) == Control::Quit {
            break;
        }
    }
    out.flush()?;

    let shutdown = canvas.shutdown()?;
    Ok(ReplayOutcome {
        frames: scene.frames(),
        last_image,
        shutdown,
    })
}
