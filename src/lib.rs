// this_file: src/lib.rs
//! mandelpan - incremental, pannable Mandelbrot rendering
//!
//! The view is backed by a toroidal grid of cached tiles. Panning only
//! recomputes the strip of tiles that scrolled into view:
//! - `grid` decides which slots are stale and where they live in the pixel buffer
//! - `work_queue` collapses repeated requests for a slot into one
//! - `worker` threads fill tiles into buffers leased from `bufpool`
//! - `compositor` merges finished tiles into the pixel buffer each frame
//! - `canvas` and `scene` drive the whole thing frame by frame

pub mod bufpool;
pub mod canvas;
pub mod compositor;
pub mod config;
pub mod error;
pub mod grid;
pub mod iterate;
pub mod logging;
pub mod queue;
pub mod reference;
pub mod scene;
pub mod script;
pub mod work_queue;
pub mod worker;

// Re-export commonly used types
pub use canvas::{Canvas, ShutdownReport};
pub use config::{CanvasConfig, ViewConfig};
pub use error::{Error, Result};
pub use grid::{PlanePoint, PlaneRect, TileGrid};
pub use scene::{Control, FrameReport, InputEvent, Key, Scene, View};
pub use script::{EventScript, ReplayOptions};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
