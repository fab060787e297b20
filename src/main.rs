// this_file: src/main.rs
//! mandelpan CLI - render and replay pannable Mandelbrot views

use anyhow::{bail, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};
use mandelpan::reference::render_direct;
use mandelpan::script::{encode_png, replay, ReplayOptions};
use mandelpan::{logging, Canvas, CanvasConfig, EventScript, PlanePoint, View, ViewConfig};
use serde::Serialize;
use std::io::{self, Read};
use std::time::Duration;

/// mandelpan - incremental, tile-cached Mandelbrot renderer
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Set log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long, global = true, default_value = logging::default_level())]
    log_level: String,

    /// Enable quiet mode (only errors)
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render one view to a PNG
    Render {
        /// Output PNG path
        #[arg(short, long)]
        output: Utf8PathBuf,

        /// Plane coordinate of the top-left pixel, as "re,im"
        #[arg(long, value_parser = parse_point, allow_hyphen_values = true)]
        origin: Option<PlanePoint>,

        /// Plane units per pixel
        #[arg(long)]
        scale: Option<f64>,

        /// Compute every pixel directly instead of through the tile pipeline
        #[arg(long)]
        direct: bool,

        /// Also write the whole tile cache, view outlined, to this PNG
        #[arg(long, conflicts_with = "direct")]
        dump: Option<Utf8PathBuf>,

        /// Give up waiting for tiles after this many milliseconds
        #[arg(long, default_value_t = 60_000)]
        timeout_ms: u64,

        #[command(flatten)]
        canvas: CanvasArgs,
    },

    /// Replay an event script, printing one JSON line per frame
    Replay {
        /// Script file (uses stdin if not specified)
        #[arg(short, long)]
        input: Option<Utf8PathBuf>,

        /// Write the last presented frame to this PNG
        #[arg(short, long)]
        output: Option<Utf8PathBuf>,

        /// Embed each presented frame as base64 PNG in its JSON line
        #[arg(long)]
        embed_frames: bool,

        /// Wait up to this many milliseconds for tiles before each frame
        #[arg(long)]
        settle_ms: Option<u64>,

        #[command(flatten)]
        canvas: CanvasArgs,
    },

    /// Validate an event script
    Validate {
        /// Input file (uses stdin if not specified)
        #[arg(short, long)]
        input: Option<Utf8PathBuf>,
    },

    /// Show version information
    Version,
}

/// Pipeline parameters shared by `render` and `replay`.
#[derive(Args)]
struct CanvasArgs {
    /// JSON config file; flags below override it
    #[arg(short, long)]
    config: Option<Utf8PathBuf>,

    /// Viewport width in pixels
    #[arg(long)]
    width: Option<usize>,

    /// Viewport height in pixels
    #[arg(long)]
    height: Option<usize>,

    /// Tile edge length in texels
    #[arg(long)]
    tile_size: Option<usize>,

    /// Escape-time iteration cap
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Worker threads (0 = one per CPU)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Iteration buffers in the pool
    #[arg(long)]
    pool: Option<usize>,
}

impl CanvasArgs {
    fn resolve(&self) -> Result<CanvasConfig> {
        let mut config = match &self.config {
            Some(path) => CanvasConfig::load(path)
                .with_context(|| format!("loading config {}", path))?,
            None => CanvasConfig::default(),
        };
        if let Some(v) = self.width {
            config.width = v;
        }
        if let Some(v) = self.height {
            config.height = v;
        }
        if let Some(v) = self.tile_size {
            config.tile_size = v;
        }
        if let Some(v) = self.max_iterations {
            config.max_iterations = v;
        }
        if let Some(v) = self.workers {
            config.workers = v;
        }
        if let Some(v) = self.pool {
            config.pool_capacity = v;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Summary line printed by `render`.
#[derive(Serialize)]
struct RenderSummary<'a> {
    output: &'a str,
    width: u32,
    height: u32,
    origin: PlanePoint,
    scale: f64,
    mode: &'static str,
    elapsed_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    shutdown: Option<mandelpan::ShutdownReport>,
}

fn parse_point(s: &str) -> std::result::Result<PlanePoint, String> {
    let (re, im) = s
        .split_once(',')
        .ok_or_else(|| format!("expected \"re,im\", got '{}'", s))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<f64>()
            .map_err(|e| format!("'{}': {}", v.trim(), e))
    };
    Ok(PlanePoint::new(parse(re)?, parse(im)?))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(&cli.log_level, cli.quiet, true);

    match cli.command {
        Commands::Render {
            output,
            origin,
            scale,
            direct,
            dump,
            timeout_ms,
            canvas,
        } => {
            let config = canvas.resolve()?;
            let start = ViewConfig { origin, scale };
            start.validate()?;
            let view = View::from_config(&config, Some(&start));
            render(&config, &view, &output, direct, dump.as_deref(), timeout_ms)?;
        }
        Commands::Replay {
            input,
            output,
            embed_frames,
            settle_ms,
            canvas,
        } => {
            let config = canvas.resolve()?;
            let script = EventScript::parse(&read_input(input.as_deref())?)?;
            let options = ReplayOptions {
                embed_frames,
                settle: settle_ms.map(Duration::from_millis),
            };
            let stdout = io::stdout();
            let outcome = replay(&script, &config, options, &mut stdout.lock())?;
            info!(
                "Replayed {} frames; workers computed {:?} tiles",
                outcome.frames, outcome.shutdown.tiles_per_worker
            );
            if let Some(path) = output {
                match outcome.last_image {
                    Some(image) => write_png(&path, &image)?,
                    None => warn!("No frame was presented, {} not written", path),
                }
            }
        }
        Commands::Validate { input } => {
            validate_script(input.as_deref())?;
        }
        Commands::Version => {
            println!("mandelpan version {}", mandelpan::VERSION);
            println!("Incremental tile-cached Mandelbrot renderer");
        }
    }

    Ok(())
}

fn render(
    config: &CanvasConfig,
    view: &View,
    output: &Utf8Path,
    direct: bool,
    dump: Option<&Utf8Path>,
    timeout_ms: u64,
) -> Result<()> {
    let timer = logging::Timer::new("render");
    let (image, shutdown) = if direct {
        (render_direct(view, config.max_iterations)?, None)
    } else {
        let mut canvas = Canvas::new(config, view.origin, view.scale)?;
        canvas.generate(view.origin)?;
        if !canvas.wait_idle(Duration::from_millis(timeout_ms)) {
            bail!(
                "Timed out with {} tiles outstanding after {}ms",
                canvas.outstanding(),
                timeout_ms
            );
        }
        let image = canvas.present(view.rect())?;
        if let Some(path) = dump {
            write_png(path, &canvas.dump(view.rect())?)?;
        }
        (image, Some(canvas.shutdown()?))
    };
    write_png(output, &image)?;

    let summary = RenderSummary {
        output: output.as_str(),
        width: image.width(),
        height: image.height(),
        origin: view.origin,
        scale: view.scale,
        mode: if direct { "direct" } else { "pipeline" },
        elapsed_ms: timer.elapsed_ms(),
        shutdown,
    };
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

fn write_png(path: &Utf8Path, image: &image::RgbaImage) -> Result<()> {
    let bytes = encode_png(image)?;
    std::fs::write(path, bytes).with_context(|| format!("writing {}", path))?;
    info!("Wrote {}x{} image to {}", image.width(), image.height(), path);
    Ok(())
}

fn read_input(input: Option<&Utf8Path>) -> Result<String> {
    match input {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("reading {}", path)),
        None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            Ok(buffer)
        }
    }
}

fn validate_script(input: Option<&Utf8Path>) -> Result<()> {
    let json = read_input(input)?;
    match EventScript::parse(&json) {
        Ok(script) => {
            println!("✓ Valid event script");
            println!("  Version: {}", script.version);
            println!("  Events: {}", script.events.len());
            Ok(())
        }
        Err(e) => {
            error!("Invalid event script: {}", e);
            println!("✗ Invalid event script: {}", e);
            Err(e.into())
        }
    }
}
