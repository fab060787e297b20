// this_file: src/logging.rs
//! Logger setup and timing helpers

use env_logger::Builder;
use log::{Level, LevelFilter};
use std::io::Write;
use std::time::Instant;

/// Default log level for debug builds
#[cfg(debug_assertions)]
pub fn default_level() -> &'static str {
    "debug"
}

/// Default log level for release builds
#[cfg(not(debug_assertions))]
pub fn default_level() -> &'static str {
    "info"
}

/// Parse a level name; unknown names fall back to `info`.
pub fn parse_level(level: &str) -> Option<LevelFilter> {
    match level.to_lowercase().as_str() {
        "trace" => Some(LevelFilter::Trace),
        "debug" => Some(LevelFilter::Debug),
        "info" => Some(LevelFilter::Info),
        "warn" | "warning" => Some(LevelFilter::Warn),
        "error" => Some(LevelFilter::Error),
        "off" => Some(LevelFilter::Off),
        _ => None,
    }
}

/// Install the global logger on stderr. `RUST_LOG` directives override
/// `level`. Returns `false` if a logger was already installed.
pub fn init_logging(level: &str, quiet: bool, timestamps: bool) -> bool {
    let level_filter = if quiet {
        LevelFilter::Error
    } else {
        parse_level(level).unwrap_or_else(|| {
            eprintln!("Invalid log level '{}', using 'info'", level);
            LevelFilter::Info
        })
    };

    let mut builder = Builder::new();
    builder.filter_level(level_filter);

    builder.format(move |buf, record| {
        let level_style = match record.level() {
            Level::Error => "\x1b[31m",
            Level::Warn => "\x1b[33m",
            Level::Info => "\x1b[32m",
            Level::Debug => "\x1b[34m",
            Level::Trace => "\x1b[35m",
        };
        let reset = "\x1b[0m";
        let thread = std::thread::current();
        let thread = thread.name().unwrap_or("?");

        if timestamps {
            writeln!(
                buf,
                "{} {}{:5}{} [{}] ({}) {}",
                buf.timestamp_millis(),
                level_style,
                record.level(),
                reset,
                record.target(),
                thread,
                record.args()
            )
        } else {
            writeln!(
                buf,
                "{}{:5}{} [{}] ({}) {}",
                level_style,
                record.level(),
                reset,
                record.target(),
                thread,
                record.args()
            )
        }
    });

    if let Ok(rust_log) = std::env::var("RUST_LOG") {
        builder.parse_filters(&rust_log);
    }

    builder.try_init().is_ok()
}

/// Measures an operation; logs the elapsed time at debug level on drop.
pub struct Timer {
    name: String,
    start: Instant,
}

impl Timer {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        log::trace!("Starting: {}", name);
        Self {
            name,
            start: Instant::now(),
        }
    }

    /// Milliseconds since the timer started.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Log the elapsed time at `level`.
    pub fn log_elapsed(&self, level: Level) {
        log::log!(level, "{} completed in {:.3}ms", self.name, self.elapsed_ms());
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.log_elapsed(Level::Debug);
    }
}
