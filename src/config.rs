// this_file: src/config.rs
//! Canvas configuration, defaults, and hard limits

use crate::error::{Error, Result};
use crate::grid::PlanePoint;
use camino::Utf8Path;
use log::debug;
use serde::{Deserialize, Serialize};

/// Maximum tile edge length in texels
pub const MAX_TILE_SIZE: usize = 1024;

/// Maximum number of worker threads
pub const MAX_WORKERS: usize = 256;

/// Maximum number of pooled iteration buffers
pub const MAX_POOL_CAPACITY: usize = 1024;

/// Maximum viewport width or height in pixels
pub const MAX_VIEWPORT_DIM: usize = 16_384;

/// Maximum escape-time iteration cap
pub const MAX_ITERATIONS: u32 = 1_000_000;

/// Maximum number of events in one script
pub const MAX_EVENTS_PER_SCRIPT: usize = 100_000;

/// Maximum magnitude of either view origin coordinate
pub const MAX_PLANE_COORD: f64 = 1.0e6;

/// Maximum magnitude of a pointer coordinate in window pixels
pub const MAX_POINTER_COORD: f64 = 1.0e6;

/// Maximum accepted JSON input size (10MB)
pub const MAX_JSON_SIZE: usize = 10 * 1024 * 1024;

/// Pipeline and viewport parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CanvasConfig {
    /// Tile edge length in texels
    pub tile_size: usize,
    /// Escape-time iteration cap
    pub max_iterations: u32,
    /// Worker threads (0 = one per CPU)
    pub workers: usize,
    /// Iteration buffers in the pool
    pub pool_capacity: usize,
    /// Viewport width in pixels
    pub width: usize,
    /// Viewport height in pixels
    pub height: usize,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            tile_size: 128,
            max_iterations: crate::iterate::DEFAULT_MAX_ITERATIONS,
            workers: 1,
            pool_capacity: 1,
            width: 800,
            height: 600,
        }
    }
}

impl CanvasConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        if text.len() > MAX_JSON_SIZE {
            return Err(Error::InvalidConfig(format!(
                "Config file too large: {} bytes (max: {} bytes)",
                text.len(),
                MAX_JSON_SIZE
            )));
        }
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        debug!("Loaded config from {}", path);
        Ok(config)
    }

    /// Check every field against its limit.
    pub fn validate(&self) -> Result<()> {
        check_range("tile_size", self.tile_size, 1, MAX_TILE_SIZE)?;
        check_range("workers", self.workers, 0, MAX_WORKERS)?;
        check_range("pool_capacity", self.pool_capacity, 1, MAX_POOL_CAPACITY)?;
        check_range("width", self.width, 1, MAX_VIEWPORT_DIM)?;
        check_range("height", self.height, 1, MAX_VIEWPORT_DIM)?;
        check_range(
            "max_iterations",
            self.max_iterations as usize,
            1,
            MAX_ITERATIONS as usize,
        )?;
        Ok(())
    }

    /// Worker count with 0 resolved to the number of CPUs.
    pub fn resolved_workers(&self) -> usize {
        match self.workers {
            0 => num_cpus::get().min(MAX_WORKERS),
            n => n,
        }
    }
}

fn check_range(name: &str, value: usize, min: usize, max: usize) -> Result<()> {
    if value < min || value > max {
        return Err(Error::InvalidConfig(format!(
            "{} must be in {}..={}, got {}",
            name, min, max, value
        )));
    }
    Ok(())
}

/// Optional starting view carried by an event script.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ViewConfig {
    /// Plane coordinate of the top-left pixel
    #[serde(default)]
    pub origin: Option<PlanePoint>,
    /// Plane units per pixel
    #[serde(default)]
    pub scale: Option<f64>,
}

impl ViewConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(origin) = self.origin {
            if !(origin.re.is_finite() && origin.im.is_finite()) {
                return Err(Error::InvalidConfig("View origin must be finite".into()));
            }
            if origin.re.abs() > MAX_PLANE_COORD || origin.im.abs() > MAX_PLANE_COORD {
                return Err(Error::InvalidConfig(format!(
                    "View origin ({}, {}) exceeds {} on an axis",
                    origin.re, origin.im, MAX_PLANE_COORD
                )));
            }
        }
        if let Some(scale) = self.scale {
            if !(scale.is_finite() && scale > 0.0) {
                return Err(Error::InvalidConfig(format!(
                    "View scale must be positive and finite, got {}",
                    scale
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_reference_setup() {
        let config = CanvasConfig::default();
        assert_eq!(config.tile_size, 128);
        assert_eq!(config.max_iterations, 255);
        assert_eq!(config.workers, 1);
        assert_eq!(config.pool_capacity, 1);
        assert_eq!((config.width, config.height), (800, 600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn limits_are_enforced() {
        let bad = [
            CanvasConfig { tile_size: 0, ..Default::default() },
            CanvasConfig { pool_capacity: 0, ..Default::default() },
            CanvasConfig { width: MAX_VIEWPORT_DIM + 1, ..Default::default() },
            CanvasConfig { workers: MAX_WORKERS + 1, ..Default::default() },
            CanvasConfig { max_iterations: 0, ..Default::default() },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))), "{:?}", config);
        }
    }

    #[test]
    fn zero_workers_means_all_cpus() {
        let config = CanvasConfig { workers: 0, ..Default::default() };
        assert!(config.validate().is_ok());
        assert!(config.resolved_workers() >= 1);
        assert_eq!(CanvasConfig::default().resolved_workers(), 1);
    }

    #[test]
    fn load_fills_missing_fields_and_rejects_unknown() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"tile_size": 64, "workers": 4}}"#).unwrap();
        let path = Utf8Path::from_path(file.path()).unwrap();
        let config = CanvasConfig::load(path).unwrap();
        assert_eq!(config.tile_size, 64);
        assert_eq!(config.workers, 4);
        assert_eq!(config.pool_capacity, 1);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"tile": 64}}"#).unwrap();
        let path = Utf8Path::from_path(file.path()).unwrap();
        assert!(matches!(CanvasConfig::load(path), Err(Error::Json(_))));
    }

    #[test]
    fn view_config_bounds_the_origin() {
        let at = |re, im| ViewConfig { origin: Some(PlanePoint::new(re, im)), scale: None };
        assert!(at(-MAX_PLANE_COORD, MAX_PLANE_COORD).validate().is_ok());
        assert!(at(1e19, 0.0).validate().is_err());
        assert!(at(0.0, -1e17).validate().is_err());
        assert!(at(f64::NAN, 0.0).validate().is_err());
    }

    #[test]
    fn view_config_rejects_bad_scale() {
        let view = ViewConfig { origin: None, scale: Some(-1.0) };
        assert!(view.validate().is_err());
        assert!(ViewConfig::default().validate().is_ok());
    }
}
