// this_file: src/reference.rs

//! Direct full-view rendering, bypassing the tile pipeline.
//!
//! Uses the same sample mapping and intensity ramp as the workers, so for a
//! view aligned to the sample lattice it reproduces what the pipeline
//! presents once idle.

use crate::compositor::BYTES_PER_TEXEL;
use crate::error::{Error, Result};
use crate::iterate::{intensity, iterate, sample_point};
use crate::logging::Timer;
use crate::scene::View;
use image::RgbaImage;
use rayon::prelude::*;
use serde::Serialize;

/// Render every pixel of `view` in parallel rows.
pub fn render_direct(view: &View, max_it: u32) -> Result<RgbaImage> {
    if view.width == 0 || view.height == 0 {
        return Err(Error::InvalidConfig(format!(
            "View must be non-empty, got {}x{}",
            view.width, view.height
        )));
    }
    let _timer = Timer::new(format!("direct render {}x{}", view.width, view.height));
    let stride = view.width * BYTES_PER_TEXEL;
    let bytes = stride * view.height;
    let mut data = Vec::new();
    data.try_reserve_exact(bytes)
        .map_err(|_| Error::Allocation { bytes })?;
    data.resize(bytes, 0);

    data.par_chunks_mut(stride).enumerate().for_each(|(y, row)| {
        for (x, px) in row.chunks_exact_mut(BYTES_PER_TEXEL).enumerate() {
            let c = sample_point(view.origin, view.scale, x, y);
            let v = intensity(iterate(c.re, c.im, max_it), max_it);
            px.copy_from_slice(&[v, v, v, 255]);
        }
    });

    RgbaImage::from_raw(view.width as u32, view.height as u32, data)
        .ok_or(Error::Allocation { bytes })
}

/// Pixel-level difference between two images of the same size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImageDiff {
    /// Pixels whose RGBA values differ
    pub differing: usize,
    pub total: usize,
    /// Largest per-channel difference
    pub max_delta: u8,
}

impl ImageDiff {
    pub fn is_identical(&self) -> bool {
        self.differing == 0
    }
}

/// Compare two images pixel by pixel. `None` if their sizes differ.
pub fn compare(a: &RgbaImage, b: &RgbaImage) -> Option<ImageDiff> {
    if a.dimensions() != b.dimensions() {
        return None;
    }
    let mut diff = ImageDiff {
        differing: 0,
        total: (a.width() * a.height()) as usize,
        max_delta: 0,
    };
    for (pa, pb) in a.pixels().zip(b.pixels()) {
        let delta = pa
            .0
            .iter()
            .zip(pb.0.iter())
            .map(|(x, y)| x.abs_diff(*y))
            .max()
            .unwrap_or(0);
        if delta > 0 {
            diff.differing += 1;
            diff.max_delta = diff.max_delta.max(delta);
        }
    }
    Some(diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::PlanePoint;

    fn view(width: usize, height: usize) -> View {
        View {
            origin: PlanePoint::new(-2.0, 1.0),
            scale: 0.05,
            width,
            height,
        }
    }

    #[test]
    fn direct_render_matches_escape_time() {
        let image = render_direct(&view(12, 7), 64).unwrap();
        assert_eq!(image.dimensions(), (12, 7));
        for (x, y, px) in image.enumerate_pixels() {
            let c = sample_point(PlanePoint::new(-2.0, 1.0), 0.05, x as usize, y as usize);
            let v = intensity(iterate(c.re, c.im, 64), 64);
            assert_eq!(px.0, [v, v, v, 255], "pixel ({x}, {y})");
        }
    }

    #[test]
    fn empty_view_is_rejected() {
        assert!(render_direct(&view(0, 4), 64).is_err());
    }

    #[test]
    fn compare_counts_differences() {
        let a = render_direct(&view(4, 4), 32).unwrap();
        let mut b = a.clone();
        assert!(compare(&a, &b).unwrap().is_identical());
        b.put_pixel(1, 1, image::Rgba([1, 2, 3, 255]));
        let diff = compare(&a, &b).unwrap();
        assert_eq!(diff.differing, 1);
        assert_eq!(diff.total, 16);
        assert!(compare(&a, &render_direct(&view(3, 4), 32).unwrap()).is_none());
    }
}
