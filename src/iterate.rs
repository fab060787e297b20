// this_file: src/iterate.rs
//! Escape-time iteration for the Mandelbrot set.

use crate::bufpool::IterationBuffer;
use crate::grid::PlanePoint;

/// Iteration cap of the reference configuration
pub const DEFAULT_MAX_ITERATIONS: u32 = 255;

/// Count iterations of z <- z^2 + c, starting from z = 0, until |z|^2 >= 4
/// or `max_it` is reached.
#[inline]
pub fn iterate(cre: f64, cim: f64, max_it: u32) -> u32 {
    let (mut zre, mut zim) = (0.0f64, 0.0f64);
    let mut it = 0;
    while zre * zre + zim * zim < 4.0 && it < max_it {
        let next_re = zre * zre - zim * zim + cre;
        zim = 2.0 * zre * zim + cim;
        zre = next_re;
        it += 1;
    }
    it
}

/// Plane coordinate of sample (x, y) of a tile whose top-left sample sits at
/// `origin`. Rows run downwards, the imaginary axis upwards.
#[inline]
pub fn sample_point(origin: PlanePoint, scale: f64, x: usize, y: usize) -> PlanePoint {
    PlanePoint::new(origin.re + x as f64 * scale, origin.im - y as f64 * scale)
}

/// Map an iteration count to a grayscale level.
#[inline]
pub fn intensity(count: u32, max_it: u32) -> u8 {
    if max_it == 0 {
        return 0;
    }
    ((u64::from(count.min(max_it)) * 255) / u64::from(max_it)) as u8
}

/// Fill one row of a tile. Returns `false` if `row` is out of range.
pub fn fill_row(
    buffer: &mut IterationBuffer,
    row: usize,
    origin: PlanePoint,
    scale: f64,
    max_it: u32,
) -> bool {
    let Some(counts) = buffer.row_mut(row) else {
        return false;
    };
    for (x, count) in counts.iter_mut().enumerate() {
        let c = sample_point(origin, scale, x, row);
        *count = iterate(c.re, c.im, max_it);
    }
    true
}

/// Compute every sample of a tile into `buffer`.
pub fn fill_tile(buffer: &mut IterationBuffer, origin: PlanePoint, scale: f64, max_it: u32) {
    for row in 0..buffer.side() {
        fill_row(buffer, row, origin, scale, max_it);
    }
}
