// this_file: src/grid.rs

//! Toroidal tile cache over the complex plane.
//!
//! Tiles sit on a fixed lattice: lattice tile (i, j) covers the square whose
//! top-left sample is at (i * side, -j * side), where `side` is the tile edge
//! in plane units. The grid keeps `cols` x `rows` slots and an integer
//! origin tile. Lattice tile (i, j) is always stored in slot
//! (i mod cols, j mod rows), so when the view pans the grid origin moves and
//! only the strip of slots that scrolled into view stops matching; nothing
//! is ever copied.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest lattice index (in tiles, either axis) a grid origin may take.
pub const MAX_TILE_INDEX: i64 = i32::MAX as i64;

/// A point on the complex plane.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlanePoint {
    pub re: f64,
    pub im: f64,
}

impl PlanePoint {
    pub const fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }
}

/// Axis-aligned plane rectangle: top-left corner plus extent (plane units).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlaneRect {
    pub re: f64,
    pub im: f64,
    pub width: f64,
    pub height: f64,
}

/// Integer lattice coordinate of a tile. `y` grows downwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct TileCoord {
    pub x: i64,
    pub y: i64,
}

/// Stable index of a slot in the grid's arena (row-major).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SlotIndex(pub usize);

/// Texel position in the backing pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TexelPoint {
    pub x: usize,
    pub y: usize,
}

/// Texel rectangle relative to the grid's top-left tile (not wrapped).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TexelRect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

/// Edges of the cached region a projected rectangle crosses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct OutOfBounds {
    pub left: bool,
    pub right: bool,
    pub top: bool,
    pub bottom: bool,
}

impl OutOfBounds {
    /// Whether any edge is crossed.
    pub fn any(&self) -> bool {
        self.left || self.right || self.top || self.bottom
    }

    /// Names of the crossed edges.
    pub fn edges(&self) -> Vec<&'static str> {
        [
            (self.left, "left"),
            (self.right, "right"),
            (self.top, "top"),
            (self.bottom, "bottom"),
        ]
        .into_iter()
        .filter_map(|(hit, name)| hit.then_some(name))
        .collect()
    }
}

impl fmt::Display for OutOfBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "crosses {}", self.edges().join(", "))
    }
}

/// Cached state of one slot: which plane square its pixels currently hold
/// (or are being computed for).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Tile {
    origin: Option<PlanePoint>,
    scale: f64,
}

impl Tile {
    /// Plane coordinate of the top-left sample, if the slot was ever assigned.
    pub fn origin(&self) -> Option<PlanePoint> {
        self.origin
    }

    /// Plane units per sample.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Whether the slot already represents `origin` at `scale`, to within
    /// `scale / 100` on every field.
    pub fn is_valid_for(&self, origin: PlanePoint, scale: f64) -> bool {
        let Some(current) = self.origin else {
            return false;
        };
        let epsilon = scale / 100.0;
        (current.re - origin.re).abs() <= epsilon
            && (current.im - origin.im).abs() <= epsilon
            && (self.scale - scale).abs() <= epsilon
    }
}

/// One tile that needs computing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileRequest {
    pub slot: SlotIndex,
    pub origin: PlanePoint,
    pub scale: f64,
    pub dest: TexelPoint,
}

/// Fixed-size toroidal grid of tile slots.
#[derive(Debug, Clone)]
pub struct TileGrid {
    cols: usize,
    rows: usize,
    tile_size: usize,
    scale: f64,
    origin_tile: TileCoord,
    tiles: Vec<Tile>,
}

impl TileGrid {
    /// Grid dimensions (cols, rows) that cover a `width` x `height` viewport
    /// at any sub-tile offset, with a one-tile margin on every side.
    pub fn dims_for_viewport(width: usize, height: usize, tile_size: usize) -> (usize, usize) {
        let tile_size = tile_size.max(1);
        let tiles = |texels: usize| (texels + tile_size - 1) / tile_size;
        (tiles(width) + 3, tiles(height) + 3)
    }

    /// Allocate a grid of `cols` x `rows` unassigned slots.
    pub fn new(cols: usize, rows: usize, tile_size: usize, scale: f64) -> Result<Self> {
        if cols == 0 || rows == 0 || tile_size == 0 {
            return Err(Error::InvalidConfig(format!(
                "Grid needs non-zero dimensions, got {}x{} tiles of {}",
                cols, rows, tile_size
            )));
        }
        if !(scale.is_finite() && scale > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "Scale must be positive and finite, got {}",
                scale
            )));
        }
        let len = cols
            .checked_mul(rows)
            .ok_or(Error::Allocation { bytes: usize::MAX })?;
        cols.checked_mul(tile_size)
            .and(rows.checked_mul(tile_size))
            .ok_or(Error::Allocation { bytes: usize::MAX })?;
        let mut tiles = Vec::new();
        tiles.try_reserve_exact(len).map_err(|_| Error::Allocation {
            bytes: len.saturating_mul(std::mem::size_of::<Tile>()),
        })?;
        tiles.resize(len, Tile::default());
        Ok(Self {
            cols,
            rows,
            tile_size,
            scale,
            origin_tile: TileCoord::default(),
            tiles,
        })
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn tile_size(&self) -> usize {
        self.tile_size
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Width of the backing store in texels.
    pub fn texel_width(&self) -> usize {
        self.cols * self.tile_size
    }

    /// Height of the backing store in texels.
    pub fn texel_height(&self) -> usize {
        self.rows * self.tile_size
    }

    /// Lattice coordinate of the grid's top-left tile.
    pub fn origin_tile(&self) -> TileCoord {
        self.origin_tile
    }

    /// Tile edge length in plane units.
    pub fn tile_span(&self) -> f64 {
        self.tile_size as f64 * self.scale
    }

    /// Plane coordinate of the top-left sample of lattice tile `coord`.
    pub fn tile_origin(&self, coord: TileCoord) -> PlanePoint {
        let span = self.tile_span();
        PlanePoint::new(coord.x as f64 * span, -(coord.y as f64) * span)
    }

    /// Plane coordinate of the grid's top-left sample.
    pub fn grid_origin(&self) -> PlanePoint {
        self.tile_origin(self.origin_tile)
    }

    /// Grid origin tile for a view whose top-left sample is `view_origin`.
    ///
    /// Fails when the view lies beyond [`MAX_TILE_INDEX`] tiles from the
    /// plane origin on either axis.
    pub fn origin_for(&self, view_origin: PlanePoint) -> Result<TileCoord> {
        let span = self.tile_span();
        let tx = (view_origin.re / span).floor();
        let ty = (-view_origin.im / span).floor();
        let limit = MAX_TILE_INDEX as f64;
        if !(tx.is_finite() && ty.is_finite() && tx.abs() <= limit && ty.abs() <= limit) {
            return Err(Error::InvalidConfig(format!(
                "View origin ({}, {}) is beyond {} tiles of {} plane units",
                view_origin.re, view_origin.im, MAX_TILE_INDEX, span
            )));
        }
        Ok(TileCoord {
            x: tx as i64 - 1,
            y: ty as i64 - 1,
        })
    }

    /// Slot that stores lattice tile `coord`.
    pub fn slot_of(&self, coord: TileCoord) -> SlotIndex {
        let sx = coord.x.rem_euclid(self.cols as i64) as usize;
        let sy = coord.y.rem_euclid(self.rows as i64) as usize;
        SlotIndex(sy * self.cols + sx)
    }

    /// Slot holding the view-relative tile (x, y) under the current origin.
    pub fn slot_for_view(&self, x: usize, y: usize) -> SlotIndex {
        let origin = self.slot_texel(self.slot_of(self.origin_tile));
        let sx = (origin.x / self.tile_size + x % self.cols) % self.cols;
        let sy = (origin.y / self.tile_size + y % self.rows) % self.rows;
        SlotIndex(sy * self.cols + sx)
    }

    /// Lattice coordinate of the view-relative tile (x, y).
    fn lattice_coord(&self, x: usize, y: usize) -> Result<TileCoord> {
        let offset = |base: i64, n: usize| {
            i64::try_from(n).ok().and_then(|n| base.checked_add(n))
        };
        match (offset(self.origin_tile.x, x), offset(self.origin_tile.y, y)) {
            (Some(x), Some(y)) => Ok(TileCoord { x, y }),
            _ => Err(Error::InvalidConfig(format!(
                "Tile ({}, {}) past origin tile ({}, {}) leaves the lattice",
                x, y, self.origin_tile.x, self.origin_tile.y
            ))),
        }
    }

    /// Texel position of a slot's top-left sample in the backing store.
    pub fn slot_texel(&self, slot: SlotIndex) -> TexelPoint {
        TexelPoint {
            x: (slot.0 % self.cols) * self.tile_size,
            y: (slot.0 / self.cols) * self.tile_size,
        }
    }

    /// Cached state of a slot.
    pub fn tile(&self, slot: SlotIndex) -> Option<&Tile> {
        self.tiles.get(slot.0)
    }

    /// Whether `slot` currently wants the tile at `origin` / `scale`.
    pub fn is_current(&self, slot: SlotIndex, origin: PlanePoint, scale: f64) -> bool {
        self.tile(slot)
            .map_or(false, |tile| tile.is_valid_for(origin, scale))
    }

    /// Move the grid to cover `view_origin` without touching any slot.
    /// The grid is left where it was if the origin is out of range.
    pub fn set_origin(&mut self, view_origin: PlanePoint) -> Result<()> {
        self.origin_tile = self.origin_for(view_origin)?;
        Ok(())
    }

    /// Move the grid to cover `view_origin` and list every slot whose cached
    /// tile no longer matches what it must now represent. Those slots are
    /// marked with their new coordinates immediately.
    pub fn regenerate(&mut self, view_origin: PlanePoint) -> Result<Vec<TileRequest>> {
        let previous = self.origin_tile;
        self.set_origin(view_origin)?;
        // Far corner first, so no slot is touched unless the whole grid fits.
        if let Err(e) = self.lattice_coord(self.cols - 1, self.rows - 1) {
            self.origin_tile = previous;
            return Err(e);
        }
        let scale = self.scale;
        let mut requests = Vec::new();
        for y in 0..self.rows {
            for x in 0..self.cols {
                let coord = self.lattice_coord(x, y)?;
                let origin = self.tile_origin(coord);
                let slot = self.slot_of(coord);
                let dest = self.slot_texel(slot);
                let tile = &mut self.tiles[slot.0];
                if tile.is_valid_for(origin, scale) {
                    continue;
                }
                tile.origin = Some(origin);
                tile.scale = scale;
                requests.push(TileRequest {
                    slot,
                    origin,
                    scale,
                    dest,
                });
            }
        }
        Ok(requests)
    }

    /// Map a plane rectangle to grid-relative texels, rejecting rectangles
    /// that leave the cached region.
    pub fn project(&self, rect: PlaneRect) -> std::result::Result<TexelRect, OutOfBounds> {
        // Absorbs rounding when the rectangle sits exactly on a texel boundary.
        const SNAP: f64 = 1e-6;
        let origin = self.grid_origin();
        let x = ((rect.re - origin.re) / self.scale + SNAP).floor() as i64;
        let y = ((origin.im - rect.im) / self.scale + SNAP).floor() as i64;
        let width = (rect.width / self.scale).round().max(0.0) as i64;
        let height = (rect.height / self.scale).round().max(0.0) as i64;

        let bounds = OutOfBounds {
            left: x < 0,
            right: x.saturating_add(width) > self.texel_width() as i64,
            top: y < 0,
            bottom: y.saturating_add(height) > self.texel_height() as i64,
        };
        if bounds.any() {
            return Err(bounds);
        }
        Ok(TexelRect {
            x: x as usize,
            y: y as usize,
            width: width as usize,
            height: height as usize,
        })
    }

    /// Backing-store texel for grid-relative texel (x, y).
    pub fn wrap_texel(&self, x: usize, y: usize) -> TexelPoint {
        // The origin tile's slot is the lattice position modulo the grid.
        let origin = self.slot_texel(self.slot_of(self.origin_tile));
        let (width, height) = (self.texel_width(), self.texel_height());
        TexelPoint {
            x: (origin.x + x % width) % width,
            y: (origin.y + y % height) % height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const TILE: usize = 4;
    const SCALE: f64 = 0.25;

    fn grid() -> TileGrid {
        TileGrid::new(5, 4, TILE, SCALE).unwrap()
    }

    fn view_at_tile(grid: &TileGrid, i: i64, j: i64) -> PlanePoint {
        // A view whose top-left sample sits exactly on lattice tile (i, j).
        grid.tile_origin(TileCoord { x: i, y: j })
    }

    #[test]
    fn viewport_dims_include_margin() {
        assert_eq!(TileGrid::dims_for_viewport(800, 600, 128), (10, 8));
        assert_eq!(TileGrid::dims_for_viewport(256, 256, 128), (5, 5));
    }

    #[test]
    fn rejects_degenerate_grids() {
        assert!(TileGrid::new(0, 4, 4, 1.0).is_err());
        assert!(TileGrid::new(4, 4, 0, 1.0).is_err());
        assert!(TileGrid::new(4, 4, 4, 0.0).is_err());
        assert!(TileGrid::new(4, 4, 4, f64::NAN).is_err());
    }

    #[test]
    fn tile_validity_uses_scale_epsilon() {
        let mut tile = Tile::default();
        assert!(!tile.is_valid_for(PlanePoint::new(0.0, 0.0), 1.0));
        tile.origin = Some(PlanePoint::new(1.0, 2.0));
        tile.scale = 1.0;
        assert!(tile.is_valid_for(PlanePoint::new(1.005, 2.0), 1.0));
        assert!(!tile.is_valid_for(PlanePoint::new(1.02, 2.0), 1.0));
        assert!(!tile.is_valid_for(PlanePoint::new(1.0, 2.0), 2.0));
    }

    #[test]
    fn first_pass_requests_every_slot_once() {
        let mut grid = grid();
        let requests = grid.regenerate(PlanePoint::new(-1.0, 1.0)).unwrap();
        assert_eq!(requests.len(), 20);
        let mut slots: Vec<_> = requests.iter().map(|r| r.slot).collect();
        slots.sort();
        slots.dedup();
        assert_eq!(slots.len(), 20);
    }

    #[test]
    fn unchanged_view_requests_nothing() {
        let mut grid = grid();
        let view = PlanePoint::new(-1.0, 1.0);
        grid.regenerate(view).unwrap();
        assert!(grid.regenerate(view).unwrap().is_empty());
    }

    #[test]
    fn sub_tile_pan_requests_nothing() {
        let mut grid = grid();
        let view = view_at_tile(&grid, 0, 0);
        grid.regenerate(view).unwrap();
        let nudged = PlanePoint::new(view.re + SCALE * 2.0, view.im - SCALE);
        assert!(grid.regenerate(nudged).unwrap().is_empty());
    }

    #[test]
    fn one_tile_pan_requests_only_the_exposed_column() {
        let mut grid = grid();
        grid.regenerate(view_at_tile(&grid, 0, 0)).unwrap();
        let requests = grid.regenerate(view_at_tile(&grid, 1, 0)).unwrap();
        assert_eq!(requests.len(), grid.rows());
        // The exposed column is lattice column origin + cols - 1.
        let column = grid.origin_tile().x + grid.cols() as i64 - 1;
        for request in &requests {
            assert_relative_eq!(request.origin.re, column as f64 * grid.tile_span());
        }

        let requests = grid.regenerate(view_at_tile(&grid, 1, 1)).unwrap();
        assert_eq!(requests.len(), grid.cols());
    }

    #[test]
    fn full_span_pan_maps_view_tiles_to_same_slots() {
        let mut grid = grid();
        grid.regenerate(view_at_tile(&grid, 2, 3)).unwrap();
        let before: Vec<_> = (0..grid.rows())
            .flat_map(|y| (0..grid.cols()).map(move |x| (x, y)))
            .map(|(x, y)| (grid.slot_for_view(x, y), grid.slot_texel(grid.slot_for_view(x, y))))
            .collect();

        let (cols, rows) = (grid.cols() as i64, grid.rows() as i64);
        grid.regenerate(view_at_tile(&grid, 2 + 2 * cols, 3 - rows)).unwrap();
        let after: Vec<_> = (0..grid.rows())
            .flat_map(|y| (0..grid.cols()).map(move |x| (x, y)))
            .map(|(x, y)| (grid.slot_for_view(x, y), grid.slot_texel(grid.slot_for_view(x, y))))
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn panning_away_and_back_restores_slot_coordinates() {
        let mut grid = grid();
        let home = view_at_tile(&grid, 0, 0);
        grid.regenerate(home).unwrap();
        let snapshot: Vec<_> = grid.tiles.clone();

        let away = view_at_tile(&grid, grid.cols() as i64, 0);
        assert_eq!(grid.regenerate(away).unwrap().len(), 20);
        grid.regenerate(home).unwrap();
        assert_eq!(grid.tiles, snapshot);
    }

    #[test]
    fn projection_inside_region_is_grid_relative() {
        let mut grid = grid();
        let view = view_at_tile(&grid, 0, 0);
        grid.regenerate(view).unwrap();
        let rect = PlaneRect {
            re: view.re,
            im: view.im,
            width: 8.0 * SCALE,
            height: 4.0 * SCALE,
        };
        let texels = grid.project(rect).unwrap();
        // Origin tile is one tile up-left of the view.
        assert_eq!(texels, TexelRect { x: TILE, y: TILE, width: 8, height: 4 });
    }

    #[test]
    fn projection_reports_each_violated_edge() {
        let mut grid = grid();
        let view = view_at_tile(&grid, 0, 0);
        grid.regenerate(view).unwrap();

        let too_wide = PlaneRect {
            re: view.re,
            im: view.im,
            width: 100.0,
            height: SCALE,
        };
        let err = grid.project(too_wide).unwrap_err();
        assert_eq!(err, OutOfBounds { right: true, ..Default::default() });

        let up_left = PlaneRect {
            re: view.re - 10.0,
            im: view.im + 10.0,
            width: SCALE,
            height: SCALE,
        };
        let err = grid.project(up_left).unwrap_err();
        assert!(err.left && err.top && !err.right && !err.bottom);

        // Height is checked against rows, not columns.
        let tall = PlaneRect {
            re: view.re,
            im: view.im,
            width: SCALE,
            height: (grid.texel_height() as f64) * SCALE,
        };
        assert!(grid.project(tall).unwrap_err().bottom);
        assert_eq!(err.edges(), vec!["left", "top"]);
    }

    #[test]
    fn far_origins_are_rejected_without_moving_the_grid() {
        let mut grid = TileGrid::new(10, 8, 128, 0.003).unwrap();
        let home = PlanePoint::new(-2.0, 1.0);
        grid.regenerate(home).unwrap();
        let before = grid.origin_tile();

        for far in [
            PlanePoint::new(1e19, 0.0),
            PlanePoint::new(0.0, -1e19),
            PlanePoint::new(f64::INFINITY, 0.0),
            PlanePoint::new(f64::NAN, 0.0),
        ] {
            assert!(matches!(grid.regenerate(far), Err(Error::InvalidConfig(_))));
            assert!(grid.set_origin(far).is_err());
            assert_eq!(grid.origin_tile(), before);
        }
        assert!(grid.regenerate(home).unwrap().is_empty());
    }

    #[test]
    fn distant_but_representable_origins_wrap_safely() {
        let mut grid = TileGrid::new(10, 8, 128, 0.003).unwrap();
        assert!(grid.regenerate(PlanePoint::new(1e17, 0.0)).is_err());

        let edge = grid.tile_span() * (MAX_TILE_INDEX - 1) as f64;
        for view in [PlanePoint::new(edge, -edge), PlanePoint::new(-edge, edge)] {
            let requests = grid.regenerate(view).unwrap();
            assert_eq!(requests.len(), grid.cols() * grid.rows());
            let wrapped = grid.wrap_texel(usize::MAX, usize::MAX);
            assert!(wrapped.x < grid.texel_width() && wrapped.y < grid.texel_height());
            let slot = grid.slot_for_view(1, 1);
            assert_eq!(grid.slot_texel(slot), grid.wrap_texel(grid.tile_size(), grid.tile_size()));
        }

        let huge = PlaneRect { re: 1e300, im: -1e300, width: 1e300, height: 1e300 };
        assert!(grid.project(huge).unwrap_err().right);
    }

    #[test]
    fn wrap_texel_follows_slot_mapping() {
        let mut grid = grid();
        grid.regenerate(view_at_tile(&grid, 3, -2)).unwrap();
        for (vx, vy) in [(0usize, 0usize), (1, 2), (4, 3)] {
            let slot = grid.slot_for_view(vx, vy);
            let texel = grid.slot_texel(slot);
            let wrapped = grid.wrap_texel(vx * TILE + 1, vy * TILE + 2);
            assert_eq!(wrapped, TexelPoint { x: texel.x + 1, y: texel.y + 2 });
        }
    }
}
