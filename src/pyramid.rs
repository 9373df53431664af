use std::collections::HashMap;

use geo_types::Rect;

use crate::mercator::{
    snap, tile_column, tile_latitude, tile_longitude, tile_row, EPSILON,
};
use crate::render::{RenderBackend, TextureHandle};

/// Geographic bounding box of one tile, snapped to the epsilon grid so
/// adjoining tiles share bit-identical edges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileGeometry {
    pub lon_min: f64,
    pub lon_max: f64,
    pub lat_min: f64,
    pub lat_max: f64,
}

/// Per-tile record. Created on first reference during rendering; geometry
/// and texture both materialize lazily and independently.
#[derive(Debug)]
pub struct TileDescriptor {
    pub zoom: u8,
    pub col: u32,
    pub row: u32,
    /// Once a store lookup proves no row exists this goes false and the
    /// store is never asked about this address again.
    pub available: bool,
    geometry: Option<TileGeometry>,
    pub texture: Option<TextureHandle>,
}

impl TileDescriptor {
    fn new(zoom: u8, col: u32, row: u32) -> Self {
        Self {
            zoom,
            col,
            row,
            available: true,
            geometry: None,
            texture: None,
        }
    }

    pub fn geometry_set(&self) -> bool {
        self.geometry.is_some()
    }

    /// Compute and cache the tile's geographic box on first use.
    pub fn geometry(&mut self) -> TileGeometry {
        if let Some(geometry) = self.geometry {
            return geometry;
        }
        let geometry = TileGeometry {
            lon_min: snap(tile_longitude(self.col as i64, self.zoom), EPSILON),
            lon_max: snap(tile_longitude(self.col as i64 + 1, self.zoom), EPSILON),
            lat_max: snap(tile_latitude(self.row as i64, self.zoom), EPSILON),
            lat_min: snap(tile_latitude(self.row as i64 + 1, self.zoom), EPSILON),
        };
        self.geometry = Some(geometry);
        geometry
    }
}

/// One layer of the pyramid: the bounding tile rectangle derived from the
/// chart extent plus a sparse map of descriptors keyed by composite index.
#[derive(Debug)]
pub struct ZoomLevel {
    pub zoom: u8,
    pub col_min: i64,
    pub col_max: i64,
    pub row_min: i64,
    pub row_max: i64,
    pub nx: i64,
    pub ny: i64,
    tiles: HashMap<u64, TileDescriptor>,
}

impl ZoomLevel {
    /// Pure geometric derivation from the chart extent; never touches the
    /// store. Edges are pulled in by epsilon so a bound lying exactly on
    /// a tile boundary cannot alias into the neighboring column or row.
    fn prepare(zoom: u8, extent: &Rect<f64>) -> Self {
        let col_min = tile_column(extent.min().x + EPSILON, zoom);
        let col_max = tile_column(extent.max().x - EPSILON, zoom);
        let row_min = tile_row(extent.max().y - EPSILON, zoom);
        let row_max = tile_row(extent.min().y + EPSILON, zoom);
        Self {
            zoom,
            col_min,
            col_max,
            row_min,
            row_max,
            nx: (col_max - col_min).abs() + 1,
            ny: row_max - row_min + 1,
            tiles: HashMap::new(),
        }
    }

    pub fn contains(&self, col: i64, row: i64) -> bool {
        if row < self.row_min || row > self.row_max {
            return false;
        }
        // An inverted column range means the extent wraps the antimeridian;
        // no column is rejected in that case.
        if self.col_max >= self.col_min && (col < self.col_min || col > self.col_max) {
            return false;
        }
        true
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    fn composite_index(&self, col: i64, row: i64) -> u64 {
        ((row - self.row_min) * (self.nx + 1) + col) as u64
    }

    /// Idempotent per address: two calls with the same (col, row) hand
    /// back the same descriptor. Addresses outside the level rectangle
    /// are refused, so the level never holds an out-of-rect descriptor.
    pub fn lookup_or_create(&mut self, col: i64, row: i64) -> Option<&mut TileDescriptor> {
        if !self.contains(col, row) {
            return None;
        }
        let index = self.composite_index(col, row);
        Some(
            self.tiles
                .entry(index)
                .or_insert_with(|| TileDescriptor::new(self.zoom, col as u32, row as u32)),
        )
    }

}

/// Ordered zoom levels, index 0 at the minimum zoom. Immutable after
/// construction except for the descriptor maps inside each level.
#[derive(Debug)]
pub struct TilePyramid {
    min_zoom: u8,
    max_zoom: u8,
    levels: Vec<ZoomLevel>,
}

impl TilePyramid {
    pub fn prepare(min_zoom: u8, max_zoom: u8, extent: &Rect<f64>) -> Self {
        let levels = (min_zoom..=max_zoom)
            .map(|zoom| ZoomLevel::prepare(zoom, extent))
            .collect();
        Self {
            min_zoom,
            max_zoom,
            levels,
        }
    }

    pub fn min_zoom(&self) -> u8 {
        self.min_zoom
    }

    pub fn max_zoom(&self) -> u8 {
        self.max_zoom
    }

    pub fn level(&self, zoom: u8) -> Option<&ZoomLevel> {
        if zoom < self.min_zoom {
            return None;
        }
        self.levels.get((zoom - self.min_zoom) as usize)
    }

    pub fn level_mut(&mut self, zoom: u8) -> Option<&mut ZoomLevel> {
        if zoom < self.min_zoom {
            return None;
        }
        self.levels.get_mut((zoom - self.min_zoom) as usize)
    }

    /// Release every texture and destroy every descriptor and level.
    /// Teardown path.
    pub fn flush_all(&mut self, backend: &mut dyn RenderBackend) {
        self.flush_textures(backend);
        for level in &mut self.levels {
            level.tiles.clear();
        }
        self.levels.clear();
    }

    /// Release textures only. Descriptors and their cached geometry stay,
    /// so a color-scheme change does not force geometry recomputation.
    pub fn flush_textures(&mut self, backend: &mut dyn RenderBackend) {
        for level in &mut self.levels {
            for tile in level.tiles.values_mut() {
                if let Some(handle) = tile.texture.take() {
                    backend.release_tile(handle);
                }
            }
        }
    }
}
