use std::collections::BTreeMap;

use anyhow::Result;
use geo_types::{coord, LineString, Polygon, Rect};
use tracing::debug;

use crate::mercator::{snap, tile_latitude, tile_longitude, COARSE_EPSILON, MAX_ZOOM};
use crate::store::{TileStore, ZoomExtent};

/// Above this many tiles at one zoom level, exact cell-union coverage is
/// abandoned for that level and the declared bounding box stands in.
pub const MAX_EXACT_TILES: u64 = 1000;

/// Axis-aligned run of tile cells, in tile indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRect {
    pub col: u32,
    pub row: u32,
    pub width: u32,
    pub height: u32,
}

/// Planar union of unit tile cells. Cells are coalesced into maximal
/// disjoint rectangles band by band, rows ascending.
#[derive(Debug, Default)]
pub struct CellUnion {
    by_row: BTreeMap<u32, Vec<u32>>,
}

impl CellUnion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, col: u32, row: u32) {
        self.by_row.entry(row).or_default().push(col);
    }

    pub fn is_empty(&self) -> bool {
        self.by_row.is_empty()
    }

    pub fn rects(&self) -> Vec<CellRect> {
        let mut closed: Vec<CellRect> = Vec::new();
        let mut open: Vec<CellRect> = Vec::new();
        for (&row, cols) in &self.by_row {
            let mut sorted = cols.clone();
            sorted.sort_unstable();
            sorted.dedup();
            let mut next_open = Vec::new();
            for (col, width) in runs(&sorted) {
                let continued = open.iter().position(|r| {
                    r.col == col && r.width == width && r.row + r.height == row
                });
                match continued {
                    Some(pos) => {
                        let mut rect = open.swap_remove(pos);
                        rect.height += 1;
                        next_open.push(rect);
                    }
                    None => next_open.push(CellRect {
                        col,
                        row,
                        width,
                        height: 1,
                    }),
                }
            }
            closed.append(&mut open);
            open = next_open;
        }
        closed.append(&mut open);
        closed.sort_unstable_by_key(|r| (r.row, r.col));
        closed
    }
}

fn runs(sorted_cols: &[u32]) -> Vec<(u32, u32)> {
    let mut runs = Vec::new();
    let mut iter = sorted_cols.iter().copied();
    let Some(first) = iter.next() else {
        return runs;
    };
    let (mut start, mut end) = (first, first);
    for col in iter {
        if col == end + 1 {
            end = col;
        } else {
            runs.push((start, end - start + 1));
            start = col;
            end = col;
        }
    }
    runs.push((start, end - start + 1));
    runs
}

/// Union of geographic boxes, kept disjoint by rectangle decomposition:
/// a new box is first reduced by every box already present, then the
/// leftover pieces are adopted. Coordinates are lon on x, lat on y.
#[derive(Debug, Clone, Default)]
pub struct CoverageRegion {
    boxes: Vec<Rect<f64>>,
}

impl CoverageRegion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn union_rect(&mut self, rect: Rect<f64>) {
        let mut pieces = vec![rect];
        for existing in &self.boxes {
            let mut remainder = Vec::new();
            for piece in pieces {
                remainder.extend(subtract(&piece, existing));
            }
            pieces = remainder;
            if pieces.is_empty() {
                return;
            }
        }
        self.boxes.extend(pieces.into_iter().filter(is_proper));
    }

    pub fn intersect_rect(&mut self, clip: &Rect<f64>) {
        self.boxes = self
            .boxes
            .iter()
            .filter_map(|b| intersection(b, clip))
            .filter(is_proper)
            .collect();
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        self.boxes.iter().any(|b| {
            lon >= b.min().x && lon <= b.max().x && lat >= b.min().y && lat <= b.max().y
        })
    }

    pub fn intersects(&self, rect: &Rect<f64>) -> bool {
        self.boxes.iter().any(|b| intersection(b, rect).is_some())
    }

    pub fn bounding(&self) -> Option<Rect<f64>> {
        let mut iter = self.boxes.iter();
        let first = iter.next()?;
        let mut rect = *first;
        for b in iter {
            rect = Rect::new(
                coord! { x: rect.min().x.min(b.min().x), y: rect.min().y.min(b.min().y) },
                coord! { x: rect.max().x.max(b.max().x), y: rect.max().y.max(b.max().y) },
            );
        }
        Some(rect)
    }

    pub fn contour_count(&self) -> usize {
        self.boxes.len()
    }

    /// Closed polygon contours whose union is the coverage. Rings run
    /// west-south, east-south, east-north, west-north and close on the
    /// first point.
    pub fn contours(&self) -> Vec<Polygon<f64>> {
        self.boxes
            .iter()
            .map(|b| {
                let (w, s, e, n) = (b.min().x, b.min().y, b.max().x, b.max().y);
                Polygon::new(
                    LineString::from(vec![(w, s), (e, s), (e, n), (w, n), (w, s)]),
                    vec![],
                )
            })
            .collect()
    }
}

fn is_proper(rect: &Rect<f64>) -> bool {
    rect.max().x > rect.min().x && rect.max().y > rect.min().y
}

fn intersection(a: &Rect<f64>, b: &Rect<f64>) -> Option<Rect<f64>> {
    let min_x = a.min().x.max(b.min().x);
    let max_x = a.max().x.min(b.max().x);
    let min_y = a.min().y.max(b.min().y);
    let max_y = a.max().y.min(b.max().y);
    if min_x < max_x && min_y < max_y {
        Some(Rect::new(
            coord! { x: min_x, y: min_y },
            coord! { x: max_x, y: max_y },
        ))
    } else {
        None
    }
}

/// `piece` minus `hole`, as up to four disjoint rects.
fn subtract(piece: &Rect<f64>, hole: &Rect<f64>) -> Vec<Rect<f64>> {
    let Some(overlap) = intersection(piece, hole) else {
        return vec![*piece];
    };
    let mut out = Vec::new();
    let mut push = |min_x: f64, min_y: f64, max_x: f64, max_y: f64| {
        if max_x > min_x && max_y > min_y {
            out.push(Rect::new(
                coord! { x: min_x, y: min_y },
                coord! { x: max_x, y: max_y },
            ));
        }
    };
    push(piece.min().x, piece.min().y, overlap.min().x, piece.max().y);
    push(overlap.max().x, piece.min().y, piece.max().x, piece.max().y);
    push(overlap.min().x, piece.min().y, overlap.max().x, overlap.min().y);
    push(overlap.min().x, overlap.max().y, overlap.max().x, piece.max().y);
    out
}

/// Result of the one-shot load-time coverage derivation.
#[derive(Debug)]
pub struct Coverage {
    pub region: CoverageRegion,
    /// Zoom level whose exact tile union became the canonical coverage,
    /// when any level stayed under the enumeration threshold and was
    /// populated.
    pub canonical_zoom: Option<u8>,
}

/// Reconcile the declared zoom range against what the tiles table really
/// holds. Declared values are clipped conservatively toward the observed
/// span; if that inverts the range the metadata was nonsense and the
/// observed span wins outright.
pub fn reconcile_zoom_range(
    declared_min: Option<u8>,
    declared_max: Option<u8>,
    observed: Option<(u8, u8)>,
) -> (u8, u8) {
    // Declared zooms beyond the table-backed maximum are treated as the
    // maximum; tile math above it is meaningless.
    let mut min_zoom = declared_min.unwrap_or(0).min(MAX_ZOOM);
    let mut max_zoom = declared_max.unwrap_or(MAX_ZOOM).min(MAX_ZOOM);
    if let Some((observed_min, observed_max)) = observed {
        min_zoom = min_zoom.max(observed_min);
        max_zoom = max_zoom.min(observed_max);
        if min_zoom > max_zoom {
            min_zoom = observed_min;
            max_zoom = observed_max;
        }
    }
    (min_zoom, max_zoom)
}

/// Derive a chart extent from observed per-zoom tile extents, taking the
/// outermost tile edges over every populated zoom. Used only when the
/// metadata does not declare bounds.
pub fn derive_extent(extents: &[ZoomExtent]) -> Option<Rect<f64>> {
    let mut acc: Option<(f64, f64, f64, f64)> = None;
    for extent in extents {
        let west = tile_longitude(extent.min_col, extent.zoom);
        let east = tile_longitude(extent.max_col + 1, extent.zoom);
        let north = tile_latitude(extent.min_row, extent.zoom);
        let south = tile_latitude(extent.max_row + 1, extent.zoom);
        acc = Some(match acc {
            None => (west, south, east, north),
            Some((w, s, e, n)) => (w.min(west), s.min(south), e.max(east), n.max(north)),
        });
    }
    acc.map(|(w, s, e, n)| Rect::new(coord! { x: w, y: s }, coord! { x: e, y: n }))
}

/// Derive the coverage region from sparse tile presence, walking zooms
/// coarse to fine. Levels over [`MAX_EXACT_TILES`] contribute the whole
/// declared extent once; the first level whose exact cell union produces
/// a contour becomes canonical and stops the walk. The accumulated
/// region never exceeds the declared extent.
pub fn build_coverage(
    store: &TileStore,
    extent: &Rect<f64>,
    min_zoom: u8,
    max_zoom: u8,
) -> Result<Coverage> {
    let mut region = CoverageRegion::new();
    let mut canonical_zoom = None;
    let mut fallback_taken = false;

    let mut zoom = min_zoom;
    while zoom <= max_zoom && canonical_zoom.is_none() {
        let count = store.count_tiles(zoom)?;
        if count > MAX_EXACT_TILES {
            debug!(zoom, count, "too many tiles for exact coverage, using declared bounds");
            if !fallback_taken {
                fallback_taken = true;
                region.union_rect(*extent);
            }
            zoom += 1;
            continue;
        }

        let mut cells = CellUnion::new();
        for (col, row) in store.tile_indices(zoom)? {
            cells.insert(col, row);
        }
        for rect in cells.rects() {
            region.union_rect(cell_rect_to_geo(&rect, zoom));
            canonical_zoom = Some(zoom);
        }
        debug!(zoom, count, contours = region.contour_count(), "exact coverage pass");
        zoom += 1;
    }

    region.intersect_rect(extent);
    Ok(Coverage {
        region,
        canonical_zoom,
    })
}

fn cell_rect_to_geo(rect: &CellRect, zoom: u8) -> Rect<f64> {
    let west = snap(tile_longitude(rect.col as i64, zoom), COARSE_EPSILON);
    let east = snap(
        tile_longitude(rect.col as i64 + rect.width as i64, zoom),
        COARSE_EPSILON,
    );
    let north = snap(tile_latitude(rect.row as i64, zoom), COARSE_EPSILON);
    let south = snap(
        tile_latitude(rect.row as i64 + rect.height as i64, zoom),
        COARSE_EPSILON,
    );
    Rect::new(coord! { x: west, y: south }, coord! { x: east, y: north })
}
