use std::path::Path;

use anyhow::{Context, Result};
use geo_types::{coord, Rect};
use rusqlite::{params, Connection, OpenFlags};
use serde::Serialize;
use tracing::warn;

use crate::mercator::MAX_ZOOM;

/// Base charts paint opaquely; overlays expect to be drawn above one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Base,
    Overlay,
}

/// Row numbering convention of the stored tiles. The reader normalizes
/// rows to XYZ (row 0 north) at the boundary, so nothing past this module
/// ever sees a TMS row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowScheme {
    Xyz,
    Tms,
}

#[derive(Debug, Clone)]
pub struct StoreMetadata {
    pub name: Option<String>,
    pub description: Option<String>,
    pub format: Option<String>,
    pub kind: ChartKind,
    pub scheme: RowScheme,
    pub bounds: Option<Rect<f64>>,
    pub min_zoom: Option<u8>,
    pub max_zoom: Option<u8>,
}

/// Observed tile extent of one populated zoom level, rows normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoomExtent {
    pub zoom: u8,
    pub min_col: i64,
    pub max_col: i64,
    pub min_row: i64,
    pub max_row: i64,
    pub count: u64,
}

/// Read-only accessor over an MBTiles file. The connection is opened once
/// and held for the life of the chart; the store is never mutated.
pub struct TileStore {
    conn: Connection,
    metadata: StoreMetadata,
}

impl TileStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .with_context(|| format!("failed to open mbtiles: {}", path.display()))?;
        apply_read_pragmas(&conn)?;
        let metadata = read_metadata(&conn)?;
        Ok(Self { conn, metadata })
    }

    pub fn metadata(&self) -> &StoreMetadata {
        &self.metadata
    }

    /// Point query for one tile blob. `None` means no row exists, which is
    /// an expected outcome, not an error.
    pub fn tile_blob(&self, zoom: u8, col: u32, row: u32) -> Result<Option<Vec<u8>>> {
        let stored_row = self.stored_row(zoom, row as i64);
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT tile_data FROM tiles \
                 WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
            )
            .context("prepare tile query")?;
        let mut rows = stmt
            .query(params![zoom, col, stored_row])
            .context("query tile")?;
        match rows.next().context("read tile row")? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    pub fn count_tiles(&self, zoom: u8) -> Result<u64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM tiles WHERE zoom_level = ?1",
                [zoom],
                |row| row.get::<_, i64>(0),
            )
            .map(|count| count as u64)
            .context("failed to read tile count for zoom")
    }

    pub fn count_all(&self) -> Result<u64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM tiles", [], |row| row.get::<_, i64>(0))
            .map(|count| count as u64)
            .context("failed to read tile count")
    }

    /// Populated (column, row) addresses at one zoom, rows normalized.
    /// Rows outside the zoom's valid range are dropped.
    pub fn tile_indices(&self, zoom: u8) -> Result<Vec<(u32, u32)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT tile_column, tile_row FROM tiles WHERE zoom_level = ?1")
            .context("prepare index scan")?;
        let mut rows = stmt.query([zoom]).context("query index scan")?;
        let side = 1i64 << zoom;
        let mut indices = Vec::new();
        while let Some(row) = rows.next().context("read index row")? {
            let col: i64 = row.get(0)?;
            let stored_row: i64 = row.get(1)?;
            let norm_row = self.normalized_row(zoom, stored_row);
            if (0..side).contains(&col) && (0..side).contains(&norm_row) {
                indices.push((col as u32, norm_row as u32));
            }
        }
        Ok(indices)
    }

    /// Min/max zoom levels actually present, or `None` for an empty store.
    pub fn observed_zoom_span(&self) -> Result<Option<(u8, u8)>> {
        let (min, max): (Option<i64>, Option<i64>) = self
            .conn
            .query_row(
                "SELECT MIN(zoom_level), MAX(zoom_level) FROM tiles",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .context("failed to read zoom span")?;
        match (min, max) {
            (Some(min), Some(max))
                if (0..=MAX_ZOOM as i64).contains(&min) && (0..=MAX_ZOOM as i64).contains(&max) =>
            {
                Ok(Some((min as u8, max as u8)))
            }
            _ => Ok(None),
        }
    }

    /// Per-zoom observed column/row extents, rows normalized.
    pub fn zoom_extents(&self, min_zoom: u8, max_zoom: u8) -> Result<Vec<ZoomExtent>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT zoom_level, MIN(tile_column), MAX(tile_column), \
                        MIN(tile_row), MAX(tile_row), COUNT(*) \
                 FROM tiles WHERE zoom_level >= ?1 AND zoom_level <= ?2 \
                 GROUP BY zoom_level ORDER BY zoom_level ASC",
            )
            .context("prepare extent scan")?;
        let mut rows = stmt
            .query(params![min_zoom, max_zoom])
            .context("query extent scan")?;
        let mut extents = Vec::new();
        while let Some(row) = rows.next().context("read extent row")? {
            let zoom: u8 = row.get(0)?;
            if zoom > MAX_ZOOM {
                warn!(zoom, "skipping implausible zoom level in tiles table");
                continue;
            }
            let min_col: i64 = row.get(1)?;
            let max_col: i64 = row.get(2)?;
            let stored_min_row: i64 = row.get(3)?;
            let stored_max_row: i64 = row.get(4)?;
            let count: u64 = row.get::<_, i64>(5)? as u64;
            // Flipping swaps which stored row is northernmost.
            let a = self.normalized_row(zoom, stored_min_row);
            let b = self.normalized_row(zoom, stored_max_row);
            extents.push(ZoomExtent {
                zoom,
                min_col,
                max_col,
                min_row: a.min(b),
                max_row: a.max(b),
                count,
            });
        }
        Ok(extents)
    }

    fn stored_row(&self, zoom: u8, row: i64) -> i64 {
        match self.metadata.scheme {
            RowScheme::Xyz => row,
            RowScheme::Tms => (1i64 << zoom) - 1 - row,
        }
    }

    fn normalized_row(&self, zoom: u8, stored_row: i64) -> i64 {
        // The flip is its own inverse.
        self.stored_row(zoom, stored_row)
    }
}

fn apply_read_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA query_only = ON;
        PRAGMA temp_store = MEMORY;
        PRAGMA cache_size = -50000;
        ",
    )
    .context("failed to apply read pragmas")?;
    // locking_mode reports the new mode back as a row, so it cannot ride
    // in the batch above.
    conn.query_row("PRAGMA locking_mode = EXCLUSIVE", [], |_row| Ok(()))
        .context("failed to set exclusive locking mode")?;
    Ok(())
}

fn read_metadata(conn: &Connection) -> Result<StoreMetadata> {
    let mut metadata = StoreMetadata {
        name: None,
        description: None,
        format: None,
        kind: ChartKind::Base,
        scheme: RowScheme::Tms,
        bounds: None,
        min_zoom: None,
        max_zoom: None,
    };

    let mut stmt = conn
        .prepare("SELECT name, value FROM metadata")
        .context("prepare metadata query")?;
    let mut rows = stmt.query([]).context("query metadata")?;
    while let Some(row) = rows.next().context("read metadata row")? {
        let name: String = row.get(0)?;
        let value: String = row.get(1)?;
        match name.as_str() {
            "name" => metadata.name = Some(value),
            "description" => metadata.description = Some(value),
            "format" => metadata.format = Some(value),
            "type" => {
                metadata.kind = if value.eq_ignore_ascii_case("overlay") {
                    ChartKind::Overlay
                } else {
                    ChartKind::Base
                };
            }
            "scheme" => {
                metadata.scheme = if value.eq_ignore_ascii_case("xyz") {
                    RowScheme::Xyz
                } else {
                    RowScheme::Tms
                };
            }
            "bounds" => match parse_bounds(&value) {
                Some(bounds) => metadata.bounds = Some(bounds),
                None => warn!(value = %value, "ignoring malformed bounds metadata"),
            },
            "minzoom" => match value.trim().parse::<u8>() {
                Ok(zoom) => metadata.min_zoom = Some(zoom),
                Err(_) => warn!(value = %value, "ignoring malformed minzoom metadata"),
            },
            "maxzoom" => match value.trim().parse::<u8>() {
                Ok(zoom) => metadata.max_zoom = Some(zoom),
                Err(_) => warn!(value = %value, "ignoring malformed maxzoom metadata"),
            },
            _ => {}
        }
    }
    Ok(metadata)
}

/// Parse "lonMin,latMin,lonMax,latMax". There is some confusion over the
/// corner order of this field in the wild, so corners are normalized by
/// min/max rather than trusted.
fn parse_bounds(value: &str) -> Option<Rect<f64>> {
    let parts: Vec<f64> = value
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;
    if parts.len() != 4 {
        return None;
    }
    let (lon1, lat1, lon2, lat2) = (parts[0], parts[1], parts[2], parts[3]);
    if !parts.iter().all(|v| v.is_finite()) {
        return None;
    }
    Some(Rect::new(
        coord! { x: lon1.min(lon2), y: lat1.min(lat2) },
        coord! { x: lon1.max(lon2), y: lat1.max(lat2) },
    ))
}
