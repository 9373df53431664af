use std::path::Path;

use chart_tiles::coverage::build_coverage;
use chart_tiles::mercator::{tile_latitude, tile_longitude};
use chart_tiles::store::TileStore;
use geo_types::{coord, Rect};

fn create_store(path: &Path, tiles: &[(u8, u32, u32)]) {
    let conn = rusqlite::Connection::open(path).expect("open");
    conn.execute_batch(
        "
        CREATE TABLE metadata (name TEXT, value TEXT);
        CREATE TABLE tiles (
            zoom_level INTEGER,
            tile_column INTEGER,
            tile_row INTEGER,
            tile_data BLOB
        );
        ",
    )
    .expect("schema");
    conn.execute(
        "INSERT INTO metadata (name, value) VALUES ('scheme', 'xyz')",
        [],
    )
    .expect("metadata");

    let mut stmt = conn
        .prepare(
            "INSERT INTO tiles (zoom_level, tile_column, tile_row, tile_data) VALUES (?1, ?2, ?3, x'00')",
        )
        .expect("prepare");
    for (zoom, col, row) in tiles {
        stmt.execute((zoom, col, row)).expect("tile");
    }
}

fn world_extent() -> Rect<f64> {
    Rect::new(coord! { x: -180.0, y: -85.0 }, coord! { x: 180.0, y: 85.0 })
}

#[test]
fn sparse_block_yields_exact_coverage_at_its_zoom() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("input.mbtiles");
    let mut tiles = Vec::new();
    for col in 10..=12u32 {
        for row in 20..=21u32 {
            tiles.push((5u8, col, row));
        }
    }
    create_store(&path, &tiles);

    let store = TileStore::open(&path).expect("open store");
    // Walk from below the populated zoom: empty levels contribute nothing.
    let coverage = build_coverage(&store, &world_extent(), 3, 7).expect("coverage");

    assert_eq!(coverage.canonical_zoom, Some(5));
    assert!(!coverage.region.is_empty());
    // The six tiles coalesce into one rectangle.
    assert_eq!(coverage.region.contour_count(), 1);

    let bounding = coverage.region.bounding().expect("bounding");
    assert!((bounding.min().x - tile_longitude(10, 5)).abs() < 1e-3);
    assert!((bounding.max().x - tile_longitude(13, 5)).abs() < 1e-3);
    assert!((bounding.max().y - tile_latitude(20, 5)).abs() < 1e-3);
    assert!((bounding.min().y - tile_latitude(22, 5)).abs() < 1e-3);

    // Interior and exterior queries agree with the tile block.
    let inside_lon = (tile_longitude(10, 5) + tile_longitude(13, 5)) / 2.0;
    let inside_lat = (tile_latitude(20, 5) + tile_latitude(22, 5)) / 2.0;
    assert!(coverage.region.contains(inside_lon, inside_lat));
    assert!(!coverage.region.contains(inside_lon + 90.0, inside_lat));
    assert!(coverage.region.intersects(&Rect::new(
        coord! { x: inside_lon - 0.1, y: inside_lat - 0.1 },
        coord! { x: inside_lon + 0.1, y: inside_lat + 0.1 },
    )));
    assert!(!coverage.region.intersects(&Rect::new(
        coord! { x: inside_lon + 90.0, y: inside_lat },
        coord! { x: inside_lon + 91.0, y: inside_lat + 1.0 },
    )));
}

#[test]
fn ragged_block_yields_multiple_contours() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("input.mbtiles");
    // An L of tiles: a 2-wide row plus a single tile below its left end.
    create_store(&path, &[(6, 30, 40), (6, 31, 40), (6, 30, 41)]);

    let store = TileStore::open(&path).expect("open store");
    let coverage = build_coverage(&store, &world_extent(), 6, 6).expect("coverage");

    assert_eq!(coverage.canonical_zoom, Some(6));
    assert_eq!(coverage.region.contour_count(), 2);
    assert!(coverage.region.contains(
        (tile_longitude(30, 6) + tile_longitude(31, 6)) / 2.0,
        (tile_latitude(41, 6) + tile_latitude(42, 6)) / 2.0,
    ));
    assert!(!coverage.region.contains(
        (tile_longitude(31, 6) + tile_longitude(32, 6)) / 2.0,
        (tile_latitude(41, 6) + tile_latitude(42, 6)) / 2.0,
    ));
}

#[test]
fn dense_store_falls_back_to_declared_bounds() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("input.mbtiles");
    // Over 1000 tiles at every zoom in range: exact enumeration must
    // never run, and the declared box carries the coverage.
    let mut tiles = Vec::new();
    for zoom in [7u8, 8u8] {
        for col in 0..35u32 {
            for row in 0..30u32 {
                tiles.push((zoom, col, row));
            }
        }
    }
    create_store(&path, &tiles);

    let store = TileStore::open(&path).expect("open store");
    let declared = Rect::new(coord! { x: 5.0, y: 50.0 }, coord! { x: 6.0, y: 51.0 });
    let coverage = build_coverage(&store, &declared, 7, 8).expect("coverage");

    assert_eq!(coverage.canonical_zoom, None);
    assert_eq!(coverage.region.contour_count(), 1);
    let bounding = coverage.region.bounding().expect("bounding");
    assert_eq!(bounding.min().x, 5.0);
    assert_eq!(bounding.max().x, 6.0);
}

#[test]
fn dense_coarse_level_defers_to_first_exact_level() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("input.mbtiles");
    let mut tiles = Vec::new();
    // Zoom 7 is too dense to enumerate; zoom 8 holds one lonely tile.
    for col in 0..35u32 {
        for row in 0..30u32 {
            tiles.push((7u8, col, row));
        }
    }
    tiles.push((8, 60, 60));
    create_store(&path, &tiles);

    let store = TileStore::open(&path).expect("open store");
    let coverage = build_coverage(&store, &world_extent(), 7, 8).expect("coverage");

    // The dense level contributed the declared box, but termination
    // waited for the exact pass at zoom 8.
    assert_eq!(coverage.canonical_zoom, Some(8));
    assert!(coverage
        .region
        .contains(tile_longitude(60, 8) + 1e-4, tile_latitude(61, 8) + 1e-4));
}

#[test]
fn coverage_never_exceeds_declared_bounds() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("input.mbtiles");
    create_store(&path, &[(4, 8, 7), (4, 9, 7)]);

    let store = TileStore::open(&path).expect("open store");
    // Declared bounds cover only part of the populated tiles.
    let west = tile_longitude(8, 4);
    let east = tile_longitude(9, 4);
    let north = tile_latitude(7, 4);
    let south = tile_latitude(8, 4);
    let declared = Rect::new(coord! { x: west, y: south }, coord! { x: east, y: north });
    let coverage = build_coverage(&store, &declared, 4, 4).expect("coverage");

    let bounding = coverage.region.bounding().expect("bounding");
    assert!(bounding.max().x <= east + 1e-9);
    assert!(bounding.min().x >= west - 1e-9);
}

#[test]
fn empty_store_produces_empty_coverage() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("input.mbtiles");
    create_store(&path, &[]);

    let store = TileStore::open(&path).expect("open store");
    let coverage = build_coverage(&store, &world_extent(), 0, 4).expect("coverage");
    assert!(coverage.region.is_empty());
    assert_eq!(coverage.canonical_zoom, None);
}
