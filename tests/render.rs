use std::path::Path;

use anyhow::Result;
use chart_tiles::chart::Chart;
use chart_tiles::loader::{ColorScheme, TILE_SIZE};
use chart_tiles::render::{RenderBackend, TextureHandle, Viewport};
use chart_tiles::software::SoftwareRenderer;
use geo_types::{coord, Rect};
use image::{Rgba, RgbaImage};

/// Backend that records the draw stream without rasterizing anything.
#[derive(Default)]
struct RecordingBackend {
    uploads: usize,
    releases: usize,
    draws: Vec<(TextureHandle, [(f64, f64); 4])>,
}

impl RenderBackend for RecordingBackend {
    fn upload_tile(&mut self, _image: &RgbaImage) -> Result<TextureHandle> {
        self.uploads += 1;
        Ok(TextureHandle(self.uploads as u64))
    }

    fn draw_tile(
        &mut self,
        texture: TextureHandle,
        corners: [(f64, f64); 4],
        _uv: [(f32, f32); 4],
    ) -> Result<()> {
        self.draws.push((texture, corners));
        Ok(())
    }

    fn release_tile(&mut self, _texture: TextureHandle) {
        self.releases += 1;
    }

    fn set_clip_region(&mut self, _contours: &[Vec<(f64, f64)>]) {}

    fn clear_clip_region(&mut self) {}
}

fn png_tile(color: [u8; 4]) -> Vec<u8> {
    let image = RgbaImage::from_pixel(TILE_SIZE, TILE_SIZE, Rgba(color));
    let mut bytes = Vec::new();
    image
        .write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageOutputFormat::Png,
        )
        .expect("encode png");
    bytes
}

fn create_chart(
    path: &Path,
    metadata: &[(&str, &str)],
    tiles: &[(u8, u32, u32, Vec<u8>)],
) {
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
    .expect("scheme");
    for (name, value) in metadata {
        conn.execute(
            "INSERT INTO metadata (name, value) VALUES (?1, ?2)",
            (name, value),
        )
        .expect("metadata");
    }
    let mut stmt = conn
        .prepare(
            "INSERT INTO tiles (zoom_level, tile_column, tile_row, tile_data) VALUES (?1, ?2, ?3, ?4)",
        )
        .expect("prepare");
    for (zoom, col, row, data) in tiles {
        stmt.execute((zoom, col, row, data)).expect("tile");
    }
}

#[test]
fn antimeridian_view_draws_both_sides_in_two_sweeps() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("input.mbtiles");
    // A world band chart with tiles hugging both sides of the date line.
    let tiles = vec![
        (3u8, 0u32, 3u32, png_tile([0, 200, 0, 255])),
        (3, 0, 4, png_tile([0, 200, 0, 255])),
        (3, 7, 3, png_tile([200, 0, 0, 255])),
        (3, 7, 4, png_tile([200, 0, 0, 255])),
    ];
    create_chart(&path, &[("bounds", "-180,-10,180,10")], &tiles);
    let mut chart = Chart::open(&path).expect("open chart");

    let viewport = Viewport {
        center_lat: 0.0,
        center_lon: 180.0,
        scale_ppm: 1.0 / 2800.0,
        rotation: 0.0,
        width: 800,
        height: 600,
    };
    let mut backend = RecordingBackend::default();
    chart
        .render_region(&viewport, None, &mut backend)
        .expect("render");

    // Two rows on each side of the date line.
    assert_eq!(backend.draws.len(), 4);
    let west_of_center = backend
        .draws
        .iter()
        .filter(|(_, corners)| corners[0].0 < 400.0)
        .count();
    let east_of_center = backend
        .draws
        .iter()
        .filter(|(_, corners)| corners[0].0 >= 400.0)
        .count();
    assert_eq!(west_of_center, 2);
    assert_eq!(east_of_center, 2);
}

#[test]
fn antimeridian_frame_has_pixels_on_both_halves() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("input.mbtiles");
    let tiles = vec![
        (3u8, 0u32, 3u32, png_tile([0, 200, 0, 255])),
        (3, 0, 4, png_tile([0, 200, 0, 255])),
        (3, 7, 3, png_tile([200, 0, 0, 255])),
        (3, 7, 4, png_tile([200, 0, 0, 255])),
    ];
    create_chart(&path, &[("bounds", "-180,-10,180,10")], &tiles);
    let mut chart = Chart::open(&path).expect("open chart");

    let viewport = Viewport {
        center_lat: 0.0,
        center_lon: 180.0,
        scale_ppm: 1.0 / 2800.0,
        rotation: 0.0,
        width: 800,
        height: 600,
    };
    let mut backend = SoftwareRenderer::new(800, 600);
    chart
        .render_region(&viewport, None, &mut backend)
        .expect("render");

    let frame = backend.into_image();
    // Column 7 tiles end at the date line in the screen center; column 0
    // tiles continue east of it.
    assert_eq!(frame.get_pixel(350, 300).0, [200, 0, 0, 255]);
    assert_eq!(frame.get_pixel(450, 300).0, [0, 200, 0, 255]);
}

#[test]
fn severely_underzoomed_large_charts_skip_rendering() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("input.mbtiles");
    // 630 tiles, over the bail-out threshold. Blobs never get decoded.
    let mut tiles = Vec::new();
    for col in 0..30u32 {
        for row in 0..21u32 {
            tiles.push((5u8, col, row, vec![0u8]));
        }
    }
    create_chart(&path, &[("bounds", "-170,10,170,84")], &tiles);
    let mut chart = Chart::open(&path).expect("open chart");

    let viewport = Viewport {
        center_lat: 45.0,
        center_lon: 0.0,
        scale_ppm: 1.0 / 100_000.0,
        rotation: 0.0,
        width: 800,
        height: 600,
    };
    let mut backend = RecordingBackend::default();
    chart
        .render_region(&viewport, None, &mut backend)
        .expect("render");
    assert!(backend.draws.is_empty());
    assert_eq!(backend.uploads, 0);
}

#[test]
fn small_charts_still_render_when_underzoomed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("input.mbtiles");
    let tiles = vec![
        (5u8, 16u32, 12u32, png_tile([0, 0, 255, 255])),
        (5, 16, 13, png_tile([0, 0, 255, 255])),
    ];
    create_chart(&path, &[("bounds", "0,30,10,40")], &tiles);
    let mut chart = Chart::open(&path).expect("open chart");

    let viewport = Viewport {
        center_lat: 35.0,
        center_lon: 5.0,
        scale_ppm: 1.0 / 100_000.0,
        rotation: 0.0,
        width: 800,
        height: 600,
    };
    let mut backend = RecordingBackend::default();
    chart
        .render_region(&viewport, None, &mut backend)
        .expect("render");
    assert_eq!(backend.draws.len(), 2);
}

#[test]
fn request_region_limits_the_draw_set() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("input.mbtiles");
    let tiles = vec![
        (5u8, 16u32, 12u32, png_tile([0, 0, 255, 255])),
        (5, 16, 13, png_tile([0, 0, 255, 255])),
    ];
    create_chart(&path, &[("bounds", "0,30,10,40")], &tiles);
    let mut chart = Chart::open(&path).expect("open chart");

    let viewport = Viewport {
        center_lat: 35.0,
        center_lon: 5.0,
        scale_ppm: 1.0 / 100_000.0,
        rotation: 0.0,
        width: 800,
        height: 600,
    };
    // A request box pinched into the northern tile only.
    let request = Rect::new(
        coord! { x: 1.0, y: 38.0 },
        coord! { x: 9.0, y: 40.0 },
    );
    let mut backend = RecordingBackend::default();
    chart
        .render_region(&viewport, Some(&request), &mut backend)
        .expect("render");
    assert_eq!(backend.draws.len(), 1);
}

#[test]
fn progressive_rendering_paints_coarse_levels_first() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("input.mbtiles");
    let tiles = vec![
        (2u8, 2u32, 1u32, png_tile([10, 10, 10, 255])),
        (3, 4, 2, png_tile([20, 20, 20, 255])),
    ];
    create_chart(&path, &[("bounds", "0,0,90,66.5")], &tiles);
    let mut chart = Chart::open(&path).expect("open chart");

    let viewport = Viewport {
        center_lat: 30.0,
        center_lon: 45.0,
        scale_ppm: 1.0 / 15_000.0,
        rotation: 0.0,
        width: 800,
        height: 600,
    };
    let mut backend = RecordingBackend::default();
    chart
        .render_region(&viewport, None, &mut backend)
        .expect("render");

    assert_eq!(backend.draws.len(), 2);
    // The zoom 2 tile was materialized and drawn before the zoom 3 tile.
    assert_eq!(backend.draws[0].0, TextureHandle(1));
    assert_eq!(backend.draws[1].0, TextureHandle(2));

    // Scale bookkeeping tracks the finest zoom actually drawn.
    let expected = 2.0 * 19551.0 / 15_000.0;
    assert!((chart.zoom_scale_factor() - expected).abs() < 1e-6);
}

#[test]
fn scheme_change_flushes_textures_and_rerenders_fresh_ones() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("input.mbtiles");
    let tiles = vec![
        (2u8, 2u32, 1u32, png_tile([10, 10, 10, 255])),
        (3, 4, 2, png_tile([20, 20, 20, 255])),
    ];
    create_chart(&path, &[("bounds", "0,0,90,66.5")], &tiles);
    let mut chart = Chart::open(&path).expect("open chart");

    let viewport = Viewport {
        center_lat: 30.0,
        center_lon: 45.0,
        scale_ppm: 1.0 / 15_000.0,
        rotation: 0.0,
        width: 800,
        height: 600,
    };
    let mut backend = RecordingBackend::default();
    chart
        .render_region(&viewport, None, &mut backend)
        .expect("render");
    assert_eq!(backend.uploads, 2);

    chart.set_color_scheme(ColorScheme::Night, &mut backend);
    assert_eq!(backend.releases, 2);

    // Setting the same scheme again must not flush anything.
    chart.set_color_scheme(ColorScheme::Night, &mut backend);
    assert_eq!(backend.releases, 2);

    chart
        .render_region(&viewport, None, &mut backend)
        .expect("render");
    assert_eq!(backend.uploads, 4);
    assert_eq!(backend.draws.len(), 4);
}
