use std::f64::consts::PI;

use anyhow::Result;
use geo_types::{coord, Rect};
use image::RgbaImage;
use tracing::debug;

use crate::chart::Chart;
use crate::loader::materialize;
use crate::mercator::{tile_column, tile_row, zoom_mpp, zoom_scale, EPSILON};

const EARTH_RADIUS: f64 = 6_378_137.0;
const DEGREE: f64 = PI / 180.0;
// Nominal monitor pixel pitch backing the display-scale heuristics, 0.3 mm.
const DISPLAY_PIXEL_METERS: f64 = 0.0003;

/// Charts with more tiles than this skip rendering entirely when the
/// viewport is severely underzoomed.
const UNDERZOOM_TILE_LIMIT: u64 = 500;
const UNDERZOOM_SCALE_FACTOR: f64 = 20.0;

/// Opaque token for an uploaded tile raster, handed out by the render
/// backend. Exclusively owned by one tile descriptor; released through
/// the pyramid flush paths, never shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u64);

/// The host's GPU renderer and clip collaborator, reduced to the few
/// operations the core needs. Uploads are expected to configure linear
/// filtering and clamp-to-edge wrapping; everything else about the
/// backend is opaque.
pub trait RenderBackend {
    fn upload_tile(&mut self, image: &RgbaImage) -> Result<TextureHandle>;

    /// Draw a textured quad. Corners arrive in NW, NE, SE, SW order as
    /// screen coordinates, with matching texture coordinates.
    fn draw_tile(
        &mut self,
        texture: TextureHandle,
        corners: [(f64, f64); 4],
        uv: [(f32, f32); 4],
    ) -> Result<()>;

    fn release_tile(&mut self, texture: TextureHandle);

    /// Install a screen-space clip region from closed polygon contours.
    fn set_clip_region(&mut self, contours: &[Vec<(f64, f64)>]);

    fn clear_clip_region(&mut self);
}

/// Geographic viewport: center, scale in screen pixels per meter,
/// rotation in radians, pixel dimensions.
#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    pub center_lat: f64,
    pub center_lon: f64,
    pub scale_ppm: f64,
    pub rotation: f64,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    /// Geographic position to screen pixels, Web Mercator around the
    /// viewport center.
    pub fn project(&self, lat: f64, lon: f64) -> (f64, f64) {
        let easting = (lon - self.center_lon) * DEGREE * EARTH_RADIUS;
        let northing = EARTH_RADIUS
            * ((lat * DEGREE).sin().atanh() - (self.center_lat * DEGREE).sin().atanh());

        let dx = easting * self.scale_ppm;
        let dy = northing * self.scale_ppm;
        let (dxr, dyr) = if self.rotation != 0.0 {
            let (sin, cos) = self.rotation.sin_cos();
            (dx * cos + dy * sin, dy * cos - dx * sin)
        } else {
            (dx, dy)
        };

        (
            self.width as f64 / 2.0 + dxr,
            self.height as f64 / 2.0 - dyr,
        )
    }

    /// Screen pixels back to geographic position. Longitudes are relative
    /// to the center and may leave [-180, 180] when the view straddles
    /// the antimeridian; callers handle the wrap.
    pub fn unproject(&self, x: f64, y: f64) -> (f64, f64) {
        let dxr = x - self.width as f64 / 2.0;
        let dyr = self.height as f64 / 2.0 - y;
        let (dx, dy) = if self.rotation != 0.0 {
            let (sin, cos) = self.rotation.sin_cos();
            (dxr * cos - dyr * sin, dxr * sin + dyr * cos)
        } else {
            (dxr, dyr)
        };

        let lon = self.center_lon + dx / self.scale_ppm / (DEGREE * EARTH_RADIUS);
        let center_northing = EARTH_RADIUS * (self.center_lat * DEGREE).sin().atanh();
        let northing = dy / self.scale_ppm + center_northing;
        let lat = (northing / EARTH_RADIUS).tanh().asin() / DEGREE;
        (lat, lon)
    }

    pub fn meters_per_pixel(&self) -> f64 {
        1.0 / self.scale_ppm
    }

    /// Nominal display scale, comparable against [`zoom_scale`] values.
    pub fn display_scale(&self) -> f64 {
        self.meters_per_pixel() / DISPLAY_PIXEL_METERS
    }

    /// Geographic bounding box of the screen: the bbox of the four
    /// unprojected corners, which over-covers for rotated views.
    pub fn geo_box(&self) -> Rect<f64> {
        let corners = [
            self.unproject(0.0, 0.0),
            self.unproject(self.width as f64, 0.0),
            self.unproject(self.width as f64, self.height as f64),
            self.unproject(0.0, self.height as f64),
        ];
        let mut lon_min = f64::MAX;
        let mut lon_max = f64::MIN;
        let mut lat_min = f64::MAX;
        let mut lat_max = f64::MIN;
        for (lat, lon) in corners {
            lon_min = lon_min.min(lon);
            lon_max = lon_max.max(lon);
            lat_min = lat_min.min(lat);
            lat_max = lat_max.max(lat);
        }
        Rect::new(
            coord! { x: lon_min, y: lat_min },
            coord! { x: lon_max, y: lat_max },
        )
    }
}

/// One tile-column sweep of a render pass. `lon_shift` is applied to the
/// viewport reference longitude while drawing the sweep's tiles; the
/// wrapped half of an antimeridian-straddling view gets a ±360 shift.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LonSweep {
    pub col_min: i64,
    pub col_max: i64,
    pub lon_shift: f64,
}

/// Split the requested longitude span into tile-column sweeps at `zoom`.
/// A span inside [-180, 180] yields one sweep; a span straddling the
/// antimeridian yields two sweeps with disjoint column ranges that
/// together cover the full span.
pub fn longitude_sweeps(geo_box: &Rect<f64>, zoom: u8) -> Vec<LonSweep> {
    let side = 1i64 << zoom;
    let clamp = |col: i64| col.clamp(0, side - 1);
    let west = geo_box.min().x;
    let east = geo_box.max().x;

    if east > 180.0 {
        let main = LonSweep {
            col_min: clamp(tile_column(west.max(-180.0), zoom)),
            col_max: clamp(tile_column(180.0 - EPSILON, zoom)),
            lon_shift: 0.0,
        };
        let wrapped = LonSweep {
            col_min: clamp(tile_column(-180.0 + EPSILON, zoom)),
            col_max: clamp(tile_column(east - 360.0, zoom)).min(main.col_min - 1),
            lon_shift: -360.0,
        };
        return sweeps_of(main, wrapped);
    }
    if west < -180.0 {
        let main = LonSweep {
            col_min: clamp(tile_column(-180.0 + EPSILON, zoom)),
            col_max: clamp(tile_column(east.min(180.0), zoom)),
            lon_shift: 0.0,
        };
        let wrapped = LonSweep {
            col_min: clamp(tile_column(west + 360.0, zoom)).max(main.col_max + 1),
            col_max: clamp(tile_column(180.0 - EPSILON, zoom)),
            lon_shift: 360.0,
        };
        return sweeps_of(main, wrapped);
    }
    vec![LonSweep {
        col_min: clamp(tile_column(west, zoom)),
        col_max: clamp(tile_column(east, zoom)),
        lon_shift: 0.0,
    }]
}

fn sweeps_of(main: LonSweep, wrapped: LonSweep) -> Vec<LonSweep> {
    if wrapped.col_min > wrapped.col_max {
        vec![main]
    } else {
        vec![main, wrapped]
    }
}

/// Pick the zoom level to render up to: the coarsest level whose nominal
/// ground resolution beats the viewport resolution scaled by the zoom
/// modifier, or the chart's maximum zoom when none does.
pub fn select_view_zoom(
    viewport_mpp: f64,
    zoom_modifier: i32,
    min_zoom: u8,
    max_zoom: u8,
) -> u8 {
    let modifier = 2.0 * 2f64.powf(zoom_modifier as f64 / 3.0);
    for zoom in min_zoom..=max_zoom {
        if zoom_mpp(zoom) < viewport_mpp * modifier {
            return zoom;
        }
    }
    max_zoom
}

fn boxes_intersect(a: &Rect<f64>, b: &Rect<f64>) -> bool {
    a.min().x < b.max().x && a.max().x > b.min().x && a.min().y < b.max().y && a.max().y > b.min().y
}

impl Chart {
    /// Render the chart into `request` (defaults to the whole screen box)
    /// through `backend`. Best effort: per-tile failures are skipped, and
    /// the pass never aborts the frame.
    pub fn render_region(
        &mut self,
        viewport: &Viewport,
        request: Option<&Rect<f64>>,
        backend: &mut dyn RenderBackend,
    ) -> Result<()> {
        // Severely underzoomed large charts are not worth the walk.
        if viewport.display_scale() > UNDERZOOM_SCALE_FACTOR * zoom_scale(self.min_zoom())
            && self.tile_count() > UNDERZOOM_TILE_LIMIT
        {
            return Ok(());
        }

        let screen_box = viewport.geo_box();
        let straddles = (screen_box.min().x < -180.0 && screen_box.max().x > -180.0)
            || (screen_box.min().x < 180.0 && screen_box.max().x > 180.0);
        let request_box = request.copied().unwrap_or(screen_box);
        // Straddling views enumerate tiles over the whole screen so both
        // sweeps see their half of the span.
        let sweep_box = if straddles { screen_box } else { request_box };

        // Straddling views draw tiles under two reference longitudes, so
        // the clip region needs a contour copy per shift. Off-screen
        // copies cannot flip the even-odd parity of on-screen points.
        let clip_shifts: &[f64] = if screen_box.max().x > 180.0 {
            &[0.0, -360.0]
        } else if screen_box.min().x < -180.0 {
            &[0.0, 360.0]
        } else {
            &[0.0]
        };
        let mut contours: Vec<Vec<(f64, f64)>> = Vec::new();
        for shift in clip_shifts {
            let mut shifted_viewport = *viewport;
            shifted_viewport.center_lon += shift;
            contours.extend(self.coverage_region().contours().iter().map(|polygon| {
                polygon
                    .exterior()
                    .0
                    .iter()
                    .map(|point| shifted_viewport.project(point.y, point.x))
                    .collect()
            }));
        }
        backend.set_clip_region(&contours);

        let view_zoom = select_view_zoom(
            viewport.meters_per_pixel(),
            self.zoom_modifier,
            self.min_zoom(),
            self.max_zoom(),
        );

        // Coarse levels paint first so finer data overdraws their gaps.
        let mut finest_drawn = self.min_zoom();
        for zoom in self.min_zoom()..=view_zoom {
            for sweep in longitude_sweeps(&sweep_box, zoom) {
                let mut sweep_viewport = *viewport;
                sweep_viewport.center_lon += sweep.lon_shift;
                // Tiles carry real-world longitudes; translate them into
                // the request frame for the visibility test.
                let frame_shift = -sweep.lon_shift;

                let Some(level) = self.pyramid.level_mut(zoom) else {
                    continue;
                };
                let row_top = tile_row(sweep_box.max().y, zoom).max(level.row_min);
                let row_bottom = tile_row(sweep_box.min().y, zoom).min(level.row_max);

                for row in row_top..=row_bottom {
                    for col in sweep.col_min..=sweep.col_max {
                        let Some(tile) = level.lookup_or_create(col, row) else {
                            continue;
                        };
                        let geometry = tile.geometry();
                        let tile_box = Rect::new(
                            coord! { x: geometry.lon_min + frame_shift, y: geometry.lat_min },
                            coord! { x: geometry.lon_max + frame_shift, y: geometry.lat_max },
                        );
                        if !boxes_intersect(&tile_box, &request_box) {
                            continue;
                        }

                        let handle = match materialize(tile, &self.store, self.scheme, backend) {
                            Ok(Some(handle)) => handle,
                            Ok(None) => continue,
                            Err(err) => {
                                debug!(zoom, col, row, "tile materialize failed: {err:#}");
                                continue;
                            }
                        };

                        let nw = sweep_viewport.project(geometry.lat_max, geometry.lon_min);
                        let ne = sweep_viewport.project(geometry.lat_max, geometry.lon_max);
                        let se = sweep_viewport.project(geometry.lat_min, geometry.lon_max);
                        let sw = sweep_viewport.project(geometry.lat_min, geometry.lon_min);
                        let uv = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)];
                        match backend.draw_tile(handle, [nw, ne, se, sw], uv) {
                            Ok(()) => finest_drawn = finest_drawn.max(zoom),
                            Err(err) => debug!(zoom, col, row, "tile draw failed: {err:#}"),
                        }
                    }
                }
            }
        }

        self.zoom_scale_factor = 2.0 * zoom_mpp(finest_drawn) * viewport.scale_ppm;
        backend.clear_clip_region();
        Ok(())
    }
}
