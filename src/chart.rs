use std::path::Path;

use anyhow::{Context, Result};
use geo_types::Rect;
use serde::Serialize;
use tracing::{debug, warn};

use crate::coverage::{build_coverage, derive_extent, reconcile_zoom_range, Coverage, CoverageRegion};
use crate::loader::ColorScheme;
use crate::pyramid::TilePyramid;
use crate::render::RenderBackend;
use crate::store::{ChartKind, RowScheme, TileStore};

/// Declared geographic extent of the chart, for hosts that think in
/// compass edges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Extent {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoomCount {
    pub zoom: u8,
    pub count: u64,
}

/// Load-time summary of one chart, serializable for host reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartReport {
    pub name: Option<String>,
    pub description: Option<String>,
    pub format: Option<String>,
    pub kind: ChartKind,
    pub scheme: RowScheme,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub extent: Extent,
    pub tile_count: u64,
    pub tiles_by_zoom: Vec<ZoomCount>,
    pub coverage_contours: usize,
    pub coverage_zoom: Option<u8>,
}

/// One loaded raster chart: the read-only store, the reconciled extent
/// and zoom range, the lazily populated tile pyramid and the coverage
/// region derived at load time.
pub struct Chart {
    pub(crate) store: TileStore,
    min_zoom: u8,
    max_zoom: u8,
    extent: Rect<f64>,
    pub(crate) pyramid: TilePyramid,
    coverage: Coverage,
    pub(crate) scheme: ColorScheme,
    /// Host display preference nudging zoom selection, in thirds of a
    /// zoom level; 0 is neutral.
    pub zoom_modifier: i32,
    total_tiles: u64,
    pub(crate) zoom_scale_factor: f64,
}

impl Chart {
    /// Open a chart and run the one-shot load work: metadata parsing,
    /// zoom and bounds reconciliation against the actual tiles, pyramid
    /// preparation and coverage derivation. Any failure here means the
    /// chart is unusable; nothing is half-loaded.
    pub fn open(path: &Path) -> Result<Self> {
        let store = TileStore::open(path)?;

        let observed = store
            .observed_zoom_span()
            .context("failed to probe stored zoom levels")?;
        let metadata = store.metadata();
        let declared = (metadata.min_zoom, metadata.max_zoom);
        let (min_zoom, max_zoom) = reconcile_zoom_range(declared.0, declared.1, observed);
        if declared.0.is_some_and(|z| z != min_zoom) || declared.1.is_some_and(|z| z != max_zoom) {
            warn!(
                declared_min = declared.0,
                declared_max = declared.1,
                min_zoom,
                max_zoom,
                "declared zoom range disagrees with stored tiles"
            );
        }

        let extent = match metadata.bounds {
            Some(bounds) => bounds,
            None => {
                warn!("no declared bounds, deriving extent from stored tiles");
                let extents = store
                    .zoom_extents(min_zoom, max_zoom)
                    .context("failed to scan per-zoom tile extents")?;
                derive_extent(&extents).context("store holds no tiles in its zoom range")?
            }
        };

        let pyramid = TilePyramid::prepare(min_zoom, max_zoom, &extent);
        let coverage = build_coverage(&store, &extent, min_zoom, max_zoom)
            .context("failed to derive coverage region")?;
        let total_tiles = store.count_all()?;
        debug!(
            min_zoom,
            max_zoom,
            total_tiles,
            contours = coverage.region.contour_count(),
            canonical_zoom = coverage.canonical_zoom,
            "chart loaded"
        );

        Ok(Self {
            store,
            min_zoom,
            max_zoom,
            extent,
            pyramid,
            coverage,
            scheme: ColorScheme::Day,
            zoom_modifier: 0,
            total_tiles,
            zoom_scale_factor: 0.0,
        })
    }

    pub fn min_zoom(&self) -> u8 {
        self.min_zoom
    }

    pub fn max_zoom(&self) -> u8 {
        self.max_zoom
    }

    pub fn extent(&self) -> Extent {
        Extent {
            north: self.extent.max().y,
            south: self.extent.min().y,
            east: self.extent.max().x,
            west: self.extent.min().x,
        }
    }

    /// Where the chart actually holds data; the host clips rendering to
    /// this and answers "is this chart valid here" from it.
    pub fn coverage_region(&self) -> &CoverageRegion {
        &self.coverage.region
    }

    /// Zoom level whose exact tile union became the coverage, if any
    /// level was cheap enough to enumerate.
    pub fn coverage_zoom(&self) -> Option<u8> {
        self.coverage.canonical_zoom
    }

    pub fn tile_count(&self) -> u64 {
        self.total_tiles
    }

    pub fn color_scheme(&self) -> ColorScheme {
        self.scheme
    }

    /// Change the display scheme. Textures carry baked-in tinting, so an
    /// actual change releases them all; cached geometry survives.
    pub fn set_color_scheme(&mut self, scheme: ColorScheme, backend: &mut dyn RenderBackend) {
        if self.scheme != scheme {
            self.scheme = scheme;
            self.pyramid.flush_textures(backend);
        }
    }

    /// Scale-factor bookkeeping from the last render pass: the ratio of
    /// the finest drawn zoom's nominal resolution to the viewport's.
    pub fn zoom_scale_factor(&self) -> f64 {
        self.zoom_scale_factor
    }

    /// Teardown: release every texture and drop every descriptor.
    pub fn flush_all(&mut self, backend: &mut dyn RenderBackend) {
        self.pyramid.flush_all(backend);
    }

    pub fn store(&self) -> &TileStore {
        &self.store
    }

    pub fn report(&self) -> Result<ChartReport> {
        let metadata = self.store.metadata();
        let mut tiles_by_zoom = Vec::new();
        for zoom in self.min_zoom..=self.max_zoom {
            let count = self.store.count_tiles(zoom)?;
            if count > 0 {
                tiles_by_zoom.push(ZoomCount { zoom, count });
            }
        }
        Ok(ChartReport {
            name: metadata.name.clone(),
            description: metadata.description.clone(),
            format: metadata.format.clone(),
            kind: metadata.kind,
            scheme: metadata.scheme,
            min_zoom: self.min_zoom,
            max_zoom: self.max_zoom,
            extent: self.extent(),
            tile_count: self.total_tiles,
            tiles_by_zoom,
            coverage_contours: self.coverage.region.contour_count(),
            coverage_zoom: self.coverage.canonical_zoom,
        })
    }
}
