use std::io::Read;

use anyhow::Result;
use flate2::read::GzDecoder;
use image::{imageops, Rgba, RgbaImage};
use tracing::debug;

use crate::pyramid::TileDescriptor;
use crate::render::{RenderBackend, TextureHandle};
use crate::store::TileStore;

/// Every texture is exactly this many pixels on a side; other native
/// sizes (512x512 HiDPI tiles and the like) are resampled down.
pub const TILE_SIZE: u32 = 256;

/// Global display color scheme. Anything other than normal day rendering
/// dims the HSV value channel of every tile pixel by a fixed factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorScheme {
    Rgb,
    Day,
    Dusk,
    Night,
}

impl ColorScheme {
    fn dim_factor(self) -> Option<f32> {
        match self {
            ColorScheme::Rgb | ColorScheme::Day => None,
            ColorScheme::Dusk => Some(0.8),
            ColorScheme::Night => Some(0.3),
        }
    }
}

/// Produce the tile's texture handle, creating it on first use.
///
/// Soft failures resolve to `Ok(None)`, meaning draw nothing for this
/// tile: a store miss (cached on the descriptor so the store is never
/// asked again) or a decode failure (left retryable, since only the
/// store is authoritative about availability). Backend upload failure is
/// the one hard error and propagates.
pub fn materialize(
    tile: &mut TileDescriptor,
    store: &TileStore,
    scheme: ColorScheme,
    backend: &mut dyn RenderBackend,
) -> Result<Option<TextureHandle>> {
    if let Some(handle) = tile.texture {
        return Ok(Some(handle));
    }
    if !tile.available {
        return Ok(None);
    }

    let Some(blob) = store.tile_blob(tile.zoom, tile.col, tile.row)? else {
        tile.available = false;
        return Ok(None);
    };
    let Some(mut image) = decode_raster(&blob) else {
        debug!(
            zoom = tile.zoom,
            col = tile.col,
            row = tile.row,
            "tile decode failed"
        );
        return Ok(None);
    };

    process_pixels(&mut image, scheme);

    let handle = backend.upload_tile(&image)?;
    tile.texture = Some(handle);
    Ok(Some(handle))
}

/// Decompress and decode a tile blob into a TILE_SIZE square RGBA raster.
/// `None` for anything undecodable.
fn decode_raster(blob: &[u8]) -> Option<RgbaImage> {
    let payload = decompress(blob)?;
    let decoded = image::load_from_memory(&payload).ok()?;
    let mut raster = decoded.to_rgba8();
    if raster.dimensions() != (TILE_SIZE, TILE_SIZE) {
        raster = imageops::resize(&raster, TILE_SIZE, TILE_SIZE, imageops::FilterType::Triangle);
    }
    Some(raster)
}

fn decompress(data: &[u8]) -> Option<Vec<u8>> {
    if data.starts_with(&[0x1f, 0x8b]) {
        let mut decoder = GzDecoder::new(data);
        let mut decoded = Vec::new();
        decoder.read_to_end(&mut decoded).ok()?;
        Some(decoded)
    } else {
        Some(data.to_vec())
    }
}

/// Per-pixel pass: scheme dimming plus no-data alpha synthesis.
///
/// Some tile producers mark blank cells with RGB (1,0,0) instead of real
/// transparency; those pixels are forced to alpha 0. The sentinel is
/// tested on the raw value before any tinting, so it survives every
/// color scheme.
fn process_pixels(image: &mut RgbaImage, scheme: ColorScheme) {
    let dim = scheme.dim_factor();
    for pixel in image.pixels_mut() {
        let [r, g, b, a] = pixel.0;
        let no_data = r == 1 && g == 0 && b == 0;
        let (r, g, b) = match dim {
            Some(factor) => dim_rgb(r, g, b, factor),
            None => (r, g, b),
        };
        let a = if no_data { 0 } else { a };
        *pixel = Rgba([r, g, b, a]);
    }
}

fn dim_rgb(r: u8, g: u8, b: u8, factor: f32) -> (u8, u8, u8) {
    let (h, s, v) = rgb_to_hsv(r, g, b);
    hsv_to_rgb(h, s, v * factor)
}

/// RGB to HSV; hue in degrees [0, 360), saturation and value in [0, 1].
fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let r = r as f32 / 255.0;
    let g = g as f32 / 255.0;
    let b = b as f32 / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta).rem_euclid(6.0))
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let s = if max == 0.0 { 0.0 } else { delta / max };
    (h, s, max)
}

/// HSV back to RGB, the inverse of [`rgb_to_hsv`].
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (u8, u8, u8) {
    let h = h.rem_euclid(360.0);
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = if h < 60.0 {
        (c, x, 0.0)
    } else if h < 120.0 {
        (x, c, 0.0)
    } else if h < 180.0 {
        (0.0, c, x)
    } else if h < 240.0 {
        (0.0, x, c)
    } else if h < 300.0 {
        (x, 0.0, c)
    } else {
        (c, 0.0, x)
    };

    (
        ((r + m) * 255.0).round() as u8,
        ((g + m) * 255.0).round() as u8,
        ((b + m) * 255.0).round() as u8,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hsv_roundtrips_primaries_and_grays() {
        for (r, g, b) in [(255, 0, 0), (0, 255, 0), (0, 0, 255), (128, 128, 128), (0, 0, 0)] {
            let (h, s, v) = rgb_to_hsv(r, g, b);
            assert_eq!(hsv_to_rgb(h, s, v), (r, g, b));
        }
    }

    #[test]
    fn night_dims_value_channel() {
        let (r, g, b) = dim_rgb(200, 100, 50, 0.3);
        let (_, _, v) = rgb_to_hsv(r, g, b);
        let expected = 200.0 / 255.0 * 0.3;
        assert!((v - expected).abs() < 0.01);
    }

    #[test]
    fn sentinel_forces_alpha_zero_under_every_scheme() {
        for scheme in [
            ColorScheme::Rgb,
            ColorScheme::Day,
            ColorScheme::Dusk,
            ColorScheme::Night,
        ] {
            let mut image = RgbaImage::from_pixel(2, 1, Rgba([1, 0, 0, 255]));
            image.put_pixel(1, 0, Rgba([10, 20, 30, 200]));
            process_pixels(&mut image, scheme);
            assert_eq!(image.get_pixel(0, 0).0[3], 0);
            assert_eq!(image.get_pixel(1, 0).0[3], 200);
        }
    }

    #[test]
    fn plain_payloads_pass_through_decompress() {
        assert_eq!(decompress(&[1, 2, 3]), Some(vec![1, 2, 3]));
    }
}
