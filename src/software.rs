use std::collections::HashMap;

use anyhow::{bail, Result};
use image::RgbaImage;

use crate::render::{RenderBackend, TextureHandle};

/// CPU stand-in for the host's GPU renderer: keeps uploaded tiles in a
/// table, rasterizes textured quads into an RGBA frame with source-over
/// blending, and honors a polygon clip region with even-odd filling.
/// Used by the CLI's render command and by tests; not a rendering
/// product in itself.
pub struct SoftwareRenderer {
    frame: RgbaImage,
    textures: HashMap<u64, RgbaImage>,
    next_handle: u64,
    clip: Option<Vec<Vec<(f64, f64)>>>,
}

impl SoftwareRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            frame: RgbaImage::new(width, height),
            textures: HashMap::new(),
            next_handle: 1,
            clip: None,
        }
    }

    pub fn into_image(self) -> RgbaImage {
        self.frame
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    fn visible(&self, x: f64, y: f64) -> bool {
        match &self.clip {
            None => true,
            Some(contours) => point_in_contours(contours, x, y),
        }
    }

    fn fill_triangle(
        &mut self,
        texture: &RgbaImage,
        points: [(f64, f64); 3],
        uv: [(f32, f32); 3],
    ) {
        let [(x0, y0), (x1, y1), (x2, y2)] = points;
        let det = (y1 - y2) * (x0 - x2) + (x2 - x1) * (y0 - y2);
        if det.abs() < 1e-12 {
            return;
        }

        let (width, height) = self.frame.dimensions();
        let min_x = x0.min(x1).min(x2).floor().max(0.0) as u32;
        let max_x = (x0.max(x1).max(x2).ceil() as i64).clamp(0, width as i64 - 1) as u32;
        let min_y = y0.min(y1).min(y2).floor().max(0.0) as u32;
        let max_y = (y0.max(y1).max(y2).ceil() as i64).clamp(0, height as i64 - 1) as u32;
        if min_x > max_x || min_y > max_y {
            return;
        }

        let (tex_w, tex_h) = texture.dimensions();
        for py in min_y..=max_y {
            for px in min_x..=max_x {
                let cx = px as f64 + 0.5;
                let cy = py as f64 + 0.5;
                let l0 = ((y1 - y2) * (cx - x2) + (x2 - x1) * (cy - y2)) / det;
                let l1 = ((y2 - y0) * (cx - x2) + (x0 - x2) * (cy - y2)) / det;
                let l2 = 1.0 - l0 - l1;
                if l0 < -1e-9 || l1 < -1e-9 || l2 < -1e-9 {
                    continue;
                }
                if !self.visible(cx, cy) {
                    continue;
                }

                let u = l0 * uv[0].0 as f64 + l1 * uv[1].0 as f64 + l2 * uv[2].0 as f64;
                let v = l0 * uv[0].1 as f64 + l1 * uv[1].1 as f64 + l2 * uv[2].1 as f64;
                let tx = ((u * tex_w as f64 - 0.5).round() as i64).clamp(0, tex_w as i64 - 1);
                let ty = ((v * tex_h as f64 - 0.5).round() as i64).clamp(0, tex_h as i64 - 1);
                let src = texture.get_pixel(tx as u32, ty as u32).0;

                let dst = self.frame.get_pixel_mut(px, py);
                blend_over(&mut dst.0, src);
            }
        }
    }
}

impl RenderBackend for SoftwareRenderer {
    fn upload_tile(&mut self, image: &RgbaImage) -> Result<TextureHandle> {
        let handle = TextureHandle(self.next_handle);
        self.next_handle += 1;
        self.textures.insert(handle.0, image.clone());
        Ok(handle)
    }

    fn draw_tile(
        &mut self,
        texture: TextureHandle,
        corners: [(f64, f64); 4],
        uv: [(f32, f32); 4],
    ) -> Result<()> {
        let Some(image) = self.textures.get(&texture.0).cloned() else {
            bail!("draw with unknown texture handle {}", texture.0);
        };
        let [nw, ne, se, sw] = corners;
        self.fill_triangle(&image, [nw, ne, se], [uv[0], uv[1], uv[2]]);
        self.fill_triangle(&image, [nw, se, sw], [uv[0], uv[2], uv[3]]);
        Ok(())
    }

    fn release_tile(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
    }

    fn set_clip_region(&mut self, contours: &[Vec<(f64, f64)>]) {
        self.clip = Some(contours.to_vec());
    }

    fn clear_clip_region(&mut self) {
        self.clip = None;
    }
}

fn blend_over(dst: &mut [u8; 4], src: [u8; 4]) {
    let sa = src[3] as u32;
    if sa == 0 {
        return;
    }
    for channel in 0..3 {
        dst[channel] =
            ((src[channel] as u32 * sa + dst[channel] as u32 * (255 - sa)) / 255) as u8;
    }
    dst[3] = (sa + dst[3] as u32 * (255 - sa) / 255).min(255) as u8;
}

/// Even-odd test against a set of closed contours.
fn point_in_contours(contours: &[Vec<(f64, f64)>], x: f64, y: f64) -> bool {
    let mut inside = false;
    for ring in contours {
        for window in ring.windows(2) {
            let (x1, y1) = window[0];
            let (x2, y2) = window[1];
            if (y1 > y) != (y2 > y) && x < (x2 - x1) * (y - y1) / (y2 - y1) + x1 {
                inside = !inside;
            }
        }
    }
    inside
}
