//! Software surface backed by an RGBA buffer.
//!
//! Lines are round-capped and drawn without anti-aliasing: a pixel is covered
//! when its center lies within half the line width of the segment. That keeps
//! rasters bit-exact across runs, which replay comparisons rely on.

use image::{Rgba as Pixel, RgbaImage};
use inkboard_shared::Point;

use crate::surface::{parse_color, Rgba, Surface};

pub struct RasterSurface {
    image: RgbaImage,
}

impl RasterSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::from_pixel(width, height, Pixel(Rgba::TRANSPARENT.0)),
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        if x >= self.image.width() || y >= self.image.height() {
            return None;
        }
        Some(Rgba(self.image.get_pixel(x, y).0))
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn is_blank(&self) -> bool {
        self.image.pixels().all(|pixel| pixel.0[3] == 0)
    }

    fn blend(&mut self, x: u32, y: u32, color: Rgba) {
        let dst = self.image.get_pixel_mut(x, y);
        *dst = Pixel(source_over(color.0, dst.0));
    }
}

fn source_over(src: [u8; 4], dst: [u8; 4]) -> [u8; 4] {
    match src[3] {
        255 => src,
        0 => dst,
        _ => {
            let sa = src[3] as f32 / 255.0;
            let da = dst[3] as f32 / 255.0;
            let out_a = sa + da * (1.0 - sa);
            let mut out = [0u8; 4];
            for i in 0..3 {
                let c = (src[i] as f32 * sa + dst[i] as f32 * da * (1.0 - sa)) / out_a;
                out[i] = c.round().clamp(0.0, 255.0) as u8;
            }
            out[3] = (out_a * 255.0).round() as u8;
            out
        }
    }
}

fn distance_to_segment(px: f32, py: f32, from: Point, to: Point) -> f32 {
    let dx = to.x - from.x;
    let dy = to.y - from.y;
    let length_sq = dx * dx + dy * dy;
    let t = if length_sq == 0.0 {
        0.0
    } else {
        (((px - from.x) * dx + (py - from.y) * dy) / length_sq).clamp(0.0, 1.0)
    };
    let cx = from.x + t * dx - px;
    let cy = from.y + t * dy - py;
    (cx * cx + cy * cy).sqrt()
}

fn span(lo: f32, hi: f32, limit: u32) -> std::ops::Range<u32> {
    let start = lo.floor().max(0.0) as u32;
    let end = (hi.ceil().max(0.0) as u32).min(limit);
    start.min(end)..end
}

impl Surface for RasterSurface {
    fn width(&self) -> u32 {
        self.image.width()
    }

    fn height(&self) -> u32 {
        self.image.height()
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.image = RgbaImage::from_pixel(width, height, Pixel(Rgba::TRANSPARENT.0));
    }

    fn clear(&mut self) {
        for pixel in self.image.pixels_mut() {
            *pixel = Pixel(Rgba::TRANSPARENT.0);
        }
    }

    fn stroke_line(&mut self, from: Point, to: Point, color: &str, width: f32) {
        let color = parse_color(color).unwrap_or_else(|| {
            log::debug!("unparseable stroke color {color:?}, using black");
            Rgba::BLACK
        });
        let radius = width.max(0.0) / 2.0;
        if radius == 0.0 || color.0[3] == 0 {
            return;
        }
        let xs = span(from.x.min(to.x) - radius, from.x.max(to.x) + radius, self.width());
        let ys = span(from.y.min(to.y) - radius, from.y.max(to.y) + radius, self.height());
        for y in ys {
            for x in xs.clone() {
                let distance = distance_to_segment(x as f32 + 0.5, y as f32 + 0.5, from, to);
                if distance <= radius {
                    self.blend(x, y, color);
                }
            }
        }
    }

    fn draw_image(&mut self, image: &RgbaImage, x: f32, y: f32, width: f32, height: f32) {
        if width <= 0.0 || height <= 0.0 || image.width() == 0 || image.height() == 0 {
            return;
        }
        let (src_w, src_h) = image.dimensions();
        for py in span(y, y + height, self.height()) {
            let v = (py as f32 + 0.5 - y) / height;
            if !(0.0..1.0).contains(&v) {
                continue;
            }
            let sy = ((v * src_h as f32) as u32).min(src_h - 1);
            for px in span(x, x + width, self.width()) {
                let u = (px as f32 + 0.5 - x) / width;
                if !(0.0..1.0).contains(&u) {
                    continue;
                }
                let sx = ((u * src_w as f32) as u32).min(src_w - 1);
                self.blend(px, py, Rgba(image.get_pixel(sx, sy).0));
            }
        }
    }
}
