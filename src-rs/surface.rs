//! 2D drawing surface the overlay renderer paints on.
//!
//! [`RasterSurface`] is the only production implementation: an RGBA buffer
//! with bitmap (`font8x8`) text. Text metrics are derived from the glyph
//! grid, so measurement is deterministic.
//!
//! Coordinates may lie arbitrarily far off the surface. Every extent is
//! clipped while still in `f64`, so painting work is bounded by the surface
//! size.

use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::imageops::FilterType;
use image::{Rgba, RgbaImage};

use crate::geometry::DrawRect;

const GLYPH_PX: i32 = 8;

pub trait Surface {
    /// Clear all pixels and set the new size.
    fn reset(&mut self, width: u32, height: u32);

    /// Paint `image` stretched to cover the whole surface.
    fn draw_image(&mut self, image: &RgbaImage);

    /// Outline centered on the rectangle edges.
    fn stroke_rect(&mut self, rect: DrawRect, color: Rgba<u8>, line_width: f64);

    fn fill_rect(&mut self, rect: DrawRect, color: Rgba<u8>);

    fn measure_text(&self, text: &str, font_size: f64) -> f64;

    /// `baseline` is the y coordinate the glyphs sit on.
    fn fill_text(&mut self, text: &str, x: f64, baseline: f64, font_size: f64, color: Rgba<u8>);
}

#[derive(Debug, Clone, Default)]
pub struct RasterSurface {
    pixels: RgbaImage,
}

impl RasterSurface {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn image(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn into_image(self) -> RgbaImage {
        self.pixels
    }

    fn blend_at(&mut self, x: i32, y: i32, color: Rgba<u8>) {
        if x < 0 || y < 0 || x >= self.pixels.width() as i32 || y >= self.pixels.height() as i32 {
            return;
        }
        let dst = *self.pixels.get_pixel(x as u32, y as u32);
        self.pixels
            .put_pixel(x as u32, y as u32, blend_pixel(dst, color));
    }

    fn hline(&mut self, x0: i32, x1: i32, y: i32, color: Rgba<u8>) {
        let last = self.pixels.width() as i32 - 1;
        for x in x0.max(0)..=x1.min(last) {
            self.blend_at(x, y, color);
        }
    }

    fn vline(&mut self, x: i32, y0: i32, y1: i32, color: Rgba<u8>) {
        let last = self.pixels.height() as i32 - 1;
        for y in y0.max(0)..=y1.min(last) {
            self.blend_at(x, y, color);
        }
    }
}

impl Surface for RasterSurface {
    fn reset(&mut self, width: u32, height: u32) {
        self.pixels = RgbaImage::new(width, height);
    }

    fn draw_image(&mut self, image: &RgbaImage) {
        let (w, h) = self.pixels.dimensions();
        if w == 0 || h == 0 || image.width() == 0 || image.height() == 0 {
            return;
        }
        // The surface is freshly cleared and fully covered, so copying the
        // resampled pixels is the same as compositing them.
        self.pixels = if image.dimensions() == (w, h) {
            image.clone()
        } else {
            image::imageops::resize(image, w, h, FilterType::Triangle)
        };
    }

    fn stroke_rect(&mut self, rect: DrawRect, color: Rgba<u8>, line_width: f64) {
        let (w, h) = self.pixels.dimensions();
        if w == 0 || h == 0 || rect.width <= 0.0 || rect.height <= 0.0 {
            return;
        }
        let thickness = line_width.round().clamp(1.0, f64::from(w.max(h)));
        let half = line_width / 2.0;
        // Past one ring width outside the surface an edge is invisible either way.
        let margin = thickness + 1.0;
        let (max_x, max_y) = (f64::from(w) + margin, f64::from(h) + margin);
        let x0 = snap(rect.x - half, -margin, max_x);
        let y0 = snap(rect.y - half, -margin, max_y);
        let x1 = snap(rect.right() + half, -margin, max_x) - 1;
        let y1 = snap(rect.bottom() + half, -margin, max_y) - 1;

        for ring in 0..thickness as i32 {
            let (rx0, ry0, rx1, ry1) = (x0 + ring, y0 + ring, x1 - ring, y1 - ring);
            if rx0 > rx1 || ry0 > ry1 {
                break;
            }
            self.hline(rx0, rx1, ry0, color);
            if ry1 != ry0 {
                self.hline(rx0, rx1, ry1, color);
            }
            if ry1 - ry0 > 1 {
                self.vline(rx0, ry0 + 1, ry1 - 1, color);
                if rx1 != rx0 {
                    self.vline(rx1, ry0 + 1, ry1 - 1, color);
                }
            }
        }
    }

    fn fill_rect(&mut self, rect: DrawRect, color: Rgba<u8>) {
        let (w, h) = self.pixels.dimensions();
        if w == 0 || h == 0 {
            return;
        }
        let min_x = clamp_i32(rect.x.round() as i32, 0, w as i32);
        let max_x = clamp_i32(rect.right().round() as i32, 0, w as i32);
        let min_y = clamp_i32(rect.y.round() as i32, 0, h as i32);
        let max_y = clamp_i32(rect.bottom().round() as i32, 0, h as i32);
        for y in min_y..max_y {
            for x in min_x..max_x {
                self.blend_at(x, y, color);
            }
        }
    }

    fn measure_text(&self, text: &str, font_size: f64) -> f64 {
        text.chars().count() as f64 * f64::from(GLYPH_PX) * f64::from(glyph_scale(font_size))
    }

    fn fill_text(&mut self, text: &str, x: f64, baseline: f64, font_size: f64, color: Rgba<u8>) {
        let (w, h) = self.pixels.dimensions();
        if w == 0 || h == 0 {
            return;
        }
        let (w, h) = (i64::from(w), i64::from(h));
        let scale = i64::from(glyph_scale(font_size));
        let advance = i64::from(GLYPH_PX) * scale;
        let top = (baseline - advance as f64).round();
        if top >= h as f64 || top + advance as f64 <= 0.0 {
            return;
        }
        let top = top as i64;
        let start = x.round();

        for (index, ch) in text.chars().enumerate() {
            let cell_x = start + (index as i64 * advance) as f64;
            if cell_x >= w as f64 {
                break;
            }
            if cell_x + advance as f64 <= 0.0 {
                continue;
            }
            let cell_x = cell_x as i64;
            let Some(glyph) = BASIC_FONTS.get(ch).or_else(|| BASIC_FONTS.get('?')) else {
                continue;
            };
            for (row_idx, row) in glyph.iter().enumerate() {
                let py = top + row_idx as i64 * scale;
                let (y0, y1) = (py.max(0), (py + scale).min(h));
                if y0 >= y1 {
                    continue;
                }
                for col_idx in 0..i64::from(GLYPH_PX) {
                    if (*row >> col_idx) & 1 == 0 {
                        continue;
                    }
                    let px = cell_x + col_idx * scale;
                    for y in y0..y1 {
                        for x in px.max(0)..(px + scale).min(w) {
                            self.blend_at(x as i32, y as i32, color);
                        }
                    }
                }
            }
        }
    }
}

/// Largest magnification of the 8x8 glyph grid that stays within
/// `font_size` pixels, at least 1.
pub fn glyph_scale(font_size: f64) -> i32 {
    (font_size / f64::from(GLYPH_PX)).floor().max(1.0) as i32
}

/// Round and clamp a coordinate into `[lo, hi]` before it becomes a pixel index.
fn snap(value: f64, lo: f64, hi: f64) -> i32 {
    value.round().clamp(lo, hi) as i32
}

/// Parse `#RRGGBB` or `#RRGGBBAA`.
pub fn parse_hex_color(raw: &str) -> Option<Rgba<u8>> {
    let hex = raw.trim().strip_prefix('#')?;
    let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    match hex.len() {
        6 => Some(Rgba([channel(0)?, channel(2)?, channel(4)?, 255])),
        8 => Some(Rgba([channel(0)?, channel(2)?, channel(4)?, channel(6)?])),
        _ => None,
    }
}

fn clamp_i32(value: i32, min_value: i32, max_value: i32) -> i32 {
    value.max(min_value).min(max_value)
}

fn blend_pixel(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let a = f64::from(src[3]) / 255.0;
    if a <= 0.0 {
        return dst;
    }
    let inv = 1.0 - a;
    let mix = |d: u8, s: u8| {
        (f64::from(d) * inv + f64::from(s) * a)
            .round()
            .clamp(0.0, 255.0) as u8
    };
    let out_a = (f64::from(src[3]) + f64::from(dst[3]) * inv)
        .round()
        .clamp(0.0, 255.0) as u8;
    Rgba([
        mix(dst[0], src[0]),
        mix(dst[1], src[1]),
        mix(dst[2], src[2]),
        out_a,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

    fn rect(x: f64, y: f64, width: f64, height: f64) -> DrawRect {
        DrawRect {
            x,
            y,
            width,
            height,
        }
    }

    #[test]
    fn reset_clears_and_resizes() {
        let mut surface = RasterSurface::new();
        surface.reset(4, 3);
        surface.fill_rect(rect(0.0, 0.0, 4.0, 3.0), RED);
        surface.reset(6, 2);
        assert_eq!(surface.image().dimensions(), (6, 2));
        assert!(surface.image().pixels().all(|p| p.0 == [0, 0, 0, 0]));
    }

    #[test]
    fn draw_image_fills_surface() {
        let src = RgbaImage::from_pixel(10, 8, Rgba([40, 50, 60, 255]));
        let mut surface = RasterSurface::new();
        surface.reset(5, 4);
        surface.draw_image(&src);
        assert_eq!(surface.image().dimensions(), (5, 4));
        assert!(surface.image().pixels().all(|p| p.0 == [40, 50, 60, 255]));
    }

    #[test]
    fn stroke_paints_outline_only() {
        let mut surface = RasterSurface::new();
        surface.reset(20, 20);
        surface.stroke_rect(rect(5.0, 5.0, 10.0, 10.0), RED, 2.0);
        let img = surface.image();
        // line width 2 centered on the edge covers x = 4..=5 on the left side
        assert_eq!(img.get_pixel(4, 10), &RED);
        assert_eq!(img.get_pixel(5, 10), &RED);
        assert_eq!(img.get_pixel(14, 10), &RED);
        assert_eq!(img.get_pixel(15, 10), &RED);
        assert_eq!(img.get_pixel(10, 10).0, [0, 0, 0, 0]);
        assert_eq!(img.get_pixel(3, 10).0, [0, 0, 0, 0]);
    }

    #[test]
    fn stroke_and_fill_clip_at_edges() {
        let mut surface = RasterSurface::new();
        surface.reset(8, 8);
        surface.stroke_rect(rect(-4.0, -4.0, 20.0, 20.0), RED, 3.0);
        surface.fill_rect(rect(6.0, -10.0, 10.0, 12.0), RED);
        assert_eq!(surface.image().get_pixel(7, 0), &RED);
        assert_eq!(surface.image().get_pixel(7, 1), &RED);
        assert_eq!(surface.image().get_pixel(7, 2).0, [0, 0, 0, 0]);
    }

    #[test]
    fn text_measurement_follows_glyph_grid() {
        let surface = RasterSurface::new();
        assert_eq!(glyph_scale(12.0), 1);
        assert_eq!(glyph_scale(16.0), 2);
        assert_eq!(glyph_scale(23.9), 2);
        assert_eq!(glyph_scale(3.0), 1);
        assert_eq!(surface.measure_text("cavity", 12.0), 6.0 * 8.0);
        assert_eq!(surface.measure_text("cavity", 28.0), 6.0 * 24.0);
        assert_eq!(surface.measure_text("", 40.0), 0.0);
    }

    #[test]
    fn text_sits_above_baseline() {
        let mut surface = RasterSurface::new();
        surface.reset(40, 40);
        surface.fill_text("H", 0.0, 20.0, 8.0, RED);
        let img = surface.image();
        let painted: Vec<u32> = (0..40)
            .filter(|&y| (0..40).any(|x| img.get_pixel(x, y) == &RED))
            .collect();
        assert!(!painted.is_empty());
        assert!(painted.iter().all(|&y| (12..20).contains(&y)));
    }

    #[test]
    fn far_off_surface_coordinates_paint_nothing() {
        let mut surface = RasterSurface::new();
        surface.reset(16, 16);
        for offset in [-5e9, 5e9, -1e300, 1e300] {
            surface.stroke_rect(rect(offset, 4.0, 10.0, 10.0), RED, 2.0);
            surface.stroke_rect(rect(4.0, offset, 10.0, 10.0), RED, 2.0);
            surface.fill_rect(rect(offset, offset, 10.0, 10.0), RED);
            surface.fill_text("cavity (90%)", offset, 8.0, 12.0, RED);
            surface.fill_text("cavity (90%)", 0.0, offset, 12.0, RED);
        }
        assert!(surface.image().pixels().all(|p| p.0 == [0, 0, 0, 0]));
    }

    #[test]
    fn huge_rect_around_surface_leaves_interior_clear() {
        let mut surface = RasterSurface::new();
        surface.reset(16, 16);
        surface.stroke_rect(rect(-5e9, -5e9, 1e10, 1e10), RED, 4.0);
        assert!(surface.image().pixels().all(|p| p.0 == [0, 0, 0, 0]));

        surface.stroke_rect(rect(4.0, -5e9, 1e10, 1e10), RED, 2.0);
        assert_eq!(surface.image().get_pixel(4, 8), &RED);
        assert_eq!(surface.image().get_pixel(10, 8).0, [0, 0, 0, 0]);
    }

    #[test]
    fn huge_font_is_clipped_to_surface() {
        let mut surface = RasterSurface::new();
        surface.reset(8, 8);
        // one glyph cell of 'H' is far larger than the surface; its first
        // column covers every pixel
        surface.fill_text("HH", 0.0, 1e6, 1e6, RED);
        surface.fill_text("H", -4.0, 4.0e6, 1e9, RED);
        assert!(surface.image().pixels().all(|p| p == &RED));
    }

    #[test]
    fn parses_hex_colors() {
        assert_eq!(parse_hex_color("#22d3ee"), Some(Rgba([0x22, 0xd3, 0xee, 255])));
        assert_eq!(parse_hex_color("#00000080"), Some(Rgba([0, 0, 0, 0x80])));
        assert_eq!(parse_hex_color("22d3ee"), None);
        assert_eq!(parse_hex_color("#zzzzzz"), None);
    }
}
