//! Annotation overlay: paints the scaled X-ray and one labelled box per
//! detection onto a [`Surface`].
//!
//! Rendering runs in two passes. [`layout_overlay`] resolves every
//! rectangle, stroke width and label up front; only when that succeeds does
//! [`render_overlay`] touch the surface, so a bad argument never leaves a
//! half-painted result behind.

use image::{Rgba, RgbaImage};
use log::debug;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::geometry::{to_draw_rect, DrawRect};
use crate::schema::Detection;
use crate::surface::Surface;

pub const ACCENT: Rgba<u8> = Rgba([0x22, 0xd3, 0xee, 0xff]);
pub const LABEL_TEXT: Rgba<u8> = Rgba([0x00, 0x00, 0x00, 0xff]);

const MIN_STROKE: f64 = 2.0;
const BASE_STROKE: f64 = 2.0;
const MIN_FONT: f64 = 12.0;
const BASE_FONT: f64 = 14.0;
const LABEL_LINE_HEIGHT: f64 = 1.2;
const LABEL_PAD_X: f64 = 5.0;

/// Largest surface side in pixels the renderer will allocate.
pub const MAX_SURFACE_SIDE: u32 = 16_384;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayStyle {
    pub accent: Rgba<u8>,
    pub label_text: Rgba<u8>,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            accent: ACCENT,
            label_text: LABEL_TEXT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

/// Source image size plus the externally chosen display width.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub source_width: u32,
    pub source_height: u32,
    pub target_width: u32,
}

impl Viewport {
    pub fn new(source_width: u32, source_height: u32, target_width: u32) -> Result<Self> {
        if source_width == 0 || source_height == 0 {
            return Err(Error::InvalidArgument(format!(
                "source image has empty size {source_width}x{source_height}"
            )));
        }
        if target_width == 0 {
            return Err(Error::InvalidArgument(
                "target width must be at least 1 pixel".to_string(),
            ));
        }
        let viewport = Self {
            source_width,
            source_height,
            target_width,
        };
        let size = viewport.surface_size();
        if size.width > MAX_SURFACE_SIDE || size.height > MAX_SURFACE_SIDE {
            return Err(Error::InvalidArgument(format!(
                "surface {}x{} exceeds {MAX_SURFACE_SIDE} px per side",
                size.width, size.height
            )));
        }
        Ok(viewport)
    }

    pub fn scale(&self) -> f64 {
        f64::from(self.target_width) / f64::from(self.source_width)
    }

    pub fn surface_size(&self) -> SurfaceSize {
        let height = (f64::from(self.source_height) * self.scale()).round().max(1.0) as u32;
        SurfaceSize {
            width: self.target_width,
            height,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelLayout {
    pub text: String,
    pub font_size: f64,
    pub text_width: f64,
    pub background: DrawRect,
    pub text_x: f64,
    pub baseline: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoxLayout {
    pub rect: DrawRect,
    pub line_width: f64,
    pub label: LabelLayout,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayLayout {
    pub viewport: Viewport,
    pub size: SurfaceSize,
    pub boxes: Vec<BoxLayout>,
}

impl OverlayLayout {
    pub fn scale(&self) -> f64 {
        self.viewport.scale()
    }
}

pub fn stroke_width(scale: f64) -> f64 {
    (BASE_STROKE * scale).max(MIN_STROKE)
}

pub fn font_size(scale: f64) -> f64 {
    (BASE_FONT * scale).max(MIN_FONT)
}

/// `"{class} ({percent}%)"` with the confidence rounded to a whole percent.
pub fn label_text(detection: &Detection) -> String {
    let percent = (detection.confidence * 100.0).round() as i64;
    format!("{} ({percent}%)", detection.class_name)
}

/// Resolve every box and label for the given viewport without painting.
pub fn layout_overlay<S: Surface + ?Sized>(
    surface: &S,
    viewport: Viewport,
    detections: &[Detection],
) -> Result<OverlayLayout> {
    let scale = viewport.scale();
    let line_width = stroke_width(scale);
    let font = font_size(scale);
    let text_height = font * LABEL_LINE_HEIGHT;

    let mut boxes = Vec::with_capacity(detections.len());
    for detection in detections {
        let rect = to_draw_rect(detection, scale)?;
        let text = label_text(detection);
        let text_width = surface.measure_text(&text, font);
        let background = DrawRect {
            x: rect.x,
            y: rect.y - text_height,
            width: text_width + 2.0 * LABEL_PAD_X,
            height: text_height,
        };
        boxes.push(BoxLayout {
            rect,
            line_width,
            label: LabelLayout {
                text,
                font_size: font,
                text_width,
                background,
                text_x: rect.x + LABEL_PAD_X,
                baseline: rect.y - text_height / 10.0,
            },
        });
    }

    Ok(OverlayLayout {
        viewport,
        size: viewport.surface_size(),
        boxes,
    })
}

/// Clear and resize `surface`, paint `image` scaled to `target_width`, then
/// paint each detection's box and label in input order.
pub fn render_overlay<S: Surface + ?Sized>(
    surface: &mut S,
    image: &RgbaImage,
    detections: &[Detection],
    target_width: u32,
    style: &OverlayStyle,
) -> Result<OverlayLayout> {
    let viewport = Viewport::new(image.width(), image.height(), target_width)?;
    let layout = layout_overlay(&*surface, viewport, detections)?;
    debug!(
        "overlay {}x{} -> {}x{} (scale {:.4}, {} boxes)",
        viewport.source_width,
        viewport.source_height,
        layout.size.width,
        layout.size.height,
        viewport.scale(),
        layout.boxes.len()
    );

    surface.reset(layout.size.width, layout.size.height);
    surface.draw_image(image);
    for item in &layout.boxes {
        surface.stroke_rect(item.rect, style.accent, item.line_width);
        surface.fill_rect(item.label.background, style.accent);
        surface.fill_text(
            &item.label.text,
            item.label.text_x,
            item.label.baseline,
            item.label.font_size,
            style.label_text,
        );
    }
    Ok(layout)
}

pub fn decode_image(bytes: &[u8]) -> Result<RgbaImage> {
    let decoded = image::load_from_memory(bytes).map_err(|err| {
        debug!("image decode failed: {err}");
        Error::ImageDecodeFailed
    })?;
    Ok(decoded.to_rgba8())
}

/// Decode `bytes` and render. `None` keeps the source width.
/// On decode failure the surface is left as is.
pub fn render_encoded<S: Surface + ?Sized>(
    surface: &mut S,
    bytes: &[u8],
    detections: &[Detection],
    target_width: Option<u32>,
    style: &OverlayStyle,
) -> Result<OverlayLayout> {
    let image = decode_image(bytes)?;
    let width = target_width.unwrap_or(image.width());
    render_overlay(surface, &image, detections, width, style)
}
