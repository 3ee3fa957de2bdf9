use serde::Serialize;

use crate::error::{Error, Result};
use crate::schema::Detection;

/// Top-left anchored rectangle in drawing-surface pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DrawRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl DrawRect {
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }
}

/// Convert a center-form detection into a scaled, top-left drawing rectangle.
pub fn to_draw_rect(detection: &Detection, scale: f64) -> Result<DrawRect> {
    if !scale.is_finite() || scale <= 0.0 {
        return Err(Error::InvalidArgument(format!(
            "scale must be finite and positive, got {scale}"
        )));
    }
    let left = detection.x - detection.width / 2.0;
    let top = detection.y - detection.height / 2.0;
    Ok(DrawRect {
        x: left * scale,
        y: top * scale,
        width: detection.width * scale,
        height: detection.height * scale,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f64, y: f64, width: f64, height: f64) -> Detection {
        Detection {
            class_name: "cavity".to_string(),
            confidence: 0.8,
            x,
            y,
            width,
            height,
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn center_box_maps_to_scaled_top_left() {
        let rect = to_draw_rect(&det(500.0, 400.0, 200.0, 100.0), 0.5).unwrap();
        assert_eq!(
            rect,
            DrawRect {
                x: 200.0,
                y: 175.0,
                width: 100.0,
                height: 50.0
            }
        );
    }

    #[test]
    fn matches_closed_form_across_scales() {
        let boxes = [
            det(12.5, 7.25, 3.0, 9.5),
            det(640.0, 10.0, 1280.0, 20.0),
            det(1.0, 1.0, 0.5, 0.5),
        ];
        for scale in [0.01, 0.333, 1.0, 1.75, 8.0] {
            for b in &boxes {
                let rect = to_draw_rect(b, scale).unwrap();
                assert!(close(rect.x, (b.x - b.width / 2.0) * scale));
                assert!(close(rect.y, (b.y - b.height / 2.0) * scale));
                assert!(close(rect.width, b.width * scale));
                assert!(close(rect.height, b.height * scale));
            }
        }
    }

    #[test]
    fn contained_box_stays_inside_scaled_image() {
        let (img_w, img_h) = (1000.0, 800.0);
        let scale = 0.37;
        let rect = to_draw_rect(&det(100.0, 700.0, 200.0, 200.0), scale).unwrap();
        assert!(rect.x >= 0.0 && rect.y >= 0.0);
        assert!(rect.right() <= img_w * scale + 1e-9);
        assert!(rect.bottom() <= img_h * scale + 1e-9);
    }

    #[test]
    fn rejects_bad_scale() {
        let b = det(10.0, 10.0, 4.0, 4.0);
        for scale in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                to_draw_rect(&b, scale),
                Err(Error::InvalidArgument(_))
            ));
        }
    }
}
