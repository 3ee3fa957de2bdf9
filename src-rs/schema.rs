//! Wire format of the analysis API and the validated result types.
//!
//! Decoding is strict: a success body missing any of `image_b64`,
//! `annotations` or `report`, or carrying a detection that breaks the
//! box invariants, is rejected with [`Error::ResponseShapeInvalid`] before
//! anything reaches the renderer.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};

/// One model-predicted box. `x`/`y` are the box center in source pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_name: String,
    pub confidence: f64,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Detection {
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("x", self.x),
            ("y", self.y),
            ("width", self.width),
            ("height", self.height),
            ("confidence", self.confidence),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(Error::ResponseShapeInvalid(format!(
                    "detection '{}' has non-finite {name}",
                    self.class_name
                )));
            }
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(Error::ResponseShapeInvalid(format!(
                "detection '{}' has non-positive size {}x{}",
                self.class_name, self.width, self.height
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(Error::ResponseShapeInvalid(format!(
                "detection '{}' confidence {} outside [0, 1]",
                self.class_name, self.confidence
            )));
        }
        Ok(())
    }
}

/// A complete, validated analysis. Replaced as a whole, never patched.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub image_bytes: Vec<u8>,
    pub detections: Vec<Detection>,
    pub report: String,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    image_b64: String,
    annotations: Vec<Detection>,
    report: String,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    detail: Option<Value>,
}

/// Decode a success body into an [`AnalysisResult`].
pub fn parse_success(body: &[u8]) -> Result<AnalysisResult> {
    let wire: WireResponse = serde_json::from_slice(body)
        .map_err(|err| Error::ResponseShapeInvalid(err.to_string()))?;

    for detection in &wire.annotations {
        detection.validate()?;
    }

    let image_bytes = STANDARD
        .decode(wire.image_b64.trim())
        .map_err(|err| Error::ResponseShapeInvalid(format!("image_b64 is not base64: {err}")))?;

    Ok(AnalysisResult {
        image_bytes,
        detections: wire.annotations,
        report: wire.report,
    })
}

/// Re-encode a result in the wire format, e.g. to store it for offline
/// re-rendering.
pub fn to_wire_json(result: &AnalysisResult) -> Value {
    json!({
        "image_b64": STANDARD.encode(&result.image_bytes),
        "annotations": result.detections,
        "report": result.report,
    })
}

/// Human-readable message for a non-success response.
///
/// A string `detail` is used verbatim; any other non-null `detail` is shown
/// as compact JSON. Otherwise the message is synthesized from the status.
pub fn error_message(status: u16, body: &[u8]) -> String {
    let detail = serde_json::from_slice::<WireError>(body)
        .ok()
        .and_then(|wire| wire.detail);
    match detail {
        Some(Value::String(text)) if !text.trim().is_empty() => text,
        Some(value) if !value.is_null() && !value.is_string() => value.to_string(),
        _ => format!("HTTP error! status: {status}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn parses_success_body_in_server_order() {
        let raw = body(json!({
            "image_b64": STANDARD.encode([1u8, 2, 3]),
            "annotations": [
                {"class_name": "cavity", "confidence": 0.91, "x": 50.0, "y": 40.0, "width": 20.0, "height": 10.0},
                {"class_name": "periapical lesion", "confidence": 0.4, "x": 10.0, "y": 10.0, "width": 4.0, "height": 4.0}
            ],
            "report": "**Clinical Findings:**\n- cavity"
        }));
        let result = parse_success(&raw).unwrap();
        assert_eq!(result.image_bytes, vec![1, 2, 3]);
        assert_eq!(result.detections.len(), 2);
        assert_eq!(result.detections[0].class_name, "cavity");
        assert_eq!(result.detections[1].class_name, "periapical lesion");
        assert!(result.report.starts_with("**Clinical Findings:**"));
    }

    #[test]
    fn missing_field_is_shape_invalid() {
        let raw = body(json!({"image_b64": "", "annotations": []}));
        let err = parse_success(&raw).unwrap_err();
        assert_eq!(err.kind(), "response_shape_invalid");
        assert!(err.to_string().contains("report"));
    }

    #[test]
    fn rejects_broken_detection() {
        let raw = body(json!({
            "image_b64": "",
            "annotations": [{"class_name": "cavity", "confidence": 1.5, "x": 1.0, "y": 1.0, "width": 2.0, "height": 2.0}],
            "report": ""
        }));
        assert!(matches!(
            parse_success(&raw),
            Err(Error::ResponseShapeInvalid(_))
        ));

        let zero = Detection {
            class_name: "cavity".to_string(),
            confidence: 0.5,
            x: 1.0,
            y: 1.0,
            width: 0.0,
            height: 3.0,
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn rejects_bad_base64() {
        let raw = body(json!({"image_b64": "not base64!!", "annotations": [], "report": ""}));
        assert!(matches!(
            parse_success(&raw),
            Err(Error::ResponseShapeInvalid(_))
        ));
    }

    #[test]
    fn wire_json_parses_back() {
        let result = AnalysisResult {
            image_bytes: vec![9, 8, 7],
            detections: vec![Detection {
                class_name: "cavity".to_string(),
                confidence: 0.5,
                x: 3.0,
                y: 4.0,
                width: 2.0,
                height: 2.0,
            }],
            report: "report".to_string(),
        };
        let raw = serde_json::to_vec(&to_wire_json(&result)).unwrap();
        assert_eq!(parse_success(&raw).unwrap(), result);
    }

    #[test]
    fn error_message_prefers_detail() {
        let raw = body(json!({"detail": "model unavailable"}));
        assert_eq!(error_message(500, &raw), "model unavailable");
    }

    #[test]
    fn error_message_falls_back_to_status() {
        assert_eq!(error_message(500, b""), "HTTP error! status: 500");
        assert_eq!(error_message(502, b"<html>bad gateway</html>"), "HTTP error! status: 502");
        assert_eq!(error_message(503, &body(json!({"other": 1}))), "HTTP error! status: 503");
    }

    #[test]
    fn structured_detail_is_shown_as_json() {
        let raw = body(json!({"detail": [{"loc": ["body", "file"], "msg": "field required"}]}));
        let message = error_message(422, &raw);
        assert!(message.contains("field required"));
    }
}
