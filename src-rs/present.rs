//! Views that turn session snapshots into output.
//!
//! [`OverlayView`] renders the annotated image in memory whenever the
//! session reports a result and drops it on any other state. Writing the
//! PNG, Markdown report and metadata sidecar happens afterwards in
//! [`write_outputs`].

use std::cell::RefCell;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use image::{DynamicImage, RgbaImage};
use log::{info, warn};
use serde_json::{json, Value};

use crate::config::RenderConfig;
use crate::error;
use crate::overlay::{render_encoded, OverlayLayout};
use crate::schema::AnalysisResult;
use crate::session::{Phase, Snapshot, View};
use crate::surface::RasterSurface;

const META_VERSION: u32 = 1;
const META_EXTENSION: &str = "overlay.json";

/// Logs each state change; the busy indicator of the command line.
pub struct StatusView;

impl View for StatusView {
    fn present(&mut self, snapshot: &Snapshot) -> error::Result<()> {
        match snapshot.phase() {
            Phase::Idle => {}
            Phase::FileSelected => {
                if let Some(file) = snapshot.file() {
                    info!("Selected: {} ({} bytes)", file.name, file.bytes.len());
                }
            }
            Phase::Analyzing { .. } => info!("Analyzing..."),
            Phase::Reported(result) => info!(
                "Analysis complete: {} finding(s)",
                result.detections.len()
            ),
            Phase::Failed(err) => warn!("{err} [{}]", err.kind()),
        }
        Ok(())
    }
}

/// An annotated image ready to be written out.
pub struct Rendered {
    pub image: RgbaImage,
    pub layout: OverlayLayout,
    pub result: Arc<AnalysisResult>,
}

pub type RenderSlot = Rc<RefCell<Option<Rendered>>>;

pub struct OverlayView {
    config: RenderConfig,
    latest: RenderSlot,
}

impl OverlayView {
    pub fn new(config: RenderConfig) -> (Self, RenderSlot) {
        let latest: RenderSlot = Rc::new(RefCell::new(None));
        (
            Self {
                config,
                latest: latest.clone(),
            },
            latest,
        )
    }
}

impl View for OverlayView {
    fn present(&mut self, snapshot: &Snapshot) -> error::Result<()> {
        let Phase::Reported(result) = snapshot.phase() else {
            self.latest.borrow_mut().take();
            return Ok(());
        };
        *self.latest.borrow_mut() = Some(render_result(result.clone(), &self.config)?);
        Ok(())
    }
}

pub fn render_result(result: Arc<AnalysisResult>, config: &RenderConfig) -> error::Result<Rendered> {
    let mut surface = RasterSurface::new();
    let layout = render_encoded(
        &mut surface,
        &result.image_bytes,
        &result.detections,
        config.target_width,
        &config.style,
    )?;
    Ok(Rendered {
        image: surface.into_image(),
        layout,
        result,
    })
}

#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub image: PathBuf,
    pub report: Option<PathBuf>,
    pub meta: Option<PathBuf>,
}

impl OutputPaths {
    /// Report and sidecar default to `<stem>.md` / `<stem>.overlay.json` next
    /// to the image, so a saved `<stem>.json` response is never a default target.
    pub fn resolve(
        image: PathBuf,
        report: Option<PathBuf>,
        meta: Option<PathBuf>,
        no_report: bool,
        no_meta: bool,
    ) -> Self {
        let report = if no_report {
            None
        } else {
            Some(report.unwrap_or_else(|| sibling_with_extension(&image, "md")))
        };
        let meta = if no_meta {
            None
        } else {
            Some(meta.unwrap_or_else(|| sibling_with_extension(&image, META_EXTENSION)))
        };
        Self {
            image,
            report,
            meta,
        }
    }

    fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        std::iter::once(&self.image)
            .chain(self.report.iter())
            .chain(self.meta.iter())
    }

    /// Fail if any output would overwrite one of `protected` or another output.
    pub fn ensure_distinct(&self, protected: &[&Path]) -> Result<()> {
        let outputs: Vec<PathBuf> = self.iter().map(|p| abs_path(p)).collect();
        for (index, output) in outputs.iter().enumerate() {
            if let Some(path) = protected.iter().find(|p| abs_path(p) == *output) {
                bail!("output would overwrite {}", path.display());
            }
            if outputs[..index].contains(output) {
                bail!("output path used twice: {}", output.display());
            }
        }
        Ok(())
    }
}

pub fn write_outputs(rendered: &Rendered, input: &Path, paths: &OutputPaths) -> Result<()> {
    ensure_parent_dir(&paths.image)?;
    DynamicImage::ImageRgba8(rendered.image.clone())
        .save(&paths.image)
        .with_context(|| format!("failed to save annotated image: {}", paths.image.display()))?;
    info!("wrote {}", abs_path(&paths.image).display());

    if let Some(report_path) = &paths.report {
        write_text_file(report_path, &rendered.result.report)?;
        info!("wrote {}", abs_path(report_path).display());
    }

    if let Some(meta_path) = &paths.meta {
        let payload = overlay_meta(rendered, input, paths, meta_path);
        write_json_pretty(meta_path, &payload)?;
        info!("wrote {}", abs_path(meta_path).display());
    }
    Ok(())
}

fn overlay_meta(rendered: &Rendered, input: &Path, paths: &OutputPaths, meta_path: &Path) -> Value {
    let layout = &rendered.layout;
    let detections: Vec<Value> = rendered
        .result
        .detections
        .iter()
        .zip(&layout.boxes)
        .enumerate()
        .map(|(index, (detection, item))| {
            json!({
                "index": index,
                "class_name": detection.class_name,
                "confidence": detection.confidence,
                "label": item.label.text,
                "source_box": {
                    "center_x": detection.x,
                    "center_y": detection.y,
                    "width": detection.width,
                    "height": detection.height,
                    "units": "px",
                },
                "draw_rect": item.rect,
                "line_width": round_to(item.line_width, 3),
                "label_background": item.label.background,
                "font_size": round_to(item.label.font_size, 3),
            })
        })
        .collect();

    json!({
        "overlay_meta_version": META_VERSION,
        "input_path": abs_path(input).display().to_string(),
        "output_path": abs_path(&paths.image).display().to_string(),
        "report_path": paths.report.as_deref().map(|p| abs_path(p).display().to_string()),
        "meta_path": abs_path(meta_path).display().to_string(),
        "generated_at": timestamp_iso(),
        "source_size": {
            "width": layout.viewport.source_width,
            "height": layout.viewport.source_height,
            "units": "px",
        },
        "size": {"width": layout.size.width, "height": layout.size.height, "units": "px"},
        "scale": round_to(layout.scale(), 6),
        "detections": detections,
    })
}

pub fn write_text_file(path: &Path, content: &str) -> Result<()> {
    ensure_parent_dir(path)?;
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub fn write_json_pretty(path: &Path, value: &Value) -> Result<()> {
    ensure_parent_dir(path)?;
    let raw = serde_json::to_string_pretty(value)?;
    fs::write(path, raw).with_context(|| format!("failed to write JSON: {}", path.display()))?;
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory: {}", parent.display())
            })?;
        }
    }
    Ok(())
}

fn sibling_with_extension(path: &Path, extension: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output")
        .to_string();
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    parent.join(format!("{stem}.{extension}"))
}

pub fn abs_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(path)
}

fn timestamp_iso() -> String {
    Utc::now().to_rfc3339()
}

fn round_to(v: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (v * factor).round() / factor
}
