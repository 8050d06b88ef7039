use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use serde::Deserialize;

use crate::ensemble::ImageResult;
use crate::error::Error;
use crate::fusion::PixelDetection;
use crate::resolution::ResolutionIndex;

const PLATE_WIDTH: u32 = 48;
const PLATE_HEIGHT: u32 = 8;
const TEXT_PADDING: u32 = 3;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OverlayStyle {
    pub color: [u8; 3],
    pub thickness: u32,
    /// Only detections scoring above this are drawn.
    pub min_score: f32,
    /// Weight of the drawn layer when blended onto the source image.
    pub opacity: f32,
    /// TrueType/OpenType font for `label: score` captions. Without one the
    /// caption is a score bar.
    pub font: Option<PathBuf>,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            color: [255, 0, 0],
            thickness: 4,
            min_score: 0.5,
            opacity: 0.75,
            font: None,
        }
    }
}

/// Class id -> display name, keyed by the id's decimal form.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct ClassLabels(HashMap<String, String>);

impl Default for ClassLabels {
    fn default() -> Self {
        let mut labels = HashMap::new();
        labels.insert("0".to_string(), "wheat_head".to_string());

        Self(labels)
    }
}

impl ClassLabels {
    pub fn new(labels: HashMap<String, String>) -> Self {
        Self(labels)
    }

    pub fn label(&self, class_id: i32) -> String {
        self.0
            .get(&class_id.to_string())
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }
}

fn load_font(path: &Path) -> Result<FontVec, Error> {
    let data = std::fs::read(path)?;

    FontVec::try_from_vec(data).map_err(|_| Error::InvalidFont(path.to_path_buf()))
}

/// Caption height in pixels, growing with the shorter image side.
fn text_scale(image: &RgbImage) -> f32 {
    let side = image.width().min(image.height()) as f32;

    (12.0 + 0.02 * side).max(14.0).min(28.0)
}

/// Everything needed to draw fused detections: style, class names and the
/// caption font.
pub struct Overlay {
    style: OverlayStyle,
    labels: ClassLabels,
    font: Option<FontVec>,
}

impl Overlay {
    pub fn new(style: OverlayStyle, labels: ClassLabels) -> Result<Self, Error> {
        let font = match &style.font {
            Some(path) => Some(load_font(path)?),
            None => None,
        };

        Ok(Self { style, labels, font })
    }

    #[inline]
    pub fn style(&self) -> &OverlayStyle {
        &self.style
    }

    #[inline]
    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Draws the outline of `det` and its caption above it.
    fn draw_detection(&self, canvas: &mut RgbImage, det: &PixelDetection, scale: PxScale) {
        if det.width <= 0 || det.height <= 0 {
            return;
        }

        let color = Rgb(self.style.color);
        let thickness = self.style.thickness.max(1);
        for offset in 0..thickness as i32 {
            let rect = Rect::at(det.x - offset, det.y - offset)
                .of_size(det.width as u32 + 2 * offset as u32, det.height as u32 + 2 * offset as u32);
            draw_hollow_rect_mut(canvas, rect, color);
        }

        match &self.font {
            Some(font) => {
                let caption = format!("{}: {:.2}", self.labels.label(det.class_id), det.score);
                let (text_w, text_h) = text_size(scale, font, &caption);
                let (plate_w, plate_h) = (text_w as u32 + 2 * TEXT_PADDING, text_h as u32 + 2 * TEXT_PADDING);
                let plate_y = (det.y - thickness as i32 - plate_h as i32).max(0);

                draw_filled_rect_mut(canvas, Rect::at(det.x, plate_y).of_size(plate_w, plate_h), color);
                draw_text_mut(
                    canvas,
                    Rgb([255, 255, 255]),
                    det.x + TEXT_PADDING as i32,
                    plate_y + TEXT_PADDING as i32,
                    scale,
                    font,
                    &caption,
                );
            }
            None => {
                let plate_y = (det.y - thickness as i32 - PLATE_HEIGHT as i32).max(0);
                let filled = ((det.score.max(0.0).min(1.0) * PLATE_WIDTH as f32).round() as u32).max(1);

                draw_filled_rect_mut(
                    canvas,
                    Rect::at(det.x, plate_y).of_size(PLATE_WIDTH, PLATE_HEIGHT),
                    Rgb([255, 255, 255]),
                );
                draw_filled_rect_mut(canvas, Rect::at(det.x, plate_y).of_size(filled, PLATE_HEIGHT), color);
            }
        }
    }
}

/// Renders `detections` over `image` and blends the result at the style's
/// opacity.
pub fn render_overlay(image: &RgbImage, detections: &[PixelDetection], overlay: &Overlay) -> RgbImage {
    let style = overlay.style();
    let scale = PxScale::from(text_scale(image));

    let mut drawn = image.clone();
    for det in detections.iter().filter(|d| d.score > style.min_score) {
        overlay.draw_detection(&mut drawn, det, scale);
    }

    let alpha = style.opacity.max(0.0).min(1.0);
    for (out, src) in drawn.pixels_mut().zip(image.pixels()) {
        for (o, s) in out.0.iter_mut().zip(src.0.iter()) {
            *o = (*o as f32 * alpha + *s as f32 * (1.0 - alpha)).round().max(0.0).min(255.0) as u8;
        }
    }

    drawn
}

fn write_overlay(path: &Path, out: &Path, detections: &[PixelDetection], overlay: &Overlay) -> Result<(), Error> {
    let image = image::open(path)?.to_rgb8();
    render_overlay(&image, detections, overlay).save(out)?;

    Ok(())
}

/// Writes one overlay per result into `out_dir`, named after the source file.
/// Images without detections are written unchanged.
///
/// Returns the number of files written; failures are logged and skipped.
pub fn write_overlays<P: AsRef<Path>>(
    index: &ResolutionIndex,
    results: &[ImageResult],
    out_dir: P,
    overlay: &Overlay,
) -> Result<usize, Error> {
    let out_dir = out_dir.as_ref();
    std::fs::create_dir_all(out_dir)?;

    let mut written = 0;
    for result in results {
        let entry = match index.get(&result.id) {
            Some(entry) => entry,
            None => {
                tracing::warn!(id = %result.id, "no source image for overlay");
                continue;
            }
        };

        let out = out_dir.join(&entry.file_name);
        match write_overlay(&entry.path, &out, &result.detections, overlay) {
            Ok(()) => written += 1,
            Err(err) => tracing::warn!(id = %result.id, "overlay failed: {}", err),
        }
    }

    tracing::info!(written, "overlays written to {:?}", out_dir);

    Ok(written)
}
