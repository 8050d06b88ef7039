use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::fusion::{BBox, Detection, DetectionSet, FusedDetection, Ltrb, PixelDetection};

const FRAME_TOLERANCE: f32 = 1e-6;

/// Native resolution of an image, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub height: u32,
    pub width: u32,
}

impl Resolution {
    #[inline]
    pub fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }

    /// `[W, H, W, H]`, the per-coordinate scale of an `Ltrb` box.
    #[inline]
    pub fn scale(&self) -> [f32; 4] {
        let (w, h) = (self.width as f32, self.height as f32);

        [w, h, w, h]
    }
}

///
/// Maps a pixel-space detection set into the unit square.
///
/// `resolution` must be the original resolution of the image. Boxes produced
/// at a resize-for-inference resolution have to be rescaled first (see
/// `ModelOutput::rescale`), otherwise every fused box is silently wrong.
///
pub fn normalize(set: &[Detection], resolution: Resolution) -> DetectionSet {
    let scale = resolution.scale();

    set.iter()
        .map(|det| Detection {
            bbox: det.bbox.map(|i, c| (c / scale[i]).max(0.0).min(1.0)),
            ..*det
        })
        .collect()
}

/// Scales a normalized box back to pixels and clamps it to
/// `[0, W-1] x [0, H-1]`.
pub fn denormalize(bbox: &BBox<Ltrb>, resolution: Resolution) -> BBox<Ltrb> {
    let scale = resolution.scale();
    let max_x = resolution.width.saturating_sub(1) as f32;
    let max_y = resolution.height.saturating_sub(1) as f32;

    bbox.map(|i, c| {
        let upper = if i % 2 == 0 { max_x } else { max_y };
        (c * scale[i]).max(0.0).min(upper)
    })
}

/// Tolerated overshoot past the image border, as a fraction of the image side.
const BORDER_OVERSHOOT: f32 = 0.02;

fn check_frame(sets: &[DetectionSet], scale: [f32; 4], overshoot: f32) -> Result<(), Error> {
    for (model, set) in sets.iter().enumerate() {
        for det in set {
            let coords = det.bbox.coords();
            let in_frame = det.bbox.is_finite()
                && coords.iter().zip(scale.iter()).all(|(&c, &side)| {
                    let tolerance = side * overshoot;
                    c >= -tolerance && c <= side + tolerance
                });

            if !in_frame {
                return Err(Error::FrameMismatch { model, coords });
            }
        }
    }

    Ok(())
}

/// Checks pixel-space sets against the resolution they are about to be
/// normalized with.
///
/// Boxes a little past the border are accepted and later clamped by
/// `normalize`. A box further out was produced for another resolution, and
/// clamping would collapse it silently.
pub fn ensure_in_image(sets: &[DetectionSet], resolution: Resolution) -> Result<(), Error> {
    check_frame(sets, resolution.scale(), BORDER_OVERSHOOT)
}

/// Checks that every set is in the normalized frame.
///
/// A box beyond `[0, 1]` means pixel coordinates reached the fusion engine.
pub fn ensure_normalized(sets: &[DetectionSet]) -> Result<(), Error> {
    check_frame(sets, [1.0; 4], FRAME_TOLERANCE)
}

/// Second-stage confidence filter and conversion to pixel `(x, y, w, h)`.
#[derive(Debug, Clone, Copy)]
pub struct PostFilter {
    pub final_conf_thresh: f32,
}

impl PostFilter {
    pub fn new(final_conf_thresh: f32) -> Result<Self, Error> {
        crate::fusion::wbf::check_threshold("final_conf_thresh", final_conf_thresh)?;

        Ok(Self { final_conf_thresh })
    }

    /// Drops detections with `score <= final_conf_thresh`, then denormalizes,
    /// clamps and converts the rest. Input order is preserved.
    pub fn apply(&self, fused: &[FusedDetection], resolution: Resolution) -> Vec<PixelDetection> {
        fused
            .iter()
            .filter(|det| det.score > self.final_conf_thresh)
            .map(|det| {
                let ltwh = denormalize(&det.bbox, resolution)
                    .map(|_, c| c.round())
                    .as_ltwh();

                PixelDetection {
                    x: ltwh.left() as i32,
                    y: ltwh.top() as i32,
                    width: ltwh.width().max(0.0) as i32,
                    height: ltwh.height().max(0.0) as i32,
                    score: det.score,
                    class_id: det.class_id,
                }
            })
            .collect()
    }
}

#[test]
fn normalize_then_denormalize_round_trips() {
    let res = Resolution::new(480, 640);
    let set = vec![
        Detection::new(BBox::ltrb(10.0, 10.0, 50.0, 50.0), 0.9, 0),
        Detection::new(BBox::ltrb(333.0, 101.0, 639.0, 479.0), 0.4, 2),
    ];

    let normalized = normalize(&set, res);
    assert!(ensure_normalized(&[normalized.clone()]).is_ok());

    for (orig, norm) in set.iter().zip(normalized.iter()) {
        let back = denormalize(&norm.bbox, res);
        for (a, b) in orig.bbox.coords().iter().zip(back.coords().iter()) {
            assert!((a - b).abs() < 1e-3, "{} != {}", a, b);
        }
        assert_eq!(orig.score, norm.score);
        assert_eq!(orig.class_id, norm.class_id);
    }
}

#[test]
fn normalize_clamps_out_of_image_boxes() {
    let res = Resolution::new(100, 200);
    let set = vec![Detection::new(BBox::ltrb(-20.0, 50.0, 260.0, 150.0), 0.5, 0)];

    let normalized = normalize(&set, res);
    assert_eq!(normalized[0].bbox.coords(), [0.0, 0.5, 1.0, 1.0]);
}

#[test]
fn denormalize_clamps_to_last_pixel() {
    let res = Resolution::new(100, 200);
    let back = denormalize(&BBox::ltrb(0.5, 0.5, 1.0, 1.0), res);

    assert_eq!(back.coords(), [100.0, 50.0, 199.0, 99.0]);
}

#[test]
fn ensure_normalized_rejects_pixel_boxes() {
    let pixel = vec![Detection::new(BBox::ltrb(10.0, 10.0, 50.0, 50.0), 0.9, 0)];
    let unit = vec![Detection::new(BBox::ltrb(0.1, 0.1, 0.5, 0.5), 0.9, 0)];

    match ensure_normalized(&[unit, pixel]) {
        Err(Error::FrameMismatch { model, .. }) => assert_eq!(model, 1),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn ensure_in_image_tolerates_small_overshoot() {
    let res = Resolution::new(100, 200);
    let edge = vec![Detection::new(BBox::ltrb(-2.0, 10.0, 203.0, 101.0), 0.9, 0)];

    assert!(ensure_in_image(&[edge], res).is_ok());
}

#[test]
fn ensure_in_image_rejects_boxes_of_a_larger_frame() {
    let res = Resolution::new(416, 832);
    let inside = vec![Detection::new(BBox::ltrb(10.0, 10.0, 50.0, 50.0), 0.9, 0)];
    let larger = vec![Detection::new(BBox::ltrb(900.0, 500.0, 1600.0, 800.0), 0.9, 0)];

    match ensure_in_image(&[inside, larger], res) {
        Err(Error::FrameMismatch { model, coords }) => {
            assert_eq!(model, 1);
            assert_eq!(coords, [900.0, 500.0, 1600.0, 800.0]);
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn post_filter_drops_at_threshold_and_converts() {
    let res = Resolution::new(100, 100);
    let fused = vec![
        FusedDetection {
            bbox: BBox::ltrb(0.1, 0.2, 0.5, 0.6),
            score: 0.9,
            class_id: 1,
            model_count: 2,
            member_count: 2,
        },
        FusedDetection {
            bbox: BBox::ltrb(0.1, 0.1, 0.2, 0.2),
            score: 0.4,
            class_id: 1,
            model_count: 1,
            member_count: 1,
        },
    ];

    let out = PostFilter::new(0.4).unwrap().apply(&fused, res);
    assert_eq!(out.len(), 1);
    assert_eq!((out[0].x, out[0].y, out[0].width, out[0].height), (10, 20, 40, 40));
    assert_eq!(out[0].score, 0.9);
    assert_eq!(out[0].class_id, 1);
}

#[test]
fn post_filter_rounds_to_nearest_pixel() {
    let res = Resolution::new(100, 100);
    let fused = vec![FusedDetection {
        bbox: BBox::ltrb(0.1086, 0.1049, 0.5086, 0.5049),
        score: 0.7,
        class_id: 0,
        model_count: 2,
        member_count: 2,
    }];

    let out = PostFilter::new(0.2).unwrap().apply(&fused, res);
    // 10.86 goes up to 11 rather than being truncated to 10
    assert_eq!((out[0].x, out[0].y, out[0].width, out[0].height), (11, 10, 40, 40));
}
