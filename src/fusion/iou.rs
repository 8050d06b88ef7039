use ndarray::prelude::*;

use crate::fusion::{BBox, Ltrb};

/// Intersection over union of two boxes in the same frame.
///
/// Returns `0.0` whenever the union area is zero, so degenerate boxes never
/// match anything, themselves included.
#[inline]
pub fn iou_pair(b1: &BBox<Ltrb>, b2: &BBox<Ltrb>) -> f32 {
    let i_xmin = b1.left().max(b2.left());
    let i_ymin = b1.top().max(b2.top());

    let i_xmax = b1.right().min(b2.right());
    let i_ymax = b1.bottom().min(b2.bottom());

    let intersection_area = (i_xmax - i_xmin).max(0.0) * (i_ymax - i_ymin).max(0.0);
    let union_area = b1.area() + b2.area() - intersection_area;

    if union_area <= 0.0 {
        0.0
    } else {
        (intersection_area / union_area).min(1.0)
    }
}

/// Computer intersection over union.
/// Parameters
/// ----------
/// bbox : BBox<Ltrb>
///     A bounding box in format `(x_min, y_min, x_max, y_max)`.
/// candidates : &[BBox<Ltrb>]
///     Candidate bounding boxes in the same format and frame as `bbox`.
/// Returns
/// -------
/// ndarray
///     The intersection over union in [0, 1] between the `bbox` and each
///     candidate.
pub fn iou(bbox: &BBox<Ltrb>, candidates: &[BBox<Ltrb>]) -> Array1<f32> {
    candidates
        .iter()
        .map(|candidate| iou_pair(bbox, candidate))
        .collect()
}

#[test]
fn iou_identity_and_disjoint() {
    let a = BBox::ltrb(0.1, 0.1, 0.5, 0.5);
    let b = BBox::ltrb(0.6, 0.6, 0.9, 0.9);

    assert_eq!(iou_pair(&a, &a), 1.0);
    assert_eq!(iou_pair(&a, &b), 0.0);
    assert_eq!(iou(&a, &[a, b]), aview1(&[1.0f32, 0.0]));
}

#[test]
fn iou_partial_overlap_is_symmetric() {
    let a = BBox::ltrb(0.0, 0.0, 2.0, 2.0);
    let b = BBox::ltrb(1.0, 0.0, 3.0, 2.0);

    // intersection 2, union 6
    assert!((iou_pair(&a, &b) - 1.0 / 3.0).abs() < 1e-6);
    assert_eq!(iou_pair(&a, &b), iou_pair(&b, &a));
}

#[test]
fn iou_degenerate_box_is_zero() {
    let point = BBox::ltrb(0.3, 0.3, 0.3, 0.3);
    let line = BBox::ltrb(0.1, 0.3, 0.8, 0.3);
    let a = BBox::ltrb(0.0, 0.0, 1.0, 1.0);

    assert_eq!(iou_pair(&point, &point), 0.0);
    assert_eq!(iou_pair(&line, &a), 0.0);
}
