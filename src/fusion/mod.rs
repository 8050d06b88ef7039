pub mod cluster;
pub mod detection;
pub mod iou;
pub mod normalize;
pub mod wbf;

pub use cluster::Cluster;
pub use detection::{Detection, DetectionSet, FusedDetection, PixelDetection};
pub use iou::{iou, iou_pair};
pub use normalize::{denormalize, ensure_in_image, ensure_normalized, normalize, PostFilter, Resolution};
pub use wbf::{ScoreDampening, WeightedBoxesFusion};

use core::marker::PhantomData;

pub trait BBoxFormat: std::fmt::Debug {}

/// `(x_min, y_min, width, height)`
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Ltwh;
impl BBoxFormat for Ltwh {}

/// `(x_min, y_min, x_max, y_max)`, the `xyxy` layout detectors emit.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Ltrb;
impl BBoxFormat for Ltrb {}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox<F: BBoxFormat>([f32; 4], PhantomData<F>);
impl<F: BBoxFormat> BBox<F> {
    #[inline]
    pub fn coords(&self) -> [f32; 4] {
        self.0
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|c| c.is_finite())
    }
}

impl BBox<Ltwh> {
    #[inline(always)]
    pub fn left(&self) -> f32 {
        self.0[0]
    }

    #[inline(always)]
    pub fn top(&self) -> f32 {
        self.0[1]
    }

    #[inline(always)]
    pub fn width(&self) -> f32 {
        self.0[2]
    }

    #[inline(always)]
    pub fn height(&self) -> f32 {
        self.0[3]
    }

    #[inline]
    pub fn as_ltrb(&self) -> BBox<Ltrb> {
        self.into()
    }

    #[inline]
    pub fn ltwh(x1: f32, x2: f32, x3: f32, x4: f32) -> Self {
        BBox([x1, x2, x3, x4], Default::default())
    }
}

impl BBox<Ltrb> {
    #[inline]
    pub fn ltrb(x1: f32, x2: f32, x3: f32, x4: f32) -> Self {
        BBox([x1, x2, x3, x4], Default::default())
    }

    #[inline]
    pub fn from_array(coords: [f32; 4]) -> Self {
        BBox(coords, Default::default())
    }

    #[inline]
    pub fn as_ltwh(&self) -> BBox<Ltwh> {
        self.into()
    }

    #[inline(always)]
    pub fn left(&self) -> f32 {
        self.0[0]
    }

    #[inline(always)]
    pub fn top(&self) -> f32 {
        self.0[1]
    }

    #[inline(always)]
    pub fn right(&self) -> f32 {
        self.0[2]
    }

    #[inline(always)]
    pub fn bottom(&self) -> f32 {
        self.0[3]
    }

    #[inline]
    pub fn width(&self) -> f32 {
        (self.right() - self.left()).max(0.0)
    }

    #[inline]
    pub fn height(&self) -> f32 {
        (self.bottom() - self.top()).max(0.0)
    }

    /// Zero for inverted and degenerate boxes.
    #[inline]
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Swaps inverted corners so that `left <= right` and `top <= bottom`.
    pub fn sanitized(&self) -> Self {
        let [x1, y1, x2, y2] = self.0;

        BBox::ltrb(x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2))
    }

    /// Applies `f` to every coordinate, keeping the format.
    #[inline]
    pub fn map<M: Fn(usize, f32) -> f32>(&self, f: M) -> Self {
        let mut out = self.0;
        for (idx, c) in out.iter_mut().enumerate() {
            *c = f(idx, *c);
        }

        BBox(out, Default::default())
    }
}

impl<'a> From<&'a BBox<Ltwh>> for BBox<Ltrb> {
    #[inline]
    fn from(v: &'a BBox<Ltwh>) -> Self {
        Self([
            v.0[0],
            v.0[1],
            v.0[2] + v.0[0],
            v.0[3] + v.0[1],
        ], Default::default())
    }
}

impl<'a> From<&'a BBox<Ltrb>> for BBox<Ltwh> {
    #[inline]
    fn from(v: &'a BBox<Ltrb>) -> Self {
        Self([
            v.0[0],
            v.0[1],
            v.0[2] - v.0[0],
            v.0[3] - v.0[1],
        ], Default::default())
    }
}

#[test]
fn bbox_format_conversion() {
    let ltrb = BBox::ltrb(10.0, 20.0, 50.0, 80.0);
    let ltwh = ltrb.as_ltwh();

    assert_eq!(ltwh.coords(), [10.0, 20.0, 40.0, 60.0]);
    assert_eq!(ltwh.as_ltrb(), ltrb);
    assert_eq!(ltrb.area(), 2400.0);
}

#[test]
fn bbox_sanitized_swaps_inverted_corners() {
    let inverted = BBox::ltrb(0.6, 0.7, 0.2, 0.1);

    assert_eq!(inverted.area(), 0.0);
    assert_eq!(inverted.sanitized().coords(), [0.2, 0.1, 0.6, 0.7]);
}
