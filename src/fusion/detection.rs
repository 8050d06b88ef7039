use crate::fusion::{BBox, Ltrb};

///
/// This class represents a bounding box detection in a single image, as
/// produced by one model.
///
/// bbox : BBox in format `(x_min, y_min, x_max, y_max)`, either in pixels or
///     in the normalized frame. All detections of one set share one frame.
/// score : f32 - Detector confidence score in `[0, 1]`.
/// class_id : i32 - Class label. Detections of different classes never fuse.
///
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bbox: BBox<Ltrb>,
    pub score: f32,
    pub class_id: i32,
}

impl Detection {
    #[inline]
    pub fn new(bbox: BBox<Ltrb>, score: f32, class_id: i32) -> Self {
        Self { bbox, score, class_id }
    }
}

/// Detections of one model for one image. Order carries no meaning.
pub type DetectionSet = Vec<Detection>;

///
/// One detection emitted by the fusion engine per surviving cluster.
///
/// `model_count` is the number of distinct models that contributed to the
/// cluster and `member_count` the number of boxes it absorbed.
///
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedDetection {
    pub bbox: BBox<Ltrb>,
    pub score: f32,
    pub class_id: i32,
    pub model_count: usize,
    pub member_count: usize,
}

/// Final pixel-space detection in `(x, y, width, height)` form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelDetection {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub score: f32,
    pub class_id: i32,
}
