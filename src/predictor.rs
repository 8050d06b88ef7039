use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use ndarray::prelude::*;
use serde::Deserialize;

use crate::error::Error;
use crate::fusion::{BBox, Detection, DetectionSet, Resolution};
use crate::resolution::ImageEntry;

/// Image id -> detections of one model.
pub type ModelPredictions = BTreeMap<String, DetectionSet>;

/// Model id -> that model's predictions.
pub type EnsemblePredictions = BTreeMap<String, ModelPredictions>;

///
/// Raw output of a detector for one image.
///
/// ```text
///     boxes : Array2<f32>
///         An Nx4 matrix of `(x_min, y_min, x_max, y_max)` boxes.
///     confidence : Array1<f32>
///         N confidence scores.
///     classes : Array1<i32>
///         N class ids.
/// ```
///
#[derive(Debug, Clone)]
pub struct ModelOutput {
    pub boxes: Array2<f32>,
    pub confidence: Array1<f32>,
    pub classes: Array1<i32>,
}

impl ModelOutput {
    pub fn new(boxes: Array2<f32>, confidence: Array1<f32>, classes: Array1<i32>) -> Result<Self, Error> {
        if boxes.ncols() != 4 {
            return Err(Error::ShapeMismatch(format!(
                "boxes must be Nx4, got {:?}",
                boxes.shape()
            )));
        }

        if confidence.len() != boxes.nrows() || classes.len() != boxes.nrows() {
            return Err(Error::ShapeMismatch(format!(
                "{} boxes, {} scores, {} classes",
                boxes.nrows(),
                confidence.len(),
                classes.len()
            )));
        }

        Ok(Self { boxes, confidence, classes })
    }

    pub fn empty() -> Self {
        Self {
            boxes: Array2::zeros((0, 4)),
            confidence: Array1::zeros(0),
            classes: Array1::zeros(0),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.boxes.nrows()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.boxes.nrows() == 0
    }

    /// Maps boxes predicted on the `inference` sized input back onto the
    /// `original` image and clips them to `[0, W] x [0, H]`.
    pub fn rescale(mut self, inference: Resolution, original: Resolution) -> Self {
        if inference == original || self.is_empty() {
            return self;
        }

        let ratio_w = original.width as f32 / inference.width.max(1) as f32;
        let ratio_h = original.height as f32 / inference.height.max(1) as f32;
        let ratio = arr1(&[ratio_w, ratio_h, ratio_w, ratio_h]);
        let upper = original.scale();

        self.boxes *= &ratio;
        for mut row in self.boxes.axis_iter_mut(Axis(0)) {
            for (c, &max) in row.iter_mut().zip(upper.iter()) {
                *c = (*c).max(0.0).min(max);
            }
        }

        self
    }

    pub fn into_detections(self) -> DetectionSet {
        self.boxes
            .axis_iter(Axis(0))
            .zip(self.confidence.iter())
            .zip(self.classes.iter())
            .map(|((row, &score), &class_id)| {
                Detection::new(BBox::ltrb(row[0], row[1], row[2], row[3]), score, class_id)
            })
            .collect()
    }
}

///
/// A detector treated as a black box: image in, boxes, scores and classes
/// out.
///
pub trait Predictor {
    /// Model identifier used to key its predictions.
    fn name(&self) -> &str;

    /// Resolution the model was run at, `None` when boxes already are in
    /// the original image frame.
    fn input_size(&self) -> Option<Resolution>;

    fn predict(&mut self, image: &ImageEntry) -> Result<ModelOutput, Error>;

    /// Predicts and returns detections in the original pixel frame.
    fn detect(&mut self, image: &ImageEntry) -> Result<DetectionSet, Error> {
        let output = self.predict(image)?;
        let output = match self.input_size() {
            Some(inference) => output.rescale(inference, image.resolution),
            None => output,
        };

        Ok(output.into_detections())
    }
}

impl<P: Predictor + ?Sized> Predictor for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn input_size(&self) -> Option<Resolution> {
        (**self).input_size()
    }

    fn predict(&mut self, image: &ImageEntry) -> Result<ModelOutput, Error> {
        (**self).predict(image)
    }
}

#[derive(Debug, Deserialize)]
struct ImagePredictionRecord {
    #[serde(default)]
    boxes: Vec<[f32; 4]>,
    #[serde(default)]
    confidence: Vec<f32>,
    #[serde(default)]
    classes: Vec<i32>,
}

#[derive(Debug, Deserialize)]
struct PredictionFileRecord {
    model: Option<String>,
    /// `[height, width]`
    input_size: Option<[u32; 2]>,
    #[serde(default)]
    images: HashMap<String, ImagePredictionRecord>,
}

///
/// Detector outputs exported to JSON by the inference runtime.
///
/// ```json
/// {
///   "model": "yolov8_s",
///   "input_size": [832, 832],
///   "images": {
///     "X1": { "boxes": [[10, 10, 50, 50]], "confidence": [0.8], "classes": [0] }
///   }
/// }
/// ```
///
/// An image missing from the export is a model that detected nothing.
///
#[derive(Debug)]
pub struct JsonPredictor {
    name: String,
    input_size: Option<Resolution>,
    images: HashMap<String, ImagePredictionRecord>,
}

impl JsonPredictor {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let fallback = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("model")
            .to_string();

        let predictor = Self::from_reader(reader, fallback)?;
        tracing::info!(
            model = %predictor.name,
            images = predictor.images.len(),
            "loaded predictions from {:?}",
            path
        );

        Ok(predictor)
    }

    pub fn from_reader<R: std::io::Read>(reader: R, fallback_name: String) -> Result<Self, Error> {
        let record: PredictionFileRecord = serde_json::from_reader(reader)?;

        Ok(Self {
            name: record.model.unwrap_or(fallback_name),
            input_size: record.input_size.map(|[h, w]| Resolution::new(h, w)),
            images: record.images,
        })
    }
}

impl Predictor for JsonPredictor {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_size(&self) -> Option<Resolution> {
        self.input_size
    }

    fn predict(&mut self, image: &ImageEntry) -> Result<ModelOutput, Error> {
        let record = match self.images.get(&image.id) {
            Some(record) => record,
            None => {
                tracing::debug!(model = %self.name, id = %image.id, "no predictions for image");
                return Ok(ModelOutput::empty());
            }
        };

        let flat: Vec<f32> = record.boxes.iter().flat_map(|b| b.iter().copied()).collect();
        let boxes = Array2::from_shape_vec((record.boxes.len(), 4), flat)
            .map_err(|err| Error::ShapeMismatch(err.to_string()))?;

        ModelOutput::new(
            boxes,
            Array1::from(record.confidence.clone()),
            Array1::from(record.classes.clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn entry(id: &str, height: u32, width: u32) -> ImageEntry {
        ImageEntry {
            id: id.to_string(),
            file_name: format!("{}.jpg", id),
            path: PathBuf::from(format!("{}.jpg", id)),
            resolution: Resolution::new(height, width),
        }
    }

    #[test]
    fn model_output_validates_shapes() {
        let boxes = Array2::zeros((2, 4));
        assert!(ModelOutput::new(boxes.clone(), Array1::zeros(1), Array1::zeros(2)).is_err());
        assert!(ModelOutput::new(Array2::zeros((2, 3)), Array1::zeros(2), Array1::zeros(2)).is_err());
        assert_eq!(ModelOutput::new(boxes, Array1::zeros(2), Array1::zeros(2)).unwrap().len(), 2);
    }

    #[test]
    fn rescale_maps_inference_frame_to_original() {
        let output = ModelOutput::new(
            arr2(&[[100.0, 200.0, 400.0, 800.0], [0.0, 0.0, 832.0, 832.0]]),
            arr1(&[0.9, 0.5]),
            arr1(&[0, 0]),
        )
        .unwrap();

        let rescaled = output.rescale(Resolution::new(832, 832), Resolution::new(416, 1664));
        assert_eq!(rescaled.boxes.row(0).to_vec(), vec![200.0, 100.0, 800.0, 400.0]);
        assert_eq!(rescaled.boxes.row(1).to_vec(), vec![0.0, 0.0, 1664.0, 416.0]);
    }

    #[test]
    fn rescale_clips_to_image() {
        let output = ModelOutput::new(arr2(&[[-8.0, 10.0, 120.0, 90.0]]), arr1(&[0.9]), arr1(&[1])).unwrap();

        let rescaled = output.rescale(Resolution::new(100, 100), Resolution::new(50, 50));
        assert_eq!(rescaled.boxes.row(0).to_vec(), vec![0.0, 5.0, 50.0, 45.0]);
    }

    #[test]
    fn json_predictor_reads_export() {
        let json = r#"{
            "model": "yolov8_m",
            "input_size": [100, 200],
            "images": {
                "X1": { "boxes": [[20, 10, 100, 50]], "confidence": [0.8], "classes": [0] },
                "X2": { "boxes": [], "confidence": [], "classes": [] }
            }
        }"#;

        let mut predictor = JsonPredictor::from_reader(json.as_bytes(), "fallback".to_string()).unwrap();
        assert_eq!(predictor.name(), "yolov8_m");

        let dets = predictor.detect(&entry("X1", 200, 400)).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].bbox.coords(), [40.0, 20.0, 200.0, 100.0]);
        assert_eq!(dets[0].score, 0.8);

        assert!(predictor.detect(&entry("X2", 200, 400)).unwrap().is_empty());
        assert!(predictor.detect(&entry("X3", 200, 400)).unwrap().is_empty());
    }

    #[test]
    fn json_predictor_rejects_ragged_records() {
        let json = r#"{ "images": { "X1": { "boxes": [[0, 0, 1, 1]], "confidence": [], "classes": [0] } } }"#;

        let mut predictor = JsonPredictor::from_reader(json.as_bytes(), "fallback".to_string()).unwrap();
        assert_eq!(predictor.name(), "fallback");
        assert!(predictor.detect(&entry("X1", 10, 10)).is_err());
    }
}
