use std::collections::HashSet;

use serde::Deserialize;

use crate::error::Error;
use crate::fusion::{
    ensure_in_image, normalize, DetectionSet, PixelDetection, PostFilter, Resolution, ScoreDampening, WeightedBoxesFusion,
};
use crate::predictor::{EnsemblePredictions, ModelPredictions, Predictor};
use crate::resolution::ResolutionIndex;

/// Thresholds of the two-stage filtering around fusion.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    pub iou_thr: f32,
    pub skip_box_thr: f32,
    pub final_conf_thresh: f32,
    pub dampening: ScoreDampening,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            iou_thr: 0.5,
            skip_box_thr: 0.22,
            final_conf_thresh: 0.2,
            dampening: ScoreDampening::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageResult {
    pub id: String,
    pub file_name: String,
    pub detections: Vec<PixelDetection>,
}

#[derive(Debug)]
pub struct ImageFailure {
    pub id: String,
    pub model: Option<String>,
    pub error: Error,
}

/// Per-image results in index order plus the images that could not be
/// processed.
#[derive(Debug, Default)]
pub struct EnsembleReport {
    pub results: Vec<ImageResult>,
    pub failures: Vec<ImageFailure>,
}

impl EnsembleReport {
    pub fn detection_count(&self) -> usize {
        self.results.iter().map(|r| r.detections.len()).sum()
    }
}

fn unique_model_key(predictions: &EnsemblePredictions, name: &str) -> String {
    if !predictions.contains_key(name) {
        return name.to_string();
    }

    let mut n = 1usize;
    loop {
        let key = format!("{}_{}", name, n);
        if !predictions.contains_key(&key) {
            tracing::warn!(model = name, key = %key, "duplicate model name, renamed");
            return key;
        }
        n += 1;
    }
}

pub struct Ensemble {
    fusion: WeightedBoxesFusion,
    post: PostFilter,
}

impl Ensemble {
    pub fn new(config: EnsembleConfig) -> Result<Self, Error> {
        Ok(Self {
            fusion: WeightedBoxesFusion::new(config.iou_thr, config.skip_box_thr)?
                .with_dampening(config.dampening),
            post: PostFilter::new(config.final_conf_thresh)?,
        })
    }

    #[inline]
    pub fn fusion(&self) -> &WeightedBoxesFusion {
        &self.fusion
    }

    /// Normalizes, fuses and post-filters the pixel-space detections of all
    /// models for a single image.
    ///
    /// Fails with `Error::FrameMismatch` when a model's boxes do not fit
    /// `resolution`.
    pub fn fuse_image(&self, per_model: &[DetectionSet], resolution: Resolution) -> Result<Vec<PixelDetection>, Error> {
        ensure_in_image(per_model, resolution)?;

        let normalized: Vec<DetectionSet> = per_model
            .iter()
            .map(|set| normalize(set, resolution))
            .collect();

        let fused = self.fusion.fuse(&normalized)?;

        Ok(self.post.apply(&fused, resolution))
    }

    /// Runs every predictor over every indexed image, one image at a time.
    ///
    /// An image on which any model fails is reported once in the returned
    /// failures and left out of the predictions of every model.
    pub fn collect_predictions<P: Predictor>(
        &self,
        index: &ResolutionIndex,
        predictors: &mut [P],
    ) -> (EnsemblePredictions, Vec<ImageFailure>) {
        let mut per_model: Vec<ModelPredictions> = vec![ModelPredictions::new(); predictors.len()];
        let mut failures = Vec::new();

        'images: for image in index {
            let mut sets = Vec::with_capacity(predictors.len());

            for predictor in predictors.iter_mut() {
                match predictor.detect(image) {
                    Ok(set) => {
                        tracing::debug!(model = predictor.name(), id = %image.id, boxes = set.len(), "predicted");
                        sets.push(set);
                    }
                    Err(error) => {
                        tracing::warn!(model = predictor.name(), id = %image.id, "prediction failed: {}", error);
                        failures.push(ImageFailure {
                            id: image.id.clone(),
                            model: Some(predictor.name().to_string()),
                            error,
                        });
                        continue 'images;
                    }
                }
            }

            for (model, set) in per_model.iter_mut().zip(sets.into_iter()) {
                model.insert(image.id.clone(), set);
            }
        }

        let mut predictions = EnsemblePredictions::new();
        for (predictor, model) in predictors.iter().zip(per_model.into_iter()) {
            let key = unique_model_key(&predictions, predictor.name());
            predictions.insert(key, model);
        }

        (predictions, failures)
    }

    /// Fuses collected predictions image by image, in index order.
    ///
    /// Images present in `index` but absent from every model's predictions
    /// are treated as failed upstream and skipped.
    pub fn fuse_predictions(&self, index: &ResolutionIndex, predictions: &EnsemblePredictions) -> EnsembleReport {
        let mut report = EnsembleReport::default();

        for image in index {
            let predicted = predictions.values().any(|m| m.contains_key(&image.id));
            if !predicted && !predictions.is_empty() {
                continue;
            }

            let sets: Vec<DetectionSet> = predictions
                .values()
                .map(|m| m.get(&image.id).cloned().unwrap_or_default())
                .collect();

            match self.fuse_image(&sets, image.resolution) {
                Ok(detections) => {
                    tracing::debug!(id = %image.id, detections = detections.len(), "fused");
                    report.results.push(ImageResult {
                        id: image.id.clone(),
                        file_name: image.file_name.clone(),
                        detections,
                    });
                }
                Err(error) => {
                    tracing::warn!(id = %image.id, "fusion failed: {}", error);
                    report.failures.push(ImageFailure {
                        id: image.id.clone(),
                        model: None,
                        error,
                    });
                }
            }
        }

        report
    }

    pub fn run<P: Predictor>(&self, index: &ResolutionIndex, predictors: &mut [P]) -> EnsembleReport {
        let (predictions, failures) = self.collect_predictions(index, predictors);
        let failed: HashSet<&str> = failures.iter().map(|f| f.id.as_str()).collect();

        let mut report = self.fuse_predictions(index, &predictions);
        report.results.retain(|r| !failed.contains(r.id.as_str()));
        report.failures.extend(failures);

        tracing::info!(
            images = report.results.len(),
            failed = report.failures.len(),
            detections = report.detection_count(),
            "ensemble done"
        );

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::{BBox, Detection};
    use crate::predictor::ModelOutput;
    use crate::resolution::ImageEntry;
    use ndarray::prelude::*;
    use std::path::PathBuf;

    struct FixedPredictor {
        name: &'static str,
        fail_on: Option<&'static str>,
        boxes: Vec<[f32; 4]>,
        score: f32,
    }

    impl Predictor for FixedPredictor {
        fn name(&self) -> &str {
            self.name
        }

        fn input_size(&self) -> Option<Resolution> {
            None
        }

        fn predict(&mut self, image: &ImageEntry) -> Result<ModelOutput, Error> {
            if self.fail_on == Some(image.id.as_str()) {
                return Err(Error::UnknownImage(image.id.clone()));
            }

            let n = self.boxes.len();
            let flat: Vec<f32> = self.boxes.iter().flat_map(|b| b.iter().copied()).collect();

            ModelOutput::new(
                Array2::from_shape_vec((n, 4), flat).unwrap(),
                Array1::from_elem(n, self.score),
                Array1::zeros(n),
            )
        }
    }

    fn index(ids: &[&str]) -> ResolutionIndex {
        ResolutionIndex::from_entries(ids.iter().map(|id| ImageEntry {
            id: id.to_string(),
            file_name: format!("{}.jpg", id),
            path: PathBuf::from(format!("{}.jpg", id)),
            resolution: Resolution::new(100, 100),
        }))
    }

    #[test]
    fn default_config_matches_reference_run() {
        let config = EnsembleConfig::default();

        assert_eq!(config.iou_thr, 0.5);
        assert_eq!(config.skip_box_thr, 0.22);
        assert_eq!(config.final_conf_thresh, 0.2);
        assert!(Ensemble::new(config).is_ok());
    }

    #[test]
    fn invalid_final_threshold_is_rejected() {
        let config = EnsembleConfig {
            final_conf_thresh: 2.0,
            ..Default::default()
        };

        assert!(Ensemble::new(config).is_err());
    }

    #[test]
    fn fuse_image_works_in_pixel_space() {
        let ensemble = Ensemble::new(EnsembleConfig::default()).unwrap();
        let sets = vec![
            vec![Detection::new(BBox::ltrb(10.0, 10.0, 50.0, 50.0), 0.8, 0)],
            vec![Detection::new(BBox::ltrb(12.0, 12.0, 52.0, 52.0), 0.6, 0)],
        ];

        let out = ensemble.fuse_image(&sets, Resolution::new(100, 100)).unwrap();
        assert_eq!(out.len(), 1);
        // (0.8 * 10 + 0.6 * 12) / 1.4 = 10.86
        assert_eq!((out[0].x, out[0].y, out[0].width, out[0].height), (11, 11, 40, 40));
        assert!((out[0].score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn fuse_image_rejects_boxes_of_another_resolution() {
        let ensemble = Ensemble::new(EnsembleConfig::default()).unwrap();
        let sets = vec![vec![Detection::new(BBox::ltrb(900.0, 500.0, 1600.0, 800.0), 0.9, 0)]];

        match ensemble.fuse_image(&sets, Resolution::new(416, 832)) {
            Err(Error::FrameMismatch { model, .. }) => assert_eq!(model, 0),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn out_of_frame_image_is_reported_as_failure() {
        let ensemble = Ensemble::new(EnsembleConfig::default()).unwrap();
        let mut predictors = vec![FixedPredictor {
            name: "big",
            fail_on: None,
            boxes: vec![[150.0, 150.0, 300.0, 300.0]],
            score: 0.9,
        }];

        let report = ensemble.run(&index(&["img1"]), &mut predictors);

        assert!(report.results.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].model, None);
        assert!(matches!(report.failures[0].error, Error::FrameMismatch { .. }));
    }

    #[test]
    fn failing_image_is_isolated() {
        let ensemble = Ensemble::new(EnsembleConfig::default()).unwrap();
        let mut predictors = vec![
            FixedPredictor { name: "a", fail_on: None, boxes: vec![[10.0, 10.0, 40.0, 40.0]], score: 0.9 },
            FixedPredictor { name: "b", fail_on: Some("img2"), boxes: vec![[11.0, 11.0, 41.0, 41.0]], score: 0.7 },
        ];

        let report = ensemble.run(&index(&["img1", "img2", "img3"]), &mut predictors);

        let ids: Vec<_> = report.results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["img1", "img3"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].id, "img2");
        assert_eq!(report.failures[0].model.as_deref(), Some("b"));
        assert!(report.results.iter().all(|r| r.detections.len() == 1));
    }

    #[test]
    fn duplicate_model_names_are_kept_apart() {
        let ensemble = Ensemble::new(EnsembleConfig::default()).unwrap();
        let mut predictors = vec![
            FixedPredictor { name: "yolo", fail_on: None, boxes: vec![], score: 0.9 },
            FixedPredictor { name: "yolo", fail_on: None, boxes: vec![], score: 0.9 },
        ];

        let (predictions, failures) = ensemble.collect_predictions(&index(&["x"]), &mut predictors);

        assert!(failures.is_empty());
        assert_eq!(predictions.keys().collect::<Vec<_>>(), vec!["yolo", "yolo_1"]);
        assert!(predictions["yolo"]["x"].is_empty());
    }

    #[test]
    fn boxed_predictors_are_accepted() {
        let ensemble = Ensemble::new(EnsembleConfig::default()).unwrap();
        let mut predictors: Vec<Box<dyn Predictor>> = vec![Box::new(FixedPredictor {
            name: "boxed",
            fail_on: None,
            boxes: vec![[0.0, 0.0, 99.0, 99.0]],
            score: 0.95,
        })];

        let report = ensemble.run(&index(&["only"]), &mut predictors);
        assert_eq!(report.results.len(), 1);
        // a single model agrees with itself
        assert!((report.results[0].detections[0].score - 0.95).abs() < 1e-6);
    }
}
