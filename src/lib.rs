pub mod config;
pub mod ensemble;
pub mod error;
pub mod fusion;
pub mod predictor;
pub mod report;
pub mod resolution;

pub use ensemble::{Ensemble, EnsembleConfig, EnsembleReport, ImageFailure, ImageResult};
pub use error::Error;
pub use fusion::{
    BBox, Detection, DetectionSet, FusedDetection, Ltrb, Ltwh, PixelDetection, Resolution, ScoreDampening,
    WeightedBoxesFusion,
};
pub use predictor::{EnsemblePredictions, JsonPredictor, ModelOutput, ModelPredictions, Predictor};
pub use resolution::{ImageEntry, ResolutionIndex};
