use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use config::Config;

use crate::ensemble::EnsembleConfig;
use crate::error::Error;
use crate::report::{ClassLabels, OverlayStyle};
use crate::resolution::DEFAULT_EXTENSIONS;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub fusion: EnsembleConfig,
    pub input: InputConfig,
    pub output: OutputConfig,
    /// Class names shown in overlay captions.
    pub labels: ClassLabels,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub image_dir: PathBuf,
    pub extensions: Vec<String>,
    /// One detector export per model.
    pub predictions: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub submission: PathBuf,
    pub overlay_dir: Option<PathBuf>,
    pub overlay: OverlayStyle,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            fusion: EnsembleConfig::default(),
            input: InputConfig::default(),
            output: OutputConfig::default(),
            labels: ClassLabels::default(),
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            image_dir: PathBuf::from("test"),
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            predictions: Vec::new(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            submission: PathBuf::from("submission.csv"),
            overlay_dir: Some(PathBuf::from("wbf_inference")),
            overlay: OverlayStyle::default(),
        }
    }
}

impl fmt::Display for EnsembleConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "iou_thr {}, skip_box_thr {}, final_conf_thresh {}, dampening {:?}",
            self.iou_thr, self.skip_box_thr, self.final_conf_thresh, self.dampening
        )
    }
}

impl AppConfig {
    /// Layers an optional YAML file and `WBF_*` environment variables
    /// (`WBF_FUSION__IOU_THR=0.55`) over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("WBF")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }
}
