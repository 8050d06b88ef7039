use std::path::PathBuf;

use err_derive::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(display = "Io Error: {}", _0)]
    Io(std::io::Error),

    #[error(display = "Image Error: {}", _0)]
    Image(image::ImageError),

    #[error(display = "Json Error: {}", _0)]
    Json(serde_json::Error),

    #[error(display = "Config Error: {}", _0)]
    Config(config::ConfigError),

    #[error(display = "Threshold `{}` must be within [0, 1], got {}", name, value)]
    InvalidThreshold { name: &'static str, value: f32 },

    #[error(display = "Model #{} has a box outside the expected frame: {:?}", model, coords)]
    FrameMismatch { model: usize, coords: [f32; 4] },

    #[error(display = "Shape mismatch: {}", _0)]
    ShapeMismatch(String),

    #[error(display = "Unknown image `{}`", _0)]
    UnknownImage(String),

    #[error(display = "Invalid font file {:?}", _0)]
    InvalidFont(PathBuf),

    #[error(display = "Cannot read image {:?}: {}", path, cause)]
    UnreadableImage { path: PathBuf, cause: image::ImageError },
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Self::Image(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err)
    }
}
