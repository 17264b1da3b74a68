use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SsdError>;

#[derive(Debug, Error)]
pub enum SsdError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("xml parse error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("image error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("pixel buffer does not fit a {width}x{height} image")]
    ImageBuffer { width: u32, height: u32 },
    #[error("annotation object is missing <{0}>")]
    MissingField(&'static str),
    #[error("invalid number {value:?} in <{field}>")]
    InvalidNumber { field: &'static str, value: String },
    #[error("unknown class name {0:?}")]
    UnknownClass(String),
    #[error("invalid multibox configuration: {0}")]
    InvalidConfig(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("checkpoint error at {path}: {msg}")]
    Recorder { path: PathBuf, msg: String },
    #[error("dataset at {0} has no samples")]
    EmptyDataset(PathBuf),
    #[error("image contains no valid bounding boxes")]
    NoBoxes,
    #[error("loss is not finite at iteration {iteration}")]
    NonFiniteLoss { iteration: usize },
    #[error("log report serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl SsdError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SsdError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn image(path: impl Into<PathBuf>, source: image::ImageError) -> Self {
        SsdError::Image {
            path: path.into(),
            source,
        }
    }
}
