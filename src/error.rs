use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("npy error at {path}: {msg}")]
    Npy { path: PathBuf, msg: String },
    #[error("json parse error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("bad annotation at {path}: {msg}")]
    Annotation { path: PathBuf, msg: String },
    #[error("roi {rect:?} of {image} is outside the {width}x{height} frame")]
    RoiOutOfBounds {
        image: PathBuf,
        rect: [f32; 4],
        width: f32,
        height: f32,
    },
    #[error("{image} has {count} rois but at most {max} are allowed")]
    TooManyRois {
        image: PathBuf,
        count: usize,
        max: usize,
    },
    #[error(
        "missing input files: {}. {hint}",
        .paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
    )]
    MissingInputs { paths: Vec<PathBuf>, hint: String },
    #[error("graph error: {0}")]
    Graph(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
