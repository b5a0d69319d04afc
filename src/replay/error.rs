use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
pub type EngineError = BoxError;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("no readable directory or manifest file at {0}")]
    NotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("failed to read calibration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("calibration line {line}: {msg}")]
    Parse { line: usize, msg: String },
    #[error("invalid intrinsics: fx={fx} fy={fy} (focal lengths must be > 0)")]
    InvalidIntrinsics { fx: f64, fy: f64 },
    #[error("unsupported output mode '{0}' (expected 'none' or explicit intrinsics)")]
    UnsupportedOutputMode(String),
    #[error("{0} distortion is not supported by this undistorter")]
    UnsupportedModel(&'static str),
    #[cfg(feature = "opencv")]
    #[error("opencv: {0}")]
    OpenCv(#[from] opencv::Error),
}

#[derive(Debug, Error)]
pub enum FrameDecodeError {
    #[error("failed to load image {path}: {msg}")]
    Unreadable { path: PathBuf, msg: String },
    #[error("image {path} is empty")]
    Empty { path: PathBuf },
    #[error("failed to rectify image {path}: {msg}")]
    Rectify { path: PathBuf, msg: String },
    #[error(
        "image {path} has wrong dimensions - expecting {expected_width} x {expected_height}, found {width} x {height}"
    )]
    DimensionMismatch {
        path: PathBuf,
        expected_width: u32,
        expected_height: u32,
        width: u32,
        height: u32,
    },
}

#[derive(Debug, Error)]
pub enum DepthError {
    #[error("failed to read depth file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("depth file {path} holds {found} samples, expected {expected}")]
    LengthMismatch {
        path: PathBuf,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("need {what}! (set using _{param}:=...)")]
    Missing { param: &'static str, what: &'static str },
    #[error("invalid value for _{param}: {value}")]
    Invalid { param: &'static str, value: String },
    #[error("failed to read parameter _{param}: {msg}")]
    Source { param: &'static str, msg: String },
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Depth(#[from] DepthError),
    #[error("engine {stage} failed: {source}")]
    Engine {
        stage: &'static str,
        #[source]
        source: EngineError,
    },
}

impl ReplayError {
    pub fn engine(stage: &'static str, source: EngineError) -> Self {
        ReplayError::Engine { stage, source }
    }
}
