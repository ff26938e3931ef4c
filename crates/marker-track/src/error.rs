use marker_track_core::CalibrationError;
use thiserror::Error;

use crate::TrackerState;

/// Invalid or inconsistent configuration, detected eagerly at construction.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error("unsupported tracker type `{0}`")]
    TrackerType(String),
    #[error("unknown marker dictionary `{0}`")]
    UnknownDictionary(String),
    #[error("at least one marker dictionary must be configured")]
    NoDictionary,
    #[error("rigid body `{body}` uses dictionary `{dictionary}`, which is not configured")]
    BodyDictionary { body: String, dictionary: String },
    #[error("rigid body `{body}`: {reason}")]
    BodyGeometry { body: String, reason: String },
    #[error("rigid body name `{0}` is reserved for single-marker bodies")]
    ReservedName(String),
    #[error("duplicate rigid body name `{0}`")]
    DuplicateBody(String),
    #[error("unknown capture property `{0}`")]
    CaptureProperty(String),
    #[error("invalid value {value} for capture property `{name}`")]
    CapturePropertyValue { name: String, value: f64 },
    #[error("marker size must be finite and positive, got {0}")]
    MarkerSize(f64),
    #[error("`{key}` must be at least 1")]
    ZeroCount { key: &'static str },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Errors raised by the tracker. Nothing is retried internally.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error("failed to open video source {selector}: {reason}")]
    SourceOpen { selector: String, reason: String },
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: TrackerState,
    },
    #[error("end of video stream")]
    EndOfStream,
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

impl From<CalibrationError> for TrackerError {
    fn from(e: CalibrationError) -> Self {
        TrackerError::Configuration(ConfigError::Calibration(e))
    }
}
