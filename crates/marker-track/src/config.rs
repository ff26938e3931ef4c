//! Tracker configuration: a flat JSON mapping with defaults for every key.

use crate::registry::MarkerGeometry;
use crate::ConfigError;
use marker_track_aruco::{builtins, ArucoDetectorParams, Dictionary};
use marker_track_core::CameraIntrinsics;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// The only tracker type this crate implements.
pub const TRACKER_TYPE: &str = "aruco";

/// Where frames come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VideoSource {
    /// Capture device index.
    Device(i64),
    /// Video file, image file or directory of images.
    Path(PathBuf),
    /// Frames are handed to every `get_frame` call by the caller.
    External,
}

impl Default for VideoSource {
    fn default() -> Self {
        VideoSource::Device(0)
    }
}

impl fmt::Display for VideoSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoSource::Device(id) => write!(f, "device {id}"),
            VideoSource::Path(p) => write!(f, "{}", p.display()),
            VideoSource::External => f.write_str("none"),
        }
    }
}

impl Serialize for VideoSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            VideoSource::Device(id) => serializer.serialize_i64(*id),
            VideoSource::Path(p) => serializer.collect_str(&p.display()),
            VideoSource::External => serializer.serialize_str("none"),
        }
    }
}

impl<'de> Deserialize<'de> for VideoSource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Device(i64),
            Path(String),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Device(id) => VideoSource::Device(id),
            Raw::Path(s) if s == "none" => VideoSource::External,
            Raw::Path(s) => VideoSource::Path(PathBuf::from(s)),
        })
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

/// One marker of a configured rigid body, in body coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerConfig {
    pub id: u32,
    /// TL, TR, BR, BL corners.
    pub corners: [[f64; 3]; 4],
}

/// A configured multi-marker rigid body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RigidBodyConfig {
    pub name: String,
    /// Dictionary the body's markers belong to; defaults to the first configured one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aruco_dictionary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub markers: Vec<MarkerConfig>,
    /// Tag geometry file, used when `markers` is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<PathBuf>,
}

impl RigidBodyConfig {
    /// Resolve the marker geometry from inline markers or the geometry file.
    pub fn geometry(&self) -> Result<Vec<MarkerGeometry>, ConfigError> {
        let geometry = match (&self.filename, self.markers.is_empty()) {
            (Some(path), true) => {
                let text = fs::read_to_string(path)?;
                MarkerGeometry::parse_table(&text).map_err(|reason| ConfigError::BodyGeometry {
                    body: self.name.clone(),
                    reason,
                })?
            }
            _ => self
                .markers
                .iter()
                .map(|m| MarkerGeometry::from_corners(m.id, m.corners))
                .collect(),
        };
        if geometry.is_empty() {
            return Err(ConfigError::BodyGeometry {
                body: self.name.clone(),
                reason: "no markers".into(),
            });
        }
        Ok(geometry)
    }
}

fn default_tracker_type() -> String {
    TRACKER_TYPE.to_string()
}

fn default_debug_subsample() -> usize {
    4
}

fn default_dictionaries() -> Vec<String> {
    vec![builtins::DICT_4X4_50.name.to_string()]
}

fn default_marker_size() -> f64 {
    50.0
}

fn default_smoothing_buffer() -> usize {
    1
}

/// Tracker configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_tracker_type")]
    pub tracker_type: String,
    #[serde(default)]
    pub video_source: VideoSource,
    #[serde(default)]
    pub debug: bool,
    /// Show every n-th frame when debugging.
    #[serde(default = "default_debug_subsample")]
    pub debug_subsample: usize,
    /// Directory for annotated debug frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_dir: Option<PathBuf>,
    #[serde(default = "default_dictionaries", deserialize_with = "one_or_many")]
    pub aruco_dictionary: Vec<String>,
    /// Side of ad-hoc single-marker bodies, in mm.
    #[serde(default = "default_marker_size")]
    pub marker_size: f64,
    /// Raw 3x3 projection matrix; validated by [`TrackerConfig::intrinsics`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_projection: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_distortion: Option<Value>,
    /// Calibration text file; overrides the two fields above.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration: Option<PathBuf>,
    #[serde(default)]
    pub capture_properties: BTreeMap<String, f64>,
    #[serde(default)]
    pub rigid_bodies: Vec<RigidBodyConfig>,
    #[serde(default = "default_smoothing_buffer")]
    pub smoothing_buffer: usize,
    #[serde(default)]
    pub detector: ArucoDetectorParams,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tracker_type: default_tracker_type(),
            video_source: VideoSource::default(),
            debug: false,
            debug_subsample: default_debug_subsample(),
            debug_dir: None,
            aruco_dictionary: default_dictionaries(),
            marker_size: default_marker_size(),
            camera_projection: None,
            camera_distortion: None,
            calibration: None,
            capture_properties: BTreeMap::new(),
            rigid_bodies: Vec::new(),
            smoothing_buffer: default_smoothing_buffer(),
            detector: ArucoDetectorParams::default(),
        }
    }
}

impl TrackerConfig {
    /// Config for frames supplied per call, with no owned source.
    pub fn external() -> Self {
        Self {
            video_source: VideoSource::External,
            ..Self::default()
        }
    }

    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Parse a JSON config.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Check scalar settings that do not depend on other files.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.tracker_type.eq_ignore_ascii_case(TRACKER_TYPE) {
            return Err(ConfigError::TrackerType(self.tracker_type.clone()));
        }
        if !self.marker_size.is_finite() || self.marker_size <= 0.0 {
            return Err(ConfigError::MarkerSize(self.marker_size));
        }
        if self.debug_subsample == 0 {
            return Err(ConfigError::ZeroCount {
                key: "debug_subsample",
            });
        }
        if self.smoothing_buffer == 0 {
            return Err(ConfigError::ZeroCount {
                key: "smoothing_buffer",
            });
        }
        Ok(())
    }

    /// Resolve the configured dictionary names, in order.
    pub fn dictionaries(&self) -> Result<Vec<Dictionary>, ConfigError> {
        if self.aruco_dictionary.is_empty() {
            return Err(ConfigError::NoDictionary);
        }
        let mut out: Vec<Dictionary> = Vec::with_capacity(self.aruco_dictionary.len());
        for name in &self.aruco_dictionary {
            let dict = builtins::builtin_dictionary(name)
                .ok_or_else(|| ConfigError::UnknownDictionary(name.clone()))?;
            if !out.contains(&dict) {
                out.push(dict);
            }
        }
        Ok(out)
    }

    /// Validated camera intrinsics, or `None` when no projection is configured.
    ///
    /// A calibration file takes precedence over inline values.
    pub fn intrinsics(&self) -> Result<Option<CameraIntrinsics>, ConfigError> {
        if let Some(path) = &self.calibration {
            return Ok(Some(CameraIntrinsics::load(path)?));
        }
        match &self.camera_projection {
            Some(projection) => Ok(Some(CameraIntrinsics::from_json(
                projection,
                self.camera_distortion.as_ref(),
            )?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marker_track_core::CalibrationError;

    #[test]
    fn empty_object_uses_defaults() {
        let cfg = TrackerConfig::from_json_str("{}").expect("config");
        assert_eq!(cfg.tracker_type, "aruco");
        assert_eq!(cfg.video_source, VideoSource::Device(0));
        assert_eq!(cfg.debug_subsample, 4);
        assert_eq!(cfg.aruco_dictionary, vec!["DICT_4X4_50".to_string()]);
        assert_eq!(cfg.marker_size, 50.0);
        assert_eq!(cfg.smoothing_buffer, 1);
        assert!(cfg.validate().is_ok());
        assert!(cfg.intrinsics().expect("intrinsics").is_none());
    }

    #[test]
    fn video_source_selectors() {
        let parse = |v: &str| {
            TrackerConfig::from_json_str(&format!(r#"{{ "video_source": {v} }}"#))
                .expect("config")
                .video_source
        };
        assert_eq!(parse("2"), VideoSource::Device(2));
        assert_eq!(parse(r#""none""#), VideoSource::External);
        assert_eq!(parse(r#""clip.avi""#), VideoSource::Path("clip.avi".into()));
    }

    #[test]
    fn dictionary_list_and_unknown_names() {
        let cfg = TrackerConfig::from_json_str(
            r#"{ "aruco_dictionary": ["DICT_4X4_100", "DICT_4X4_50"] }"#,
        )
        .expect("config");
        let names: Vec<&str> = cfg
            .dictionaries()
            .expect("dicts")
            .iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, ["DICT_4X4_100", "DICT_4X4_50"]);

        let cfg = TrackerConfig::from_json_str(r#"{ "aruco_dictionary": "DICT_ARUCO_ORIGINAL" }"#)
            .expect("config");
        assert!(matches!(
            cfg.dictionaries(),
            Err(ConfigError::UnknownDictionary(_))
        ));
    }

    #[test]
    fn integer_projection_is_rejected() {
        let cfg = TrackerConfig::from_json_str(
            r#"{ "camera_projection": [[560, 0, 320], [0, 560, 240], [0, 0, 1]] }"#,
        )
        .expect("config");
        assert!(matches!(
            cfg.intrinsics(),
            Err(ConfigError::Calibration(
                CalibrationError::NonFloatElement { row: 0, col: 0 }
            ))
        ));
    }

    #[test]
    fn scalar_validation() {
        let cfg = TrackerConfig {
            marker_size: 0.0,
            ..TrackerConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::MarkerSize(_))));
        let cfg = TrackerConfig {
            tracker_type: "optical".into(),
            ..TrackerConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::TrackerType(_))));
    }

    #[test]
    fn json_round_trip_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tracker.json");
        let mut cfg = TrackerConfig::external();
        cfg.capture_properties.insert("CAP_PROP_POS_FRAMES".into(), 3.0);
        cfg.write_json(&path).expect("write");
        let back = TrackerConfig::load_json(&path).expect("load");
        assert_eq!(back.video_source, VideoSource::External);
        assert_eq!(back.capture_properties["CAP_PROP_POS_FRAMES"], 3.0);
    }
}
