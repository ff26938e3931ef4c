//! The tracking engine: lifecycle state machine and per-frame pipeline.

use crate::config::{TrackerConfig, VideoSource};
use crate::debug::Debugger;
use crate::history::{FrameSample, PoseHistory, RotationForm, SmoothingBuffer};
use crate::registry::{RigidBody, RigidBodyRegistry};
use crate::solver::{PoseSolver, RigidBodySolver};
use crate::source::{FrameSource, ImageSequenceOpener, SourceOpener};
use crate::{ConfigError, MarkerDetector, TrackerError};
use marker_track_aruco::{ArucoDetector, Dictionary};
use marker_track_core::{CameraIntrinsics, GrayImage, GrayImageView};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Lifecycle state of a tracker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerState {
    Closed,
    Ready,
    Tracking,
}

impl fmt::Display for TrackerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TrackerState::Closed => "closed",
            TrackerState::Ready => "ready",
            TrackerState::Tracking => "tracking",
        })
    }
}

/// Pluggable collaborators of a tracker, defaulted from the configuration.
pub struct TrackerBuilder<'a> {
    config: &'a TrackerConfig,
    opener: Option<Box<dyn SourceOpener>>,
    detector: Option<Box<dyn MarkerDetector>>,
    solver: Option<Box<dyn PoseSolver>>,
    history: Option<Box<dyn PoseHistory>>,
}

impl<'a> TrackerBuilder<'a> {
    pub fn opener(mut self, opener: impl SourceOpener + 'static) -> Self {
        self.opener = Some(Box::new(opener));
        self
    }

    pub fn detector(mut self, detector: impl MarkerDetector + 'static) -> Self {
        self.detector = Some(Box::new(detector));
        self
    }

    pub fn solver(mut self, solver: impl PoseSolver + 'static) -> Self {
        self.solver = Some(Box::new(solver));
        self
    }

    pub fn history(mut self, history: impl PoseHistory + 'static) -> Self {
        self.history = Some(Box::new(history));
        self
    }

    /// Validate the configuration and open the owned source, if any.
    ///
    /// On success the tracker is [`TrackerState::Ready`].
    pub fn build(self) -> Result<ArucoTracker, TrackerError> {
        let config = self.config;
        config.validate()?;
        let dictionaries = config.dictionaries()?;
        let registry = RigidBodyRegistry::from_config(config, &dictionaries)?;
        let intrinsics = config.intrinsics()?;
        if intrinsics.is_none() {
            log::warn!("no camera projection configured, poses will not be solved");
        }
        if let Some(dir) = config.debug_dir.as_ref().filter(|_| config.debug) {
            std::fs::create_dir_all(dir).map_err(ConfigError::from)?;
        }

        let mut tracker = ArucoTracker {
            state: TrackerState::Closed,
            dictionaries,
            registry,
            intrinsics,
            marker_size: config.marker_size,
            capture: None,
            capture_properties: config.capture_properties.clone(),
            opener: self.opener.unwrap_or_else(|| Box::new(ImageSequenceOpener)),
            detector: self
                .detector
                .unwrap_or_else(|| Box::new(ArucoDetector::new(config.detector.clone()))),
            solver: self
                .solver
                .unwrap_or_else(|| Box::new(RigidBodySolver::default())),
            history: self
                .history
                .unwrap_or_else(|| Box::new(SmoothingBuffer::new(config.smoothing_buffer))),
            debugger: Debugger::new(
                config.debug,
                config.debug_subsample,
                config.debug_dir.clone(),
            ),
            frame_index: 0,
        };
        tracker.capture = tracker.open_source(&config.video_source)?;
        tracker.state = TrackerState::Ready;
        log::info!(
            "tracker ready: {} dictionaries, {} rigid bodies, source {}",
            tracker.dictionaries.len(),
            tracker.registry.len(),
            config.video_source
        );
        Ok(tracker)
    }
}

/// Multi-dictionary marker tracker.
///
/// `Closed -> Ready` on construction, `Ready <-> Tracking` via
/// [`start_tracking`](Self::start_tracking) / [`stop_tracking`](Self::stop_tracking),
/// and any state `-> Closed` via [`close`](Self::close).
pub struct ArucoTracker {
    state: TrackerState,
    dictionaries: Vec<Dictionary>,
    registry: RigidBodyRegistry,
    intrinsics: Option<CameraIntrinsics>,
    marker_size: f64,
    capture: Option<Box<dyn FrameSource>>,
    capture_properties: BTreeMap<String, f64>,
    opener: Box<dyn SourceOpener>,
    detector: Box<dyn MarkerDetector>,
    solver: Box<dyn PoseSolver>,
    history: Box<dyn PoseHistory>,
    debugger: Debugger,
    frame_index: u64,
}

impl ArucoTracker {
    /// Tracker with the default detector, solver, smoothing and source opener.
    pub fn new(config: &TrackerConfig) -> Result<Self, TrackerError> {
        Self::builder(config).build()
    }

    pub fn builder(config: &TrackerConfig) -> TrackerBuilder<'_> {
        TrackerBuilder {
            config,
            opener: None,
            detector: None,
            solver: None,
            history: None,
        }
    }

    #[inline]
    pub fn state(&self) -> TrackerState {
        self.state
    }

    /// Index the next processed frame will carry.
    #[inline]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Whether the tracker owns its frame source.
    #[inline]
    pub fn has_capture(&self) -> bool {
        self.capture.is_some()
    }

    pub fn dictionaries(&self) -> &[Dictionary] {
        &self.dictionaries
    }

    pub fn registry(&self) -> &RigidBodyRegistry {
        &self.registry
    }

    pub fn intrinsics(&self) -> Option<&CameraIntrinsics> {
        self.intrinsics.as_ref()
    }

    pub fn start_tracking(&mut self) -> Result<(), TrackerError> {
        self.transition("start tracking", TrackerState::Ready, TrackerState::Tracking)
    }

    pub fn stop_tracking(&mut self) -> Result<(), TrackerError> {
        self.transition("stop tracking", TrackerState::Tracking, TrackerState::Ready)
    }

    /// Release the owned source and move to [`TrackerState::Closed`]. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.release();
        }
        if self.state != TrackerState::Closed {
            log::info!("tracker closed after {} frames", self.frame_index);
        }
        self.state = TrackerState::Closed;
    }

    /// Replace the owned source. Only allowed while ready.
    ///
    /// The current source is released before the new one is opened; if
    /// opening fails the tracker is closed.
    pub fn update_source(&mut self, source: &VideoSource) -> Result<(), TrackerError> {
        if self.state != TrackerState::Ready {
            return Err(TrackerError::InvalidState {
                operation: "update source",
                state: self.state,
            });
        }
        if let Some(mut capture) = self.capture.take() {
            capture.release();
        }
        match self.open_source(source) {
            Ok(capture) => {
                self.capture = capture;
                log::info!("video source switched to {source}");
                Ok(())
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    /// Process one frame and return one sample per active body.
    ///
    /// With an owned source the next frame is read from it and `frame` is
    /// ignored; otherwise `frame` is required and its buffer must hold
    /// `width * height` pixels. Samples list configured bodies
    /// in registry order, then single-marker bodies in detection order.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip_all, fields(frame = self.frame_index))
    )]
    pub fn get_frame(
        &mut self,
        frame: Option<GrayImageView<'_>>,
    ) -> Result<Vec<FrameSample>, TrackerError> {
        if self.state != TrackerState::Tracking {
            return Err(TrackerError::InvalidState {
                operation: "get frame",
                state: self.state,
            });
        }

        let owned: GrayImage;
        let image = match (self.capture.as_mut(), frame) {
            (Some(capture), _) => {
                owned = capture.read().ok_or(TrackerError::EndOfStream)?;
                owned.view()
            }
            (None, Some(frame)) if frame.is_well_formed() => frame,
            (None, Some(_)) => {
                return Err(TrackerError::InvalidArgument(
                    "frame buffer length does not match its width and height",
                ))
            }
            (None, None) => {
                return Err(TrackerError::InvalidArgument(
                    "a frame must be supplied when the tracker has no video source",
                ))
            }
        };

        Ok(self.process(&image))
    }

    fn process(&mut self, image: &GrayImageView<'_>) -> Vec<FrameSample> {
        self.registry.reset();
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0.0, |d| d.as_secs_f64());

        let mut transient: Vec<RigidBody> = Vec::new();
        for dict in &self.dictionaries {
            let detections = self.detector.detect(image, dict);
            self.debugger
                .show(image, self.frame_index, dict.name, &detections);
            if detections.is_empty() {
                continue;
            }

            let claimed = self.registry.assign(dict.name, &detections);
            let mut adhoc = HashSet::new();
            for det in &detections {
                if claimed.contains(&det.id) || !adhoc.insert(det.id) {
                    continue;
                }
                let mut body = RigidBody::single_marker(dict, det.id, self.marker_size);
                body.assign(std::iter::once(det));
                transient.push(body);
            }
            log::debug!(
                "frame {} {}: {} markers, {} claimed by rigid bodies",
                self.frame_index,
                dict.name,
                detections.len(),
                claimed.len()
            );
        }

        let samples: Vec<FrameSample> = self
            .registry
            .bodies()
            .iter()
            .chain(&transient)
            .map(|body| {
                let estimate = self.solver.solve(body, self.intrinsics.as_ref());
                FrameSample {
                    name: body.name().to_string(),
                    timestamp,
                    frame_index: self.frame_index,
                    pose: estimate.pose,
                    quality: estimate.quality,
                }
            })
            .collect();

        self.history.push_frame(&samples, RotationForm::Matrix);
        self.frame_index += 1;

        let names: Vec<&str> = samples.iter().map(|s| s.name.as_str()).collect();
        self.history.query(&names)
    }

    fn transition(
        &mut self,
        operation: &'static str,
        from: TrackerState,
        to: TrackerState,
    ) -> Result<(), TrackerError> {
        if self.state != from {
            return Err(TrackerError::InvalidState {
                operation,
                state: self.state,
            });
        }
        self.state = to;
        log::info!("tracker {from} -> {to}");
        Ok(())
    }

    fn open_source(
        &self,
        source: &VideoSource,
    ) -> Result<Option<Box<dyn FrameSource>>, TrackerError> {
        if *source == VideoSource::External {
            if !self.capture_properties.is_empty() {
                log::warn!("capture properties ignored, frames are supplied externally");
            }
            return Ok(None);
        }
        let mut capture = self.opener.open(source)?;
        for (name, value) in &self.capture_properties {
            if let Err(e) = capture.set_property(name, *value) {
                capture.release();
                return Err(e.into());
            }
        }
        Ok(Some(capture))
    }
}

impl Drop for ArucoTracker {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Detection;
    use nalgebra::Point2;

    /// Reports a fixed set of ids for every dictionary.
    struct FixedDetector(Vec<u32>);

    impl MarkerDetector for FixedDetector {
        fn detect(&self, _: &GrayImageView<'_>, dictionary: &Dictionary) -> Vec<Detection> {
            self.0
                .iter()
                .map(|&id| Detection {
                    dictionary: dictionary.name,
                    id,
                    corners: [Point2::new(id as f32, 0.0); 4],
                })
                .collect()
        }
    }

    fn tracker(ids: Vec<u32>, config: &TrackerConfig) -> ArucoTracker {
        ArucoTracker::builder(config)
            .detector(FixedDetector(ids))
            .build()
            .expect("tracker")
    }

    #[test]
    fn lifecycle_transitions() {
        let cfg = TrackerConfig::external();
        let mut t = tracker(vec![], &cfg);
        assert_eq!(t.state(), TrackerState::Ready);
        assert!(!t.has_capture());
        assert!(matches!(
            t.stop_tracking(),
            Err(TrackerError::InvalidState { state: TrackerState::Ready, .. })
        ));
        t.start_tracking().expect("start");
        assert_eq!(t.state(), TrackerState::Tracking);
        t.stop_tracking().expect("stop");
        t.close();
        t.close();
        assert_eq!(t.state(), TrackerState::Closed);
        assert!(t.start_tracking().is_err());
    }

    #[test]
    fn configured_bodies_first_then_adhoc_in_detection_order() {
        let cfg = TrackerConfig::from_json_str(
            r#"{
                "video_source": "none",
                "rigid_bodies": [{ "name": "tool", "markers": [
                    { "id": 5, "corners": [[-5,5,0],[5,5,0],[5,-5,0],[-5,-5,0]] }
                ] }]
            }"#,
        )
        .expect("config");
        let mut t = tracker(vec![9, 5, 2], &cfg);
        t.start_tracking().expect("start");
        let img = GrayImage::filled(4, 4, 0);
        let names: Vec<String> = t
            .get_frame(Some(img.view()))
            .expect("frame")
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, ["tool", "DICT_4X4_50:9", "DICT_4X4_50:2"]);
        assert_eq!(t.registry().bodies()[0].observed().len(), 1);
    }

    #[test]
    fn missing_frame_is_invalid_argument() {
        let cfg = TrackerConfig::external();
        let mut t = tracker(vec![], &cfg);
        t.start_tracking().expect("start");
        assert!(matches!(
            t.get_frame(None),
            Err(TrackerError::InvalidArgument(_))
        ));
        assert_eq!(t.frame_index(), 0);
    }

    #[test]
    fn update_source_requires_ready_state() {
        let cfg = TrackerConfig::external();
        let mut t = tracker(vec![], &cfg);
        t.start_tracking().expect("start");
        assert!(matches!(
            t.update_source(&VideoSource::External),
            Err(TrackerError::InvalidState { .. })
        ));
        t.stop_tracking().expect("stop");
        assert!(t.update_source(&VideoSource::Device(3)).is_err());
        assert_eq!(t.state(), TrackerState::Closed);
    }
}
