//! Frame-by-frame 6DOF tracking of rigid bodies carrying planar fiducial markers.
//!
//! [`ArucoTracker`] runs, for every frame:
//!
//! 1. marker detection for each configured dictionary,
//! 2. assignment of detections to configured [`RigidBody`]s, first claim wins
//!    in registry order,
//! 3. a single-marker body named `"<dictionary>:<id>"` for every unclaimed marker,
//! 4. pose solving for every body with the validated [`CameraIntrinsics`],
//! 5. a hand-off to the [`PoseHistory`] sink, whose (possibly smoothed)
//!    result is returned.
//!
//! Detection, pose solving, smoothing and frame acquisition sit behind the
//! [`MarkerDetector`], [`PoseSolver`], [`PoseHistory`] and [`SourceOpener`]
//! traits; defaults come from `marker-track-aruco` and this crate.
//!
//! ```no_run
//! use marker_track::{ArucoTracker, TrackerConfig};
//! use marker_track::GrayImage;
//!
//! let config = TrackerConfig::external();
//! let mut tracker = ArucoTracker::new(&config)?;
//! tracker.start_tracking()?;
//! let frame = GrayImage::filled(640, 480, 255);
//! for sample in tracker.get_frame(Some(frame.view()))? {
//!     println!("{} q={:.2}", sample.name, sample.quality);
//! }
//! tracker.close();
//! # Ok::<(), marker_track::TrackerError>(())
//! ```

pub mod config;
mod debug;
mod detection;
mod error;
mod history;
mod registry;
mod solver;
pub mod source;
mod tracker;

pub use config::{MarkerConfig, RigidBodyConfig, TrackerConfig, VideoSource};
pub use debug::Debugger;
pub use detection::{Detection, MarkerDetector};
pub use error::{ConfigError, TrackerError};
pub use history::{FrameSample, PoseHistory, RotationForm, SmoothingBuffer};
pub use registry::{MarkerGeometry, ObservedMarker, RigidBody, RigidBodyRegistry};
pub use solver::{PoseEstimate, PoseSolver, RigidBodySolver};
pub use source::{FrameSource, ImageSequence, ImageSequenceOpener, SourceOpener};
pub use tracker::{ArucoTracker, TrackerBuilder, TrackerState};

pub use marker_track_aruco::{builtins, ArucoDetector, ArucoDetectorParams, Dictionary};
pub use marker_track_core::{
    init_with_level, CalibrationError, CameraIntrinsics, GrayImage, GrayImageView, RigidTransform,
};

#[cfg(feature = "tracing")]
pub use marker_track_core::init_tracing;
