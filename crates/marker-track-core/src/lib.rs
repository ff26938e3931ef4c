//! Core types for fiducial marker tracking.
//!
//! This crate is purely geometric: gray images, homographies, validated
//! camera intrinsics and closed-form pose recovery. It knows nothing about
//! marker dictionaries or tracking sessions.

mod camera;
mod homography;
mod image;
mod logger;
mod pose;

pub use camera::{CalibrationError, CameraIntrinsics, DEFAULT_DISTORTION, MIN_DISTORTION_COEFFS};
pub use homography::{estimate_homography, homography_from_4pt, Homography};
pub use image::{GrayImage, GrayImageView};
pub use pose::{
    fit_plane, nearest_rotation, pose_from_dlt, pose_from_planar, reprojection_rms, RigidTransform,
};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
