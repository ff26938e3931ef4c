//! Pose solving capability and the default closed-form solver.

use crate::RigidBody;
use marker_track_core::{
    fit_plane, pose_from_dlt, pose_from_planar, reprojection_rms, CameraIntrinsics, RigidTransform,
};
use nalgebra::{Point2, Point3};
use serde::Serialize;

/// Result of solving one body in one frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PoseEstimate {
    /// Body-to-camera transform; `None` when unsolved.
    pub pose: Option<RigidTransform>,
    /// Confidence in `[0, 1]`, `0` when unsolved.
    pub quality: f64,
}

impl PoseEstimate {
    pub fn unsolved() -> Self {
        Self {
            pose: None,
            quality: 0.0,
        }
    }
}

/// Solves the pose of a body from the markers it claimed this frame.
///
/// Degenerate input must produce [`PoseEstimate::unsolved`], never an error.
pub trait PoseSolver {
    fn solve(&self, body: &RigidBody, intrinsics: Option<&CameraIntrinsics>) -> PoseEstimate;
}

/// Homography decomposition for planar bodies, linear DLT otherwise.
#[derive(Clone, Debug)]
pub struct RigidBodySolver {
    /// Out-of-plane RMS, relative to the body extent, below which points
    /// are treated as coplanar.
    pub coplanar_tolerance: f64,
    /// Largest accepted reprojection RMS in normalized image coordinates.
    pub max_reprojection_rms: f64,
}

impl Default for RigidBodySolver {
    fn default() -> Self {
        Self {
            coplanar_tolerance: 1e-3,
            max_reprojection_rms: 0.02,
        }
    }
}

impl RigidBodySolver {
    fn solve_points(
        &self,
        object: &[Point3<f64>],
        image: &[Point2<f64>],
    ) -> Option<RigidTransform> {
        if object.len() < 4 || image_spread(image) < 1e-9 {
            return None;
        }
        let (centroid, basis, rms) = fit_plane(object)?;
        let extent = object
            .iter()
            .map(|p| (p - centroid).norm())
            .fold(0.0, f64::max);
        if extent <= 0.0 {
            return None;
        }

        let pose = if rms <= self.coplanar_tolerance * extent {
            // Solve in plane coordinates, then map back into the body frame.
            let to_plane = basis.transpose();
            let plane: Vec<Point2<f64>> = object
                .iter()
                .map(|p| {
                    let q = to_plane * (p - centroid);
                    Point2::new(q.x, q.y)
                })
                .collect();
            let in_plane = pose_from_planar(&plane, image)?;
            let rotation = in_plane.rotation * to_plane;
            let translation = in_plane.translation - rotation * centroid.coords;
            RigidTransform::new(rotation, translation)
        } else {
            pose_from_dlt(object, image)?
        };

        // `None` when any point lands behind the camera.
        let rms = reprojection_rms(&pose, object, image)?;
        (rms <= self.max_reprojection_rms).then_some(pose)
    }
}

fn image_spread(image: &[Point2<f64>]) -> f64 {
    let Some(first) = image.first() else {
        return 0.0;
    };
    image
        .iter()
        .map(|p| (p - first).norm())
        .fold(0.0, f64::max)
}

impl PoseSolver for RigidBodySolver {
    fn solve(&self, body: &RigidBody, intrinsics: Option<&CameraIntrinsics>) -> PoseEstimate {
        let Some(intrinsics) = intrinsics else {
            return PoseEstimate::unsolved();
        };
        if body.observed().is_empty() || body.markers().is_empty() {
            return PoseEstimate::unsolved();
        }

        let (object, pixels) = body.correspondences();
        let Some(image) = pixels
            .iter()
            .map(|&p| intrinsics.undistort_normalized(p))
            .collect::<Option<Vec<_>>>()
        else {
            return PoseEstimate::unsolved();
        };

        match self.solve_points(&object, &image) {
            Some(pose) => PoseEstimate {
                pose: Some(pose),
                quality: (body.observed().len() as f64 / body.markers().len() as f64)
                    .clamp(0.0, 1.0),
            },
            None => {
                log::debug!("{}: pose unsolved from {} points", body.name(), object.len());
                PoseEstimate::unsolved()
            }
        }
    }
}
