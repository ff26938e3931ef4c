//! Rigid transforms and closed-form pose recovery from 2D-3D correspondences.
//!
//! Image points are expected in undistorted *normalized* camera coordinates
//! (`K^-1 * pixel`), so the recovered transform maps body coordinates into the
//! camera frame directly.

use nalgebra::{DMatrix, Matrix3, Point2, Point3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::estimate_homography;

/// Rotation + translation mapping body coordinates into the camera frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RigidTransform {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

impl RigidTransform {
    pub fn new(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    #[inline]
    pub fn transform_point(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation * p.coords + self.translation)
    }

    /// Unit quaternion of the rotation part.
    pub fn quaternion(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::from_matrix(&self.rotation)
    }
}

/// Closest rotation matrix (Frobenius norm) to `m`, with `det = +1`.
pub fn nearest_rotation(m: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    let svd = m.svd(true, true);
    let u = svd.u?;
    let vt = svd.v_t?;
    let mut r = u * vt;
    if r.determinant() < 0.0 {
        let mut d = Matrix3::identity();
        d[(2, 2)] = -1.0;
        r = u * d * vt;
    }
    Some(r)
}

/// Best-fit plane through `points`: returns `(centroid, basis)` where the basis
/// columns are the in-plane axes and the normal, plus the out-of-plane RMS.
pub fn fit_plane(points: &[Point3<f64>]) -> Option<(Point3<f64>, Matrix3<f64>, f64)> {
    if points.len() < 3 {
        return None;
    }
    let n = points.len() as f64;
    let centroid = Point3::from(points.iter().map(|p| p.coords).sum::<Vector3<f64>>() / n);

    let mut cov = Matrix3::zeros();
    for p in points {
        let d = p - centroid;
        cov += d * d.transpose();
    }
    let eig = cov.symmetric_eigen();
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| {
        eig.eigenvalues[b]
            .partial_cmp(&eig.eigenvalues[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let e0: Vector3<f64> = eig.eigenvectors.column(order[0]).into_owned();
    let e1: Vector3<f64> = eig.eigenvectors.column(order[1]).into_owned();
    let normal = e0.cross(&e1);
    if normal.norm() < 1e-12 {
        return None;
    }
    let basis = Matrix3::from_columns(&[e0, e1, normal.normalize()]);
    let rms = (eig.eigenvalues[order[2]].max(0.0) / n).sqrt();
    Some((centroid, basis, rms))
}

/// Pose of a planar point set from its homography `img ~ H * [x y 1]`.
///
/// `object` points must lie in the body `z = 0` plane.
pub fn pose_from_planar(object: &[Point2<f64>], image: &[Point2<f64>]) -> Option<RigidTransform> {
    let h = estimate_homography(object, image)?.h;

    let h1 = h.column(0).into_owned();
    let h2 = h.column(1).into_owned();
    let h3 = h.column(2).into_owned();
    let scale = 2.0 / (h1.norm() + h2.norm());
    if !scale.is_finite() || scale <= 0.0 {
        return None;
    }

    // H is defined up to sign; pick the one placing the body in front of the camera.
    let sign = if h3[2] < 0.0 { -1.0 } else { 1.0 };
    let r1 = h1 * scale * sign;
    let r2 = h2 * scale * sign;
    let t = h3 * scale * sign;
    let r3 = r1.cross(&r2);
    if r3.norm() < 1e-6 {
        return None;
    }

    let rotation = nearest_rotation(&Matrix3::from_columns(&[r1, r2, r3]))?;
    Some(RigidTransform::new(rotation, t))
}

/// Pose of a general (non-planar) point set by linear DLT of the 3x4 projection.
///
/// Needs at least six correspondences.
pub fn pose_from_dlt(object: &[Point3<f64>], image: &[Point2<f64>]) -> Option<RigidTransform> {
    let n = object.len();
    if n < 6 || image.len() != n {
        return None;
    }

    let rows = (2 * n).max(12);
    let mut a = DMatrix::<f64>::zeros(rows, 12);
    for k in 0..n {
        let (x, y, z) = (object[k].x, object[k].y, object[k].z);
        let (u, v) = (image[k].x, image[k].y);
        let r0 = 2 * k;
        let r1 = r0 + 1;
        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = z;
        a[(r0, 3)] = 1.0;
        a[(r0, 8)] = -u * x;
        a[(r0, 9)] = -u * y;
        a[(r0, 10)] = -u * z;
        a[(r0, 11)] = -u;
        a[(r1, 4)] = x;
        a[(r1, 5)] = y;
        a[(r1, 6)] = z;
        a[(r1, 7)] = 1.0;
        a[(r1, 8)] = -v * x;
        a[(r1, 9)] = -v * y;
        a[(r1, 10)] = -v * z;
        a[(r1, 11)] = -v;
    }

    let svd = a.svd(false, true);
    let vt = svd.v_t?;
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|l, r| l.1.partial_cmp(r.1).unwrap_or(std::cmp::Ordering::Equal))?;
    let p = vt.row(min_idx);

    let m = Matrix3::new(p[0], p[1], p[2], p[4], p[5], p[6], p[8], p[9], p[10]);
    let t = Vector3::new(p[3], p[7], p[11]);

    let svd_m = m.svd(false, false);
    let scale = svd_m.singular_values.iter().sum::<f64>() / 3.0;
    if scale < 1e-12 {
        return None;
    }
    let sign = if m.determinant() < 0.0 { -1.0 } else { 1.0 };
    let rotation = nearest_rotation(&(m * (sign / scale)))?;
    let translation = t * (sign / scale);
    Some(RigidTransform::new(rotation, translation))
}

/// Root-mean-square reprojection error in normalized coordinates.
pub fn reprojection_rms(
    pose: &RigidTransform,
    object: &[Point3<f64>],
    image: &[Point2<f64>],
) -> Option<f64> {
    if object.is_empty() || object.len() != image.len() {
        return None;
    }
    let mut sum = 0.0;
    for (o, i) in object.iter().zip(image) {
        let c = pose.transform_point(o);
        if c.z <= 0.0 {
            return None;
        }
        let dx = c.x / c.z - i.x;
        let dy = c.y / c.z - i.y;
        sum += dx * dx + dy * dy;
    }
    Some((sum / object.len() as f64).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Rotation3;

    fn project(pose: &RigidTransform, pts: &[Point3<f64>]) -> Vec<Point2<f64>> {
        pts.iter()
            .map(|p| {
                let c = pose.transform_point(p);
                Point2::new(c.x / c.z, c.y / c.z)
            })
            .collect()
    }

    fn ground_truth() -> RigidTransform {
        let r = Rotation3::from_euler_angles(0.2, -0.3, 0.1);
        RigidTransform::new(*r.matrix(), Vector3::new(12.0, -8.0, 400.0))
    }

    #[test]
    fn planar_pose_recovers_ground_truth() {
        let gt = ground_truth();
        let object: Vec<Point3<f64>> = [(-25.0, 25.0), (25.0, 25.0), (25.0, -25.0), (-25.0, -25.0)]
            .iter()
            .map(|&(x, y)| Point3::new(x, y, 0.0))
            .collect();
        let image = project(&gt, &object);
        let plane: Vec<Point2<f64>> = object.iter().map(|p| Point2::new(p.x, p.y)).collect();

        let pose = pose_from_planar(&plane, &image).expect("pose");
        assert_relative_eq!(pose.rotation, gt.rotation, epsilon = 1e-6);
        assert_relative_eq!(pose.translation, gt.translation, epsilon = 1e-4);
        assert!(reprojection_rms(&pose, &object, &image).expect("rms") < 1e-8);
    }

    #[test]
    fn dlt_pose_recovers_non_planar_body() {
        let gt = ground_truth();
        let object = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(50.0, 0.0, 0.0),
            Point3::new(0.0, 50.0, 0.0),
            Point3::new(0.0, 0.0, 50.0),
            Point3::new(50.0, 50.0, 10.0),
            Point3::new(-30.0, 20.0, 40.0),
            Point3::new(20.0, -40.0, 25.0),
        ];
        let image = project(&gt, &object);

        let pose = pose_from_dlt(&object, &image).expect("pose");
        assert_relative_eq!(pose.rotation, gt.rotation, epsilon = 1e-6);
        assert_relative_eq!(pose.translation, gt.translation, epsilon = 1e-3);
    }

    #[test]
    fn plane_fit_detects_coplanar_points() {
        let pts = vec![
            Point3::new(0.0, 0.0, 5.0),
            Point3::new(10.0, 0.0, 5.0),
            Point3::new(0.0, 10.0, 5.0),
            Point3::new(10.0, 10.0, 5.0),
        ];
        let (c, basis, rms) = fit_plane(&pts).expect("plane");
        assert_relative_eq!(c.z, 5.0, epsilon = 1e-12);
        assert!(rms < 1e-9);
        assert_relative_eq!(basis[(2, 2)].abs(), 1.0, epsilon = 1e-9);
    }
}
