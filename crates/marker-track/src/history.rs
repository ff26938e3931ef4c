//! Per-body pose history and temporal smoothing.

use marker_track_core::{nearest_rotation, RigidTransform};
use nalgebra::{Matrix3, Quaternion, UnitQuaternion, Vector3, Vector4};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// How the rotations of a pushed batch were produced.
///
/// Decides the averaging: rotation matrices are averaged in the chordal
/// sense and projected back onto SO(3); quaternions are sign-aligned,
/// summed and normalised.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationForm {
    Matrix,
    Quaternion,
}

/// Pose of one body in one frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameSample {
    /// Port handle the pose is reported under.
    pub name: String,
    /// Seconds since the Unix epoch, shared by the whole batch.
    pub timestamp: f64,
    pub frame_index: u64,
    /// `None` when the pose could not be solved.
    pub pose: Option<RigidTransform>,
    pub quality: f64,
}

/// Receives per-frame pose batches and reports (possibly smoothed) poses.
pub trait PoseHistory {
    fn push_frame(&mut self, samples: &[FrameSample], form: RotationForm);

    /// Latest result for each of `names` that has history, in `names` order.
    fn query(&self, names: &[&str]) -> Vec<FrameSample>;
}

/// Moving average over the last `capacity` samples of each body.
#[derive(Clone, Debug)]
pub struct SmoothingBuffer {
    capacity: usize,
    history: HashMap<String, VecDeque<(FrameSample, RotationForm)>>,
}

impl SmoothingBuffer {
    /// A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            history: HashMap::new(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}

impl Default for SmoothingBuffer {
    fn default() -> Self {
        Self::new(1)
    }
}

impl PoseHistory for SmoothingBuffer {
    fn push_frame(&mut self, samples: &[FrameSample], form: RotationForm) {
        for sample in samples {
            let buf = self.history.entry(sample.name.clone()).or_default();
            if buf.len() == self.capacity {
                buf.pop_front();
            }
            buf.push_back((sample.clone(), form));
        }
    }

    fn query(&self, names: &[&str]) -> Vec<FrameSample> {
        names
            .iter()
            .filter_map(|name| self.history.get(*name).and_then(smooth))
            .collect()
    }
}

fn smooth(buf: &VecDeque<(FrameSample, RotationForm)>) -> Option<FrameSample> {
    let (latest, form) = buf.back()?;
    let quality = buf.iter().map(|(s, _)| s.quality).sum::<f64>() / buf.len() as f64;
    let poses: Vec<&RigidTransform> = buf.iter().filter_map(|(s, _)| s.pose.as_ref()).collect();

    let pose = match poses.as_slice() {
        [] => None,
        [only] => Some(**only),
        many => {
            let n = many.len() as f64;
            let translation = many.iter().map(|p| p.translation).sum::<Vector3<f64>>() / n;
            let rotation = match form {
                RotationForm::Matrix => chordal_mean(many),
                RotationForm::Quaternion => quaternion_mean(many),
            };
            rotation.map(|r| RigidTransform::new(r, translation))
        }
    };

    Some(FrameSample {
        pose,
        quality,
        ..latest.clone()
    })
}

fn chordal_mean(poses: &[&RigidTransform]) -> Option<Matrix3<f64>> {
    let sum = poses.iter().map(|p| p.rotation).sum::<Matrix3<f64>>();
    nearest_rotation(&(sum / poses.len() as f64))
}

fn quaternion_mean(poses: &[&RigidTransform]) -> Option<Matrix3<f64>> {
    let reference = poses.first()?.quaternion();
    let mut acc = Vector4::zeros();
    for p in poses {
        let q = p.quaternion();
        let sign = if q.coords.dot(&reference.coords) < 0.0 {
            -1.0
        } else {
            1.0
        };
        acc += q.coords * sign;
    }
    let q = UnitQuaternion::try_new(Quaternion::from(acc), 1e-12)?;
    Some(*q.to_rotation_matrix().matrix())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Rotation3;

    fn sample(name: &str, frame: u64, yaw: f64, x: f64, quality: f64) -> FrameSample {
        FrameSample {
            name: name.into(),
            timestamp: 100.0 + frame as f64,
            frame_index: frame,
            pose: Some(RigidTransform::new(
                *Rotation3::from_euler_angles(0.0, 0.0, yaw).matrix(),
                Vector3::new(x, 0.0, 300.0),
            )),
            quality,
        }
    }

    #[test]
    fn length_one_passes_through() {
        let mut buf = SmoothingBuffer::new(1);
        let a = sample("a", 0, 0.1, 1.0, 1.0);
        let b = sample("a", 1, 0.3, 5.0, 0.5);
        buf.push_frame(&[a], RotationForm::Matrix);
        buf.push_frame(std::slice::from_ref(&b), RotationForm::Matrix);
        assert_eq!(buf.query(&["a"]), vec![b]);
    }

    #[test]
    fn averages_within_window_and_keeps_latest_stamp() {
        for form in [RotationForm::Matrix, RotationForm::Quaternion] {
            let mut buf = SmoothingBuffer::new(2);
            buf.push_frame(&[sample("a", 0, 9.0, 100.0, 0.0)], form);
            buf.push_frame(&[sample("a", 1, 0.1, 2.0, 1.0)], form);
            buf.push_frame(&[sample("a", 2, 0.3, 4.0, 0.5)], form);

            let out = buf.query(&["a"]);
            assert_eq!(out.len(), 1);
            assert_eq!(out[0].frame_index, 2);
            assert_relative_eq!(out[0].timestamp, 102.0);
            assert_relative_eq!(out[0].quality, 0.75);
            let pose = out[0].pose.expect("pose");
            assert_relative_eq!(pose.translation.x, 3.0, epsilon = 1e-12);
            let expected = Rotation3::from_euler_angles(0.0, 0.0, 0.2);
            assert_relative_eq!(pose.rotation, *expected.matrix(), epsilon = 1e-9);
        }
    }

    #[test]
    fn unsolved_samples_do_not_pull_the_average() {
        let mut buf = SmoothingBuffer::new(3);
        buf.push_frame(&[sample("a", 0, 0.0, 6.0, 1.0)], RotationForm::Matrix);
        let mut lost = sample("a", 1, 0.0, 0.0, 0.0);
        lost.pose = None;
        buf.push_frame(&[lost], RotationForm::Matrix);
        let out = buf.query(&["a"]);
        assert_relative_eq!(out[0].pose.expect("pose").translation.x, 6.0);
        assert_relative_eq!(out[0].quality, 0.5);
    }

    #[test]
    fn query_follows_requested_order_and_skips_unknown() {
        let mut buf = SmoothingBuffer::default();
        buf.push_frame(
            &[sample("a", 0, 0.0, 0.0, 1.0), sample("b", 0, 0.0, 0.0, 1.0)],
            RotationForm::Matrix,
        );
        let names: Vec<String> = buf
            .query(&["b", "zzz", "a"])
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, ["b", "a"]);
    }
}
