//! Pinhole camera intrinsics, distortion and calibration validation.
//!
//! A projection matrix is accepted only when it is exactly 3x3 and every
//! element is a floating-point value. Validation happens once, when the
//! intrinsics are built, never per frame.

use std::{fs, path::Path};

use nalgebra::{Matrix3, Point2};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default distortion when none is configured: five zero coefficients.
pub const DEFAULT_DISTORTION: [f64; 5] = [0.0; 5];

/// Minimum accepted number of distortion coefficients (k1, k2, p1, p2).
pub const MIN_DISTORTION_COEFFS: usize = 4;

/// Calibration validation and parsing errors.
#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    #[error("camera projection matrix must be 3x3, got {rows}x{cols}")]
    NotSquare3x3 { rows: usize, cols: usize },
    #[error("camera projection matrix element ({row}, {col}) is not a floating-point value")]
    NonFloatElement { row: usize, col: usize },
    #[error("camera calibration contains non-finite values")]
    NonFinite,
    #[error("camera distortion needs at least 4 coefficients, got {len}")]
    DistortionTooShort { len: usize },
    #[error("camera distortion element {index} is not a number")]
    NonNumericDistortion { index: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("calibration file line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("calibration file needs 3 matrix rows and 1 distortion row, found {found} rows")]
    MissingRows { found: usize },
}

/// Validated camera intrinsics: 3x3 projection matrix and distortion vector.
///
/// Immutable once built; reconfiguration replaces the whole value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    matrix: Matrix3<f64>,
    distortion: Vec<f64>,
}

impl CameraIntrinsics {
    /// Build from an already-typed matrix. Only finiteness and distortion length are checked.
    pub fn new(matrix: Matrix3<f64>, distortion: Vec<f64>) -> Result<Self, CalibrationError> {
        if distortion.len() < MIN_DISTORTION_COEFFS {
            return Err(CalibrationError::DistortionTooShort {
                len: distortion.len(),
            });
        }
        if matrix.iter().chain(distortion.iter()).any(|v| !v.is_finite()) {
            return Err(CalibrationError::NonFinite);
        }
        Ok(Self { matrix, distortion })
    }

    /// Validate a projection matrix given as untyped JSON plus an optional distortion vector.
    ///
    /// The matrix must be an array of three arrays of three JSON numbers, each
    /// written as a floating-point literal (`560.0`, not `560`).
    pub fn from_json(
        projection: &Value,
        distortion: Option<&Value>,
    ) -> Result<Self, CalibrationError> {
        let matrix = projection_from_json(projection)?;
        let distortion = match distortion {
            Some(v) => distortion_from_json(v)?,
            None => DEFAULT_DISTORTION.to_vec(),
        };
        Self::new(matrix, distortion)
    }

    /// Load a calibration text file: three rows of the matrix, then one distortion row.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CalibrationError> {
        let raw = fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    /// Parse the calibration text format (whitespace or comma separated).
    pub fn parse(text: &str) -> Result<Self, CalibrationError> {
        let mut rows: Vec<Vec<f64>> = Vec::with_capacity(4);
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let row = line
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|tok| !tok.is_empty())
                .map(|tok| {
                    tok.parse::<f64>().map_err(|e| CalibrationError::Parse {
                        line: idx + 1,
                        message: format!("`{tok}`: {e}"),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            rows.push(row);
            if rows.len() == 4 {
                break;
            }
        }

        if rows.len() < 4 {
            return Err(CalibrationError::MissingRows { found: rows.len() });
        }
        for row in &rows[..3] {
            if row.len() != 3 {
                return Err(CalibrationError::NotSquare3x3 {
                    rows: 3,
                    cols: row.len(),
                });
            }
        }

        let m = Matrix3::from_fn(|r, c| rows[r][c]);
        let distortion = rows.swap_remove(3);
        Self::new(m, distortion)
    }

    #[inline]
    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    #[inline]
    pub fn distortion(&self) -> &[f64] {
        &self.distortion
    }

    #[inline]
    pub fn has_distortion(&self) -> bool {
        self.distortion.iter().any(|&k| k != 0.0)
    }

    /// Map a distorted pixel to undistorted normalized image coordinates.
    ///
    /// Brown-Conrady model `(k1, k2, p1, p2[, k3])`, inverted by fixed-point iteration.
    pub fn undistort_normalized(&self, pixel: Point2<f64>) -> Option<Point2<f64>> {
        let k = &self.matrix;
        let (fx, fy, s, cx, cy) = (k[(0, 0)], k[(1, 1)], k[(0, 1)], k[(0, 2)], k[(1, 2)]);
        if fx.abs() < 1e-12 || fy.abs() < 1e-12 {
            return None;
        }
        let yd = (pixel.y - cy) / fy;
        let xd = (pixel.x - cx - s * yd) / fx;

        if !self.has_distortion() {
            return Some(Point2::new(xd, yd));
        }

        let d = &self.distortion;
        let (k1, k2, p1, p2) = (d[0], d[1], d[2], d[3]);
        let k3 = d.get(4).copied().unwrap_or(0.0);

        let (mut x, mut y) = (xd, yd);
        for _ in 0..20 {
            let r2 = x * x + y * y;
            let radial = 1.0 + r2 * (k1 + r2 * (k2 + r2 * k3));
            if radial.abs() < 1e-12 {
                return None;
            }
            let dx = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
            let dy = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
            x = (xd - dx) / radial;
            y = (yd - dy) / radial;
        }
        (x.is_finite() && y.is_finite()).then(|| Point2::new(x, y))
    }
}

fn projection_from_json(value: &Value) -> Result<Matrix3<f64>, CalibrationError> {
    let rows = value
        .as_array()
        .ok_or(CalibrationError::NotSquare3x3 { rows: 0, cols: 0 })?;
    let cols_of = |r: &Value| r.as_array().map_or(0, Vec::len);
    if rows.len() != 3 || rows.iter().any(|r| cols_of(r) != 3) {
        let cols = rows.iter().map(cols_of).max().unwrap_or(0);
        return Err(CalibrationError::NotSquare3x3 {
            rows: rows.len(),
            cols,
        });
    }

    let mut m = Matrix3::zeros();
    for (r, row) in rows.iter().enumerate() {
        for (c, elem) in row.as_array().into_iter().flatten().enumerate() {
            m[(r, c)] = match elem {
                Value::Number(n) if n.is_f64() => n.as_f64(),
                _ => None,
            }
            .ok_or(CalibrationError::NonFloatElement { row: r, col: c })?;
        }
    }
    Ok(m)
}

fn distortion_from_json(value: &Value) -> Result<Vec<f64>, CalibrationError> {
    // Accept both a flat vector and a single-row matrix ([[k1, k2, p1, p2]]).
    let flat: Vec<&Value> = match value.as_array() {
        Some(items) if items.len() == 1 && items[0].is_array() => {
            items[0].as_array().into_iter().flatten().collect()
        }
        Some(items) => items.iter().collect(),
        None => return Err(CalibrationError::DistortionTooShort { len: 0 }),
    };
    flat.iter()
        .enumerate()
        .map(|(index, v)| {
            v.as_f64()
                .ok_or(CalibrationError::NonNumericDistortion { index })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    #[test]
    fn accepts_float_3x3() {
        let k = json!([[560.0, 0.0, 320.0], [0.0, 560.0, 240.0], [0.0, 0.0, 1.0]]);
        let cam = CameraIntrinsics::from_json(&k, None).expect("valid");
        assert_relative_eq!(cam.matrix()[(0, 2)], 320.0);
        assert_eq!(cam.distortion().len(), 5);
    }

    #[test]
    fn rejects_wrong_shapes() {
        for bad in [
            json!([[1.0, 0.0], [0.0, 1.0]]),
            json!([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]),
            json!([[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0]]),
            json!([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]),
            json!("K"),
        ] {
            assert!(
                matches!(
                    CameraIntrinsics::from_json(&bad, None),
                    Err(CalibrationError::NotSquare3x3 { .. })
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_integer_elements() {
        let k = json!([[560, 0, 320], [0, 560, 240], [0, 0, 1]]);
        assert!(matches!(
            CameraIntrinsics::from_json(&k, None),
            Err(CalibrationError::NonFloatElement { row: 0, col: 0 })
        ));
        let k = json!([[560.0, 0.0, 320.0], [0.0, "x", 240.0], [0.0, 0.0, 1.0]]);
        assert!(matches!(
            CameraIntrinsics::from_json(&k, None),
            Err(CalibrationError::NonFloatElement { row: 1, col: 1 })
        ));
    }

    #[test]
    fn short_distortion_is_rejected() {
        let k = json!([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);
        let d = json!([0.0, 0.0, 0.0]);
        assert!(matches!(
            CameraIntrinsics::from_json(&k, Some(&d)),
            Err(CalibrationError::DistortionTooShort { len: 3 })
        ));
        let d = json!([[0.1, 0.0, 0.0, 0.0]]);
        let cam = CameraIntrinsics::from_json(&k, Some(&d)).expect("row vector");
        assert_eq!(cam.distortion(), &[0.1, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn parses_calibration_text() {
        let text = "560 0 320\n0, 560, 240\n0 0 1\n0.1 -0.05 0.001 0.002\n";
        let cam = CameraIntrinsics::parse(text).expect("parse");
        assert_relative_eq!(cam.matrix()[(1, 2)], 240.0);
        assert_eq!(cam.distortion(), &[0.1, -0.05, 0.001, 0.002]);
    }

    #[test]
    fn malformed_calibration_text_fails() {
        assert!(matches!(
            CameraIntrinsics::parse("1 0 0\n0 1 0\n"),
            Err(CalibrationError::MissingRows { found: 2 })
        ));
        assert!(matches!(
            CameraIntrinsics::parse("1 0\n0 1 0\n0 0 1\n0 0 0 0\n"),
            Err(CalibrationError::NotSquare3x3 { cols: 2, .. })
        ));
        assert!(matches!(
            CameraIntrinsics::parse("1 0 0\n0 one 0\n0 0 1\n0 0 0 0\n"),
            Err(CalibrationError::Parse { line: 2, .. })
        ));
    }

    #[test]
    fn loads_calibration_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("calib.txt");
        fs::write(&path, "500.0 0 320\n0 500.0 240\n0 0 1\n0 0 0 0\n").expect("write");
        let cam = CameraIntrinsics::load(&path).expect("load");
        assert!(!cam.has_distortion());
    }

    #[test]
    fn undistortion_inverts_forward_model() {
        let k = Matrix3::new(500.0, 0.0, 320.0, 0.0, 500.0, 240.0, 0.0, 0.0, 1.0);
        let cam = CameraIntrinsics::new(k, vec![-0.2, 0.05, 0.001, -0.001, 0.0]).expect("cam");

        let (x, y) = (0.2_f64, -0.1_f64);
        let r2 = x * x + y * y;
        let radial = 1.0 - 0.2 * r2 + 0.05 * r2 * r2;
        let xd = x * radial + 2.0 * 0.001 * x * y + (-0.001) * (r2 + 2.0 * x * x);
        let yd = y * radial + 0.001 * (r2 + 2.0 * y * y) + 2.0 * (-0.001) * x * y;
        let pixel = Point2::new(500.0 * xd + 320.0, 500.0 * yd + 240.0);

        let n = cam.undistort_normalized(pixel).expect("undistort");
        assert_relative_eq!(n.x, x, epsilon = 1e-6);
        assert_relative_eq!(n.y, y, epsilon = 1e-6);
    }
}
