//! ArUco marker dictionaries and full-image marker detection.
//!
//! This crate provides:
//! - embedded built-in dictionaries (compiled into the binary),
//! - matching observed marker codes against those dictionaries with all four
//!   rotations and bounded bit errors,
//! - [`ArucoDetector`], which finds square dark regions in a grayscale image,
//!   samples their bit grid through the quad homography and reports the
//!   identified markers with corners in canonical order.

pub mod builtins;
mod decode;
mod detector;
mod dictionary;
mod matcher;
mod quads;
pub mod render;
mod threshold;

pub use detector::{ArucoDetector, ArucoDetectorParams, MarkerDetection};
pub use dictionary::Dictionary;
pub use matcher::{rotate_code, Match, Matcher};
pub use quads::{find_quads, QuadCandidate, QuadFilter};
pub use threshold::otsu_threshold;
