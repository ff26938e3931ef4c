//! Marker detection capability consumed by the tracker.

use marker_track_aruco::{ArucoDetector, Dictionary};
use marker_track_core::GrayImageView;
use nalgebra::Point2;
use serde::Serialize;

/// One detected marker of one dictionary in one frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub dictionary: &'static str,
    pub id: u32,
    /// Image corners, TL, TR, BR, BL of the marker.
    pub corners: [Point2<f32>; 4],
}

/// Finds the markers of one dictionary in an image.
///
/// Finding nothing is a normal outcome and yields an empty vector. Ids must
/// be unique within one result.
pub trait MarkerDetector {
    fn detect(&self, image: &GrayImageView<'_>, dictionary: &Dictionary) -> Vec<Detection>;
}

impl MarkerDetector for ArucoDetector {
    fn detect(&self, image: &GrayImageView<'_>, dictionary: &Dictionary) -> Vec<Detection> {
        ArucoDetector::detect(self, image, dictionary)
            .into_iter()
            .map(|m| Detection {
                dictionary: dictionary.name,
                id: m.id,
                corners: m.corners,
            })
            .collect()
    }
}
