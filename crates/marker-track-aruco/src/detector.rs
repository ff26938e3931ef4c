//! Full-image marker detection: quads, decoding, dictionary matching.

use crate::decode::QuadDecoder;
use crate::quads::{find_quads, QuadFilter};
use crate::threshold::otsu_threshold;
use crate::{Dictionary, Matcher};
use marker_track_core::GrayImageView;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Detector parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArucoDetectorParams {
    /// Marker border width in cells.
    pub border_bits: usize,
    /// Shortest accepted marker side in pixels.
    pub min_side_px: f32,
    /// Minimum ratio of dark pixels to quad area for a candidate region.
    pub min_fill: f32,
    /// Required fraction of dark border cells.
    pub min_border_score: f32,
    /// Accepted bit errors; `None` uses the dictionary's correction capacity.
    pub max_hamming: Option<u8>,
}

impl Default for ArucoDetectorParams {
    fn default() -> Self {
        Self {
            border_bits: 1,
            min_side_px: 16.0,
            min_fill: 0.35,
            min_border_score: 0.85,
            max_hamming: None,
        }
    }
}

/// One identified marker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerDetection {
    pub id: u32,
    /// Image corners in the marker's canonical order: TL, TR, BR, BL.
    pub corners: [Point2<f32>; 4],
    /// Quarter turns between the canonical marker and its appearance.
    pub rotation: u8,
    pub hamming: u8,
    pub border_score: f32,
    /// Combined score in `[0, 1]`.
    pub score: f32,
}

/// Detects markers of one dictionary at a time in a grayscale image.
#[derive(Clone, Debug, Default)]
pub struct ArucoDetector {
    params: ArucoDetectorParams,
}

impl ArucoDetector {
    pub fn new(params: ArucoDetectorParams) -> Self {
        Self { params }
    }

    /// Detect all markers of `dict` in `img`.
    ///
    /// An image without markers yields an empty vector. Ids are unique in the
    /// result and sorted ascending.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip_all, fields(dict = dict.name, w = img.width, h = img.height))
    )]
    pub fn detect(&self, img: &GrayImageView<'_>, dict: &Dictionary) -> Vec<MarkerDetection> {
        let max_hamming = self.params.max_hamming.unwrap_or(dict.max_correction_bits);
        let Some(matcher) = Matcher::new(*dict, max_hamming) else {
            log::warn!("{}: markers wider than 64 bits are not supported", dict.name);
            return Vec::new();
        };
        let Some(mut decoder) = QuadDecoder::new(dict.marker_size, self.params.border_bits) else {
            return Vec::new();
        };

        let filter = QuadFilter {
            min_side_px: self.params.min_side_px,
            min_fill: self.params.min_fill,
            ..QuadFilter::default()
        };
        let threshold = otsu_threshold(img);
        let quads = find_quads(img, threshold, &filter);
        let bits = dict.bit_count().max(1) as f32;

        let mut out = Vec::new();
        for quad in &quads {
            let Some(obs) = decoder.decode(img, &quad.corners, self.params.min_border_score) else {
                continue;
            };
            let Some(m) = matcher.match_code(obs.code) else {
                continue;
            };
            // Sampled corner k shows canonical corner (k - rotation) mod 4.
            let r = m.rotation as usize;
            let corners = std::array::from_fn(|i| quad.corners[(i + r) % 4]);
            let ham_penalty = 1.0 - m.hamming as f32 / bits;
            out.push(MarkerDetection {
                id: m.id,
                corners,
                rotation: m.rotation,
                hamming: m.hamming,
                border_score: obs.border_score,
                score: (obs.border_score * ham_penalty).clamp(0.0, 1.0),
            });
        }

        let mut out = dedup_by_id_keep_best(out);
        out.sort_by_key(|d| d.id);
        log::debug!(
            "{}: {} quads, {} markers",
            dict.name,
            quads.len(),
            out.len()
        );
        out
    }
}

fn dedup_by_id_keep_best(mut dets: Vec<MarkerDetection>) -> Vec<MarkerDetection> {
    dets.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut seen = HashSet::new();
    dets.retain(|d| seen.insert(d.id));
    dets
}
