//! Bit sampling of a marker through the homography of its outer quad.

use crate::threshold::otsu_threshold_from_samples;
use marker_track_core::{homography_from_4pt, GrayImageView};
use nalgebra::Point2;

/// Sub-sample offsets inside one cell, as fractions of the cell side.
const CELL_OFFSETS: [f32; 3] = [0.3, 0.5, 0.7];

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct MarkerObservation {
    /// Inner bits, row-major, white = 1.
    pub code: u64,
    /// Fraction of border cells read as dark.
    pub border_score: f32,
}

/// Reusable sampler for markers of one layout.
pub(crate) struct QuadDecoder {
    bits: usize,
    border: usize,
    cells: usize,
    /// Canonical sample points, `CELL_OFFSETS.len()^2` per cell, cells row-major.
    points: Vec<Point2<f32>>,
    scratch: Vec<u8>,
}

impl QuadDecoder {
    pub fn new(bits: usize, border: usize) -> Option<Self> {
        if bits == 0 || bits * bits > 64 {
            return None;
        }
        let cells = bits + 2 * border;
        let per_cell = CELL_OFFSETS.len() * CELL_OFFSETS.len();
        let mut points = Vec::with_capacity(cells * cells * per_cell);
        for cy in 0..cells {
            for cx in 0..cells {
                for oy in CELL_OFFSETS {
                    for ox in CELL_OFFSETS {
                        points.push(Point2::new(cx as f32 + ox, cy as f32 + oy));
                    }
                }
            }
        }
        Some(Self {
            bits,
            border,
            cells,
            points,
            scratch: Vec::with_capacity(cells * cells),
        })
    }

    /// Read the marker inside `corners` (clockwise; `corners[0]` maps to the
    /// first sampled cell).
    pub fn decode(
        &mut self,
        img: &GrayImageView<'_>,
        corners: &[Point2<f32>; 4],
        min_border_score: f32,
    ) -> Option<MarkerObservation> {
        let s = self.cells as f32;
        let square = [
            Point2::new(0.0, 0.0),
            Point2::new(s, 0.0),
            Point2::new(s, s),
            Point2::new(0.0, s),
        ];
        let h = homography_from_4pt(&square, corners)?;

        let per_cell = CELL_OFFSETS.len() * CELL_OFFSETS.len();
        self.scratch.clear();
        for cell in self.points.chunks_exact(per_cell) {
            let sum: u32 = cell
                .iter()
                .map(|&p| {
                    let q = h.apply(p);
                    img.get(q.x.floor() as i32, q.y.floor() as i32) as u32
                })
                .sum();
            self.scratch.push((sum / per_cell as u32) as u8);
        }

        decode_samples(
            &self.scratch,
            self.cells,
            self.bits,
            self.border,
            min_border_score,
        )
    }
}

/// Classify per-cell means into border quality and inner code bits.
pub(crate) fn decode_samples(
    samples: &[u8],
    cells: usize,
    bits: usize,
    border: usize,
    min_border_score: f32,
) -> Option<MarkerObservation> {
    if samples.len() != cells * cells || cells != bits + 2 * border {
        return None;
    }
    let thr = otsu_threshold_from_samples(samples);

    let mut border_dark = 0u32;
    let mut border_total = 0u32;
    let mut code = 0u64;
    for cy in 0..cells {
        for cx in 0..cells {
            let is_dark = samples[cy * cells + cx] <= thr;
            let on_border =
                cx < border || cy < border || cx >= cells - border || cy >= cells - border;
            if on_border {
                border_total += 1;
                border_dark += is_dark as u32;
            } else if !is_dark {
                code |= 1u64 << ((cy - border) * bits + (cx - border));
            }
        }
    }

    let border_score = if border_total > 0 {
        border_dark as f32 / border_total as f32
    } else {
        1.0
    };
    (border_score >= min_border_score).then_some(MarkerObservation { code, border_score })
}
