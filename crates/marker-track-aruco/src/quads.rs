//! Quad candidates from connected dark regions of a binarised image.

use nalgebra::{Point2, Vector2};
use std::f32::consts::FRAC_1_SQRT_2;

/// A dark region whose outline is well approximated by four corners.
#[derive(Clone, Debug)]
pub struct QuadCandidate {
    /// Outer corners in pixel coordinates, clockwise on screen.
    ///
    /// Pixel `(i, j)` covers `[i, i+1) × [j, j+1)`.
    pub corners: [Point2<f32>; 4],
}

/// Filters applied to dark regions before they become quad candidates.
#[derive(Clone, Copy, Debug)]
pub struct QuadFilter {
    /// Shortest accepted quad side, in pixels.
    pub min_side_px: f32,
    /// Minimum ratio of region pixels to quad area.
    pub min_fill: f32,
    /// Maximum ratio of region pixels to quad area; round blobs exceed it.
    pub max_fill: f32,
}

impl Default for QuadFilter {
    fn default() -> Self {
        Self {
            min_side_px: 16.0,
            min_fill: 0.35,
            max_fill: 1.1,
        }
    }
}

/// Extract quad candidates from pixels `<= threshold`.
///
/// Regions are 4-connected. Regions touching the image border are skipped
/// since their outline cannot be trusted.
pub fn find_quads(
    img: &marker_track_core::GrayImageView<'_>,
    threshold: u8,
    filter: &QuadFilter,
) -> Vec<QuadCandidate> {
    let (w, h) = (img.width, img.height);
    let mut out = Vec::new();
    if img.is_empty() || img.data.len() < w * h {
        return out;
    }

    let min_pixels = (filter.min_side_px * filter.min_side_px * filter.min_fill).max(4.0) as usize;
    let dark = |i: usize| img.data[i] <= threshold;
    let mut visited = vec![false; w * h];
    let mut stack = Vec::new();
    let mut region: Vec<Point2<f32>> = Vec::new();

    for seed in 0..w * h {
        if visited[seed] || !dark(seed) {
            continue;
        }
        visited[seed] = true;
        stack.push(seed);
        region.clear();
        let mut touches_border = false;

        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % w, idx / w);
            region.push(Point2::new(x as f32 + 0.5, y as f32 + 0.5));
            touches_border |= x == 0 || y == 0 || x + 1 == w || y + 1 == h;

            let mut neighbours = [None; 4];
            if x > 0 {
                neighbours[0] = Some(idx - 1);
            }
            if x + 1 < w {
                neighbours[1] = Some(idx + 1);
            }
            if y > 0 {
                neighbours[2] = Some(idx - w);
            }
            if y + 1 < h {
                neighbours[3] = Some(idx + w);
            }
            for n in neighbours.into_iter().flatten() {
                if !visited[n] && dark(n) {
                    visited[n] = true;
                    stack.push(n);
                }
            }
        }

        if touches_border || region.len() < min_pixels {
            continue;
        }
        if let Some(quad) = fit_quad(&region, filter) {
            out.push(quad);
        }
    }

    log::trace!("{} quad candidates at threshold {threshold}", out.len());
    out
}

fn fit_quad(region: &[Point2<f32>], filter: &QuadFilter) -> Option<QuadCandidate> {
    let n = region.len() as f32;
    let centroid = Point2::from(region.iter().map(|p| p.coords).sum::<Vector2<f32>>() / n);

    let farthest_from = |from: Point2<f32>| {
        region.iter().copied().max_by(|a, b| {
            (a - from)
                .norm_squared()
                .total_cmp(&(b - from).norm_squared())
        })
    };
    let p0 = farthest_from(centroid)?;
    let p2 = farthest_from(p0)?;

    let diag = p2 - p0;
    if diag.norm() < filter.min_side_px {
        return None;
    }
    let normal = Vector2::new(-diag.y, diag.x) / diag.norm();
    let offset = |p: &Point2<f32>| (p - p0).dot(&normal);
    let p1 = region
        .iter()
        .copied()
        .max_by(|a, b| offset(a).total_cmp(&offset(b)))?;
    let p3 = region
        .iter()
        .copied()
        .min_by(|a, b| offset(a).total_cmp(&offset(b)))?;
    let min_offset = 0.25 * filter.min_side_px;
    if offset(&p1) < min_offset || offset(&p3) > -min_offset {
        return None;
    }

    let mut corners = [p0, p1, p2, p3];
    let mid = Point2::from(corners.iter().map(|p| p.coords).sum::<Vector2<f32>>() / 4.0);
    corners.sort_by(|a, b| {
        let ang = |p: &Point2<f32>| (p.y - mid.y).atan2(p.x - mid.x);
        ang(a).total_cmp(&ang(b))
    });

    // Pixel centres sit half a pixel inside the true outline.
    let corners = corners.map(|c| {
        let d = c - mid;
        let len = d.norm();
        if len > f32::EPSILON {
            c + d * (FRAC_1_SQRT_2 / len)
        } else {
            c
        }
    });

    for i in 0..4 {
        if (corners[(i + 1) % 4] - corners[i]).norm() < filter.min_side_px {
            return None;
        }
    }

    let area = polygon_area(&corners);
    if area <= 0.0 {
        return None;
    }
    let fill = n / area;
    if fill < filter.min_fill || fill > filter.max_fill {
        return None;
    }

    Some(QuadCandidate { corners })
}

fn polygon_area(pts: &[Point2<f32>; 4]) -> f32 {
    let mut acc = 0.0;
    for i in 0..4 {
        let (a, b) = (pts[i], pts[(i + 1) % 4]);
        acc += a.x * b.y - b.x * a.y;
    }
    0.5 * acc.abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use marker_track_core::GrayImage;

    fn fill_rect(img: &mut GrayImage, x0: i32, y0: i32, x1: i32, y1: i32, v: u8) {
        for y in y0..y1 {
            for x in x0..x1 {
                img.put(x, y, v);
            }
        }
    }

    #[test]
    fn axis_aligned_square_gives_exact_corners() {
        let mut img = GrayImage::filled(80, 60, 255);
        fill_rect(&mut img, 20, 10, 50, 40, 0);
        let quads = find_quads(&img.view(), 127, &QuadFilter::default());
        assert_eq!(quads.len(), 1);
        let expected = [(20.0, 10.0), (50.0, 10.0), (50.0, 40.0), (20.0, 40.0)];
        for (c, (x, y)) in quads[0].corners.iter().zip(expected) {
            assert!((c.x - x).abs() < 1e-3 && (c.y - y).abs() < 1e-3, "{c:?}");
        }
    }

    #[test]
    fn rejects_small_border_touching_and_round_regions() {
        let mut img = GrayImage::filled(120, 120, 255);
        fill_rect(&mut img, 5, 5, 12, 12, 0);
        fill_rect(&mut img, 0, 60, 30, 90, 0);
        for y in 0..120 {
            for x in 0..120 {
                let (dx, dy) = (x as f32 - 80.0, y as f32 - 40.0);
                if dx * dx + dy * dy < 400.0 {
                    img.put(x, y, 0);
                }
            }
        }
        assert!(find_quads(&img.view(), 127, &QuadFilter::default()).is_empty());
    }
}
