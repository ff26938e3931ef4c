//! Synthetic marker rendering, used to build test scenes.

use crate::Dictionary;
use marker_track_core::{homography_from_4pt, GrayImage};
use nalgebra::Point2;

/// Cell value of a marker with a one-cell black border: `true` = white.
fn cell_is_white(code: u64, bits: usize, cx: usize, cy: usize) -> bool {
    let cells = bits + 2;
    if cx == 0 || cy == 0 || cx + 1 == cells || cy + 1 == cells {
        return false;
    }
    (code >> ((cy - 1) * bits + (cx - 1))) & 1 == 1
}

/// Fronto-parallel marker with `margin` white pixels on every side.
///
/// Returns `None` for unknown ids.
pub fn render_marker_image(
    dict: &Dictionary,
    id: u32,
    cell_px: usize,
    margin: usize,
) -> Option<GrayImage> {
    let code = dict.code(id)?;
    let bits = dict.marker_size;
    let side = (bits + 2) * cell_px + 2 * margin;
    let mut img = GrayImage::filled(side, side, 255);
    for y in 0..(bits + 2) * cell_px {
        for x in 0..(bits + 2) * cell_px {
            if !cell_is_white(code, bits, x / cell_px, y / cell_px) {
                img.put((x + margin) as i32, (y + margin) as i32, 0);
            }
        }
    }
    Some(img)
}

/// Paint marker `id` into `canvas` so that its canonical TL, TR, BR, BL
/// corners land on `corners`.
///
/// Each pixel takes the value of the cell its centre falls into. Returns
/// `false` when the id is unknown or the quad is degenerate.
pub fn draw_marker(
    canvas: &mut GrayImage,
    dict: &Dictionary,
    id: u32,
    corners: &[Point2<f32>; 4],
) -> bool {
    let Some(code) = dict.code(id) else {
        return false;
    };
    let bits = dict.marker_size;
    let s = (bits + 2) as f32;
    let square = [
        Point2::new(0.0, 0.0),
        Point2::new(s, 0.0),
        Point2::new(s, s),
        Point2::new(0.0, s),
    ];
    let Some(to_marker) = homography_from_4pt(corners, &square) else {
        return false;
    };

    let (mut x0, mut y0, mut x1, mut y1) = (f32::MAX, f32::MAX, f32::MIN, f32::MIN);
    for c in corners {
        x0 = x0.min(c.x);
        y0 = y0.min(c.y);
        x1 = x1.max(c.x);
        y1 = y1.max(c.y);
    }
    for y in (y0.floor() as i32).max(0)..=(y1.ceil() as i32).min(canvas.height as i32 - 1) {
        for x in (x0.floor() as i32).max(0)..=(x1.ceil() as i32).min(canvas.width as i32 - 1) {
            let m = to_marker.apply(Point2::new(x as f32 + 0.5, y as f32 + 0.5));
            if m.x < 0.0 || m.y < 0.0 || m.x >= s || m.y >= s {
                continue;
            }
            let white = cell_is_white(code, bits, m.x as usize, m.y as usize);
            canvas.put(x, y, if white { 255 } else { 0 });
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::DICT_4X4_50;

    #[test]
    fn rendered_border_is_black_and_margin_white() {
        let img = render_marker_image(&DICT_4X4_50, 0, 5, 4).expect("render");
        assert_eq!(img.width, 6 * 5 + 8);
        let v = img.view();
        assert_eq!(v.get(1, 1), 255);
        assert_eq!(v.get(5, 5), 0);
        assert!(render_marker_image(&DICT_4X4_50, 50, 5, 4).is_none());
    }

    #[test]
    fn drawn_marker_matches_fronto_parallel_render() {
        let reference = render_marker_image(&DICT_4X4_50, 9, 8, 6).expect("render");
        let mut canvas = GrayImage::filled(reference.width, reference.height, 255);
        let (lo, hi) = (6.0, 6.0 + 48.0);
        let corners = [
            Point2::new(lo, lo),
            Point2::new(hi, lo),
            Point2::new(hi, hi),
            Point2::new(lo, hi),
        ];
        assert!(draw_marker(&mut canvas, &DICT_4X4_50, 9, &corners));
        assert_eq!(canvas, reference);
    }
}
