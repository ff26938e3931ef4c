//! Optional visual debugging of detection passes.

use crate::Detection;
use image::{Rgb, RgbImage};
use marker_track_core::GrayImageView;
use nalgebra::Point2;
use std::path::PathBuf;

const OUTLINE: Rgb<u8> = Rgb([0, 255, 0]);
const FIRST_CORNER: Rgb<u8> = Rgb([255, 0, 0]);

/// Shows every `subsample`-th detection pass.
///
/// Passes are logged; with an output directory they are also written as PNG
/// files with the detected marker outlines drawn in.
#[derive(Clone, Debug)]
pub struct Debugger {
    enabled: bool,
    subsample: u64,
    output_dir: Option<PathBuf>,
    calls: u64,
}

impl Debugger {
    pub fn new(enabled: bool, subsample: usize, output_dir: Option<PathBuf>) -> Self {
        Self {
            enabled,
            subsample: subsample.max(1) as u64,
            output_dir,
            calls: 0,
        }
    }

    /// Report one dictionary pass. Returns the written file, if any.
    pub fn show(
        &mut self,
        frame: &GrayImageView<'_>,
        frame_index: u64,
        dictionary: &str,
        detections: &[Detection],
    ) -> Option<PathBuf> {
        if !self.enabled {
            return None;
        }
        let call = self.calls;
        self.calls += 1;
        if call % self.subsample != 0 {
            return None;
        }

        let ids: Vec<u32> = detections.iter().map(|d| d.id).collect();
        log::debug!("frame {frame_index} {dictionary}: markers {ids:?}");

        let dir = self.output_dir.as_ref()?;
        let canvas = annotate(frame, detections)?;
        let path = dir.join(format!("frame_{frame_index:06}_{dictionary}.png"));
        match canvas.save(&path) {
            Ok(()) => Some(path),
            Err(e) => {
                log::warn!("failed to write debug frame {}: {e}", path.display());
                None
            }
        }
    }
}

fn annotate(frame: &GrayImageView<'_>, detections: &[Detection]) -> Option<RgbImage> {
    let (w, h) = (u32::try_from(frame.width).ok()?, u32::try_from(frame.height).ok()?);
    let mut canvas = RgbImage::from_fn(w, h, |x, y| {
        let v = frame.get(x as i32, y as i32);
        Rgb([v, v, v])
    });
    for det in detections {
        for i in 0..4 {
            draw_line(&mut canvas, det.corners[i], det.corners[(i + 1) % 4], OUTLINE);
        }
        let c = det.corners[0];
        for dy in -2..=2 {
            for dx in -2..=2 {
                put(&mut canvas, c.x as i32 + dx, c.y as i32 + dy, FIRST_CORNER);
            }
        }
    }
    Some(canvas)
}

fn draw_line(canvas: &mut RgbImage, a: Point2<f32>, b: Point2<f32>, color: Rgb<u8>) {
    let steps = (b - a).abs().max().ceil().max(1.0) as i32;
    for s in 0..=steps {
        let p = a + (b - a) * (s as f32 / steps as f32);
        put(canvas, p.x.floor() as i32, p.y.floor() as i32, color);
    }
}

fn put(canvas: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < canvas.width() && (y as u32) < canvas.height() {
        canvas.put_pixel(x as u32, y as u32, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marker_track_core::GrayImage;

    #[test]
    fn writes_every_nth_pass() {
        let dir = tempfile::tempdir().expect("tempdir");
        let img = GrayImage::filled(32, 32, 128);
        let det = Detection {
            dictionary: "DICT_4X4_50",
            id: 1,
            corners: [
                Point2::new(4.0, 4.0),
                Point2::new(20.0, 4.0),
                Point2::new(20.0, 20.0),
                Point2::new(4.0, 20.0),
            ],
        };
        let mut dbg = Debugger::new(true, 2, Some(dir.path().to_path_buf()));
        let written: Vec<bool> = (0..4)
            .map(|i| {
                dbg.show(&img.view(), i, "DICT_4X4_50", std::slice::from_ref(&det))
                    .is_some()
            })
            .collect();
        assert_eq!(written, vec![true, false, true, false]);

        let saved = image::open(dir.path().join("frame_000000_DICT_4X4_50.png"))
            .expect("png")
            .to_rgb8();
        assert_eq!(*saved.get_pixel(12, 4), OUTLINE);
        assert_eq!(*saved.get_pixel(4, 4), FIRST_CORNER);
        assert_eq!(*saved.get_pixel(12, 12), Rgb([128, 128, 128]));
    }

    #[test]
    fn disabled_debugger_does_nothing() {
        let img = GrayImage::filled(8, 8, 0);
        let mut dbg = Debugger::new(false, 1, None);
        assert!(dbg.show(&img.view(), 0, "DICT_4X4_50", &[]).is_none());
    }
}
