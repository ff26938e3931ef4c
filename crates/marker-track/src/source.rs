//! Owned frame sources.

use crate::config::VideoSource;
use crate::{ConfigError, TrackerError};
use image::imageops::FilterType;
use image::ImageFormat;
use marker_track_core::GrayImage;
use std::fs;
use std::path::{Path, PathBuf};

pub const CAP_PROP_POS_FRAMES: &str = "CAP_PROP_POS_FRAMES";
pub const CAP_PROP_FRAME_WIDTH: &str = "CAP_PROP_FRAME_WIDTH";
pub const CAP_PROP_FRAME_HEIGHT: &str = "CAP_PROP_FRAME_HEIGHT";

/// A stream of grayscale frames owned by the tracker.
pub trait FrameSource {
    /// Next frame, or `None` once the stream is exhausted or released.
    fn read(&mut self) -> Option<GrayImage>;

    /// Apply a named capture property.
    fn set_property(&mut self, name: &str, value: f64) -> Result<(), ConfigError>;

    /// Release the underlying resource. Further reads return `None`.
    fn release(&mut self);
}

/// Opens owned frame sources from a selector.
pub trait SourceOpener {
    fn open(&self, source: &VideoSource) -> Result<Box<dyn FrameSource>, TrackerError>;
}

/// Opens image files and directories of images.
///
/// Capture devices are not supported; inject another [`SourceOpener`] for them.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImageSequenceOpener;

impl SourceOpener for ImageSequenceOpener {
    fn open(&self, source: &VideoSource) -> Result<Box<dyn FrameSource>, TrackerError> {
        let fail = |reason: String| TrackerError::SourceOpen {
            selector: source.to_string(),
            reason,
        };
        match source {
            VideoSource::Path(path) => Ok(Box::new(ImageSequence::open(path).map_err(fail)?)),
            VideoSource::Device(_) => Err(fail("capture devices are not supported".into())),
            VideoSource::External => Err(fail("frames are supplied externally".into())),
        }
    }
}

/// Frames decoded one at a time from a sorted list of image files.
#[derive(Clone, Debug)]
pub struct ImageSequence {
    frames: Vec<PathBuf>,
    next: usize,
    size: (Option<u32>, Option<u32>),
    released: bool,
}

impl ImageSequence {
    /// A single image file, or every image file in a directory sorted by name.
    pub fn open(path: &Path) -> Result<Self, String> {
        let frames = if path.is_dir() {
            let mut files: Vec<PathBuf> = fs::read_dir(path)
                .map_err(|e| e.to_string())?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && ImageFormat::from_path(p).is_ok())
                .collect();
            files.sort();
            files
        } else if path.is_file() {
            ImageFormat::from_path(path).map_err(|e| e.to_string())?;
            vec![path.to_path_buf()]
        } else {
            return Err("no such file or directory".into());
        };
        if frames.is_empty() {
            return Err("directory contains no images".into());
        }
        log::info!("opened {} with {} frames", path.display(), frames.len());
        Ok(Self {
            frames,
            next: 0,
            size: (None, None),
            released: false,
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for ImageSequence {
    fn read(&mut self) -> Option<GrayImage> {
        if self.released {
            return None;
        }
        let path = self.frames.get(self.next)?;
        self.next += 1;
        let mut luma = match image::open(path) {
            Ok(img) => img.to_luma8(),
            Err(e) => {
                log::warn!("failed to decode {}: {e}", path.display());
                return None;
            }
        };
        if self.size != (None, None) {
            let w = self.size.0.unwrap_or(luma.width());
            let h = self.size.1.unwrap_or(luma.height());
            if (w, h) != luma.dimensions() {
                luma = image::imageops::resize(&luma, w, h, FilterType::Triangle);
            }
        }
        let (w, h) = luma.dimensions();
        GrayImage::from_raw(w as usize, h as usize, luma.into_raw())
    }

    fn set_property(&mut self, name: &str, value: f64) -> Result<(), ConfigError> {
        let invalid = || ConfigError::CapturePropertyValue {
            name: name.to_string(),
            value,
        };
        let as_count = |min: f64| {
            (value.is_finite() && value >= min && value.fract() == 0.0 && value <= u32::MAX as f64)
                .then_some(value as u32)
        };
        match name {
            CAP_PROP_POS_FRAMES => {
                let pos = as_count(0.0).ok_or_else(invalid)? as usize;
                self.next = pos.min(self.frames.len());
            }
            CAP_PROP_FRAME_WIDTH => self.size.0 = Some(as_count(1.0).ok_or_else(invalid)?),
            CAP_PROP_FRAME_HEIGHT => self.size.1 = Some(as_count(1.0).ok_or_else(invalid)?),
            _ => return Err(ConfigError::CaptureProperty(name.to_string())),
        }
        Ok(())
    }

    fn release(&mut self) {
        self.released = true;
    }
}
