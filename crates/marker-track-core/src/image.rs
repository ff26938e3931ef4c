/// Borrowed 8-bit grayscale image, row-major.
#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // len = w*h
}

/// Owned 8-bit grayscale image, row-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl GrayImage {
    /// Image filled with a constant value.
    pub fn filled(width: usize, height: usize, value: u8) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    /// Wrap a raw buffer. Returns `None` when `data.len() != width * height`.
    pub fn from_raw(width: usize, height: usize, data: Vec<u8>) -> Option<Self> {
        let expected = width.checked_mul(height)?;
        (data.len() == expected).then_some(Self {
            width,
            height,
            data,
        })
    }

    #[inline]
    pub fn view(&self) -> GrayImageView<'_> {
        GrayImageView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }

    /// Set a pixel; out-of-bounds writes are ignored.
    #[inline]
    pub fn put(&mut self, x: i32, y: i32, value: u8) {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return;
        }
        self.data[y as usize * self.width + x as usize] = value;
    }
}

impl GrayImageView<'_> {
    /// Pixel value, `0` outside the image or past the end of `data`.
    #[inline]
    pub fn get(&self, x: i32, y: i32) -> u8 {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return 0;
        }
        self.data
            .get(y as usize * self.width + x as usize)
            .copied()
            .unwrap_or(0)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether `data` holds exactly `width * height` pixels.
    #[inline]
    pub fn is_well_formed(&self) -> bool {
        self.width.checked_mul(self.height) == Some(self.data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_raw_rejects_wrong_length() {
        assert!(GrayImage::from_raw(4, 4, vec![0; 15]).is_none());
        assert!(GrayImage::from_raw(4, 4, vec![0; 16]).is_some());
    }

    #[test]
    fn short_buffer_reads_as_black_past_its_end() {
        let data = [7u8; 10];
        let view = GrayImageView {
            width: 4,
            height: 4,
            data: &data,
        };
        assert!(!view.is_well_formed());
        assert_eq!(view.get(1, 2), 7);
        assert_eq!(view.get(3, 3), 0);
        assert!(GrayImage::filled(4, 3, 1).view().is_well_formed());
    }
}
