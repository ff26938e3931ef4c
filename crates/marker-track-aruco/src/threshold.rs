//! Otsu thresholding over whole images and over decoder sample sets.

use marker_track_core::GrayImageView;

/// 256-bin intensity histogram.
pub(crate) fn histogram<I: IntoIterator<Item = u8>>(values: I) -> [u32; 256] {
    let mut hist = [0u32; 256];
    for v in values {
        hist[v as usize] += 1;
    }
    hist
}

/// Otsu threshold of a histogram: values `<= t` are the dark class.
///
/// Flat inputs return their single level; bimodal inputs with only two
/// populated bins split halfway between them.
pub(crate) fn otsu_from_histogram(hist: &[u32; 256]) -> u8 {
    let populated: Vec<usize> = (0..256).filter(|&i| hist[i] > 0).collect();
    let (Some(&lo), Some(&hi)) = (populated.first(), populated.last()) else {
        return 127;
    };
    if lo == hi {
        return lo as u8;
    }
    if populated.len() == 2 {
        return ((lo + hi) / 2) as u8;
    }

    let total: f64 = hist.iter().map(|&h| h as f64).sum();
    let sum_total: f64 = hist
        .iter()
        .enumerate()
        .map(|(i, &h)| i as f64 * h as f64)
        .sum();

    let mut sum_dark = 0.0;
    let mut w_dark = 0.0;
    let mut best = (f64::MIN, 127u8);
    for (t, &h) in hist.iter().enumerate().take(hi) {
        w_dark += h as f64;
        sum_dark += t as f64 * h as f64;
        if w_dark < 1.0 {
            continue;
        }
        let w_light = total - w_dark;
        if w_light < 1.0 {
            break;
        }
        let diff = sum_dark / w_dark - (sum_total - sum_dark) / w_light;
        let var_between = w_dark * w_light * diff * diff;
        if var_between > best.0 {
            best = (var_between, t as u8);
        }
    }
    best.1
}

/// Otsu threshold over all pixels of an image.
pub fn otsu_threshold(img: &GrayImageView<'_>) -> u8 {
    otsu_from_histogram(&histogram(img.data.iter().copied()))
}

/// Otsu threshold over a sample set.
pub(crate) fn otsu_threshold_from_samples(samples: &[u8]) -> u8 {
    otsu_from_histogram(&histogram(samples.iter().copied()))
}
