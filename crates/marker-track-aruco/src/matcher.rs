//! Dictionary lookup of observed codes, tolerant to rotation and bit errors.

use crate::Dictionary;

/// Best dictionary entry for an observed code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Match {
    pub id: u32,
    /// Quarter turns `0..=3` such that `observed == rotate_code(dict_code, rotation)`.
    pub rotation: u8,
    /// Bit errors between the observed and the (rotated) dictionary code.
    pub hamming: u8,
}

/// Brute-force matcher over all ids and the four rotations of each code.
///
/// Rotations are precomputed once; for dictionaries of up to a few thousand
/// entries a linear scan is fast enough.
#[derive(Clone, Debug)]
pub struct Matcher {
    dict: Dictionary,
    max_hamming: u8,
    rotated: Vec<[u64; 4]>,
}

impl Matcher {
    /// Matcher accepting up to `max_hamming` bit errors.
    ///
    /// Returns `None` for dictionaries whose markers do not fit in 64 bits.
    pub fn new(dict: Dictionary, max_hamming: u8) -> Option<Self> {
        if dict.bit_count() > 64 {
            return None;
        }
        let n = dict.marker_size;
        let rotated = dict
            .codes
            .iter()
            .map(|&code| [0u8, 1, 2, 3].map(|rot| rotate_code(code, n, rot)))
            .collect();
        Some(Self {
            dict,
            max_hamming,
            rotated,
        })
    }

    #[inline]
    pub fn dictionary(&self) -> &Dictionary {
        &self.dict
    }

    #[inline]
    pub fn max_hamming(&self) -> u8 {
        self.max_hamming
    }

    /// Closest entry within `max_hamming`; ties keep the lowest id.
    pub fn match_code(&self, observed: u64) -> Option<Match> {
        let mut best: Option<Match> = None;
        for (id, rots) in self.rotated.iter().enumerate() {
            for (rot, &cand) in rots.iter().enumerate() {
                let hamming = (observed ^ cand).count_ones() as u8;
                if hamming > self.max_hamming || best.is_some_and(|b| b.hamming <= hamming) {
                    continue;
                }
                best = Some(Match {
                    id: id as u32,
                    rotation: rot as u8,
                    hamming,
                });
                if hamming == 0 {
                    return best;
                }
            }
        }
        best
    }
}

/// Rotate a row-major `n × n` code (`idx = y * n + x`) by `rot` quarter turns.
pub fn rotate_code(code: u64, n: usize, rot: u8) -> u64 {
    let rot = rot & 3;
    if rot == 0 {
        return code;
    }

    let mut out = 0u64;
    for y in 0..n {
        for x in 0..n {
            let (sx, sy) = match rot {
                1 => (y, n - 1 - x),
                2 => (n - 1 - x, n - 1 - y),
                _ => (n - 1 - y, x),
            };
            out |= ((code >> (sy * n + sx)) & 1) << (y * n + x);
        }
    }
    out
}
