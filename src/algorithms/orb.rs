use image::{imageops, GrayImage};
use rayon::prelude::*;

use crate::config::OrbConfig;

/// FAST-9 Bresenham circle of radius 3, clockwise from north.
const FAST_CIRCLE: [(i32, i32); 16] = [
    (0, -3), (1, -3), (2, -2), (3, -1), (3, 0), (3, 1),
    (2, 2), (1, 3), (0, 3), (-1, 3), (-2, 2), (-3, 1),
    (-3, 0), (-3, -1), (-2, -2), (-1, -3),
];
const FAST_ARC: usize = 9;

const PATCH_SIZE: f32 = 31.0;
const ORIENTATION_RADIUS: i32 = 15;
const HARRIS_BLOCK: i32 = 7;
const PATTERN_RADIUS: i32 = 13;
const DESCRIPTOR_BITS: usize = 256;

/// Smallest border that keeps the steered pattern, the centroid disc and the
/// Harris window inside the image.
const MIN_BORDER: u32 = 19;

/// Oriented FAST keypoint in level-0 pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Intensity-centroid orientation in radians.
    pub angle: f32,
    /// Harris corner response at the detection level.
    pub response: f32,
    pub octave: u8,
    /// Diameter of the described patch in level-0 pixels.
    pub size: f32,
}

/// 256-bit rotated BRIEF descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Descriptor(pub [u64; 4]);

impl Descriptor {
    pub fn hamming(&self, other: &Descriptor) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Feature {
    pub keypoint: Keypoint,
    pub descriptor: Descriptor,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    x: u32,
    y: u32,
    response: f32,
}

/// ORB: FAST corners ranked by Harris response over a scale pyramid,
/// oriented by intensity centroid and described with steered BRIEF tests.
#[derive(Debug, Clone)]
pub struct OrbDetector {
    config: OrbConfig,
    pattern: Vec<[i8; 4]>,
}

impl Default for OrbDetector {
    fn default() -> Self {
        Self::new(OrbConfig::default())
    }
}

impl OrbDetector {
    pub fn new(config: OrbConfig) -> Self {
        Self {
            config,
            pattern: sampling_pattern(),
        }
    }

    pub fn config(&self) -> &OrbConfig {
        &self.config
    }

    fn border(&self) -> u32 {
        self.config.edge_threshold.max(MIN_BORDER)
    }

    /// Detect up to `max_features` keypoints and describe them.
    ///
    /// Output order is deterministic: by pyramid level, then by descending
    /// response, then by row and column.
    pub fn detect_and_compute(&self, image: &GrayImage) -> Vec<Feature> {
        let pyramid = self.build_pyramid(image);
        let quotas = self.level_quotas();

        let per_level: Vec<Vec<Feature>> = pyramid
            .par_iter()
            .enumerate()
            .map(|(octave, (level, scale))| {
                self.features_at_level(level, octave as u8, *scale, quotas[octave])
            })
            .collect();

        let features: Vec<Feature> = per_level.into_iter().flatten().collect();
        tracing::trace!(
            levels = pyramid.len(),
            features = features.len(),
            "ORB detection finished"
        );
        features
    }

    fn build_pyramid(&self, image: &GrayImage) -> Vec<(GrayImage, f32)> {
        let min_side = 2 * self.border() + 1;
        let mut pyramid = Vec::with_capacity(self.config.n_levels as usize);

        for level in 0..self.config.n_levels {
            let scale = self.config.scale_factor.powi(level as i32);
            let width = (image.width() as f32 / scale).round() as u32;
            let height = (image.height() as f32 / scale).round() as u32;
            if width < min_side || height < min_side {
                break;
            }

            let level_image = if level == 0 {
                image.clone()
            } else {
                imageops::resize(image, width, height, imageops::FilterType::Triangle)
            };
            pyramid.push((level_image, scale));
        }

        pyramid
    }

    /// Split `max_features` across levels geometrically, coarser levels
    /// getting proportionally fewer.
    fn level_quotas(&self) -> Vec<usize> {
        let levels = self.config.n_levels.max(1) as usize;
        let total = self.config.max_features;
        let factor = 1.0 / self.config.scale_factor as f64;

        let mut desired = if (1.0 - factor).abs() < f64::EPSILON {
            total as f64 / levels as f64
        } else {
            total as f64 * (1.0 - factor) / (1.0 - factor.powi(levels as i32))
        };

        let mut quotas = Vec::with_capacity(levels);
        let mut assigned = 0usize;
        for _ in 0..levels - 1 {
            let quota = (desired.round() as usize).min(total - assigned);
            quotas.push(quota);
            assigned += quota;
            desired *= factor;
        }
        quotas.push(total - assigned);
        quotas
    }

    fn features_at_level(
        &self,
        image: &GrayImage,
        octave: u8,
        scale: f32,
        quota: usize,
    ) -> Vec<Feature> {
        if quota == 0 {
            return Vec::new();
        }

        let mut candidates = self.detect_fast(image);
        if candidates.is_empty() {
            return Vec::new();
        }

        for candidate in candidates.iter_mut() {
            candidate.response = harris_response(image, candidate.x, candidate.y, self.config.harris_k);
        }
        candidates.sort_by(|a, b| {
            b.response
                .total_cmp(&a.response)
                .then_with(|| (a.y, a.x).cmp(&(b.y, b.x)))
        });
        candidates.truncate(quota);

        let smoothed = if self.config.blur_sigma > 0.0 {
            imageops::blur(image, self.config.blur_sigma)
        } else {
            image.clone()
        };

        candidates
            .into_iter()
            .map(|candidate| {
                let angle = intensity_centroid_angle(image, candidate.x, candidate.y);
                let descriptor = self.describe(&smoothed, candidate.x, candidate.y, angle);
                Feature {
                    keypoint: Keypoint {
                        x: candidate.x as f32 * scale,
                        y: candidate.y as f32 * scale,
                        angle,
                        response: candidate.response,
                        octave,
                        size: PATCH_SIZE * scale,
                    },
                    descriptor,
                }
            })
            .collect()
    }

    /// FAST-9 corners after 3x3 non-maximum suppression on the FAST score.
    fn detect_fast(&self, image: &GrayImage) -> Vec<Candidate> {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let border = self.border() as usize;
        if w <= 2 * border || h <= 2 * border {
            return Vec::new();
        }

        let data = image.as_raw();
        let threshold = self.config.fast_threshold as i32;
        let mut scores = vec![0u32; w * h];
        scores
            .par_chunks_mut(w)
            .enumerate()
            .filter(|(y, _)| *y >= border && *y < h - border)
            .for_each(|(y, row)| {
                for (x, score) in row.iter_mut().enumerate().take(w - border).skip(border) {
                    *score = fast_score(data, w, x, y, threshold);
                }
            });

        let mut corners = Vec::new();
        for y in border..h - border {
            for x in border..w - border {
                let score = scores[y * w + x];
                if score > 0 && is_local_maximum(&scores, w, x, y, score) {
                    corners.push(Candidate {
                        x: x as u32,
                        y: y as u32,
                        response: 0.0,
                    });
                }
            }
        }
        corners
    }

    fn describe(&self, smoothed: &GrayImage, x: u32, y: u32, angle: f32) -> Descriptor {
        let (sin_a, cos_a) = angle.sin_cos();
        let width = smoothed.width() as i32;
        let height = smoothed.height() as i32;
        let data = smoothed.as_raw();

        let sample = |dx: i8, dy: i8| -> u8 {
            let rx = (dx as f32 * cos_a - dy as f32 * sin_a).round() as i32;
            let ry = (dx as f32 * sin_a + dy as f32 * cos_a).round() as i32;
            let sx = (x as i32 + rx).clamp(0, width - 1);
            let sy = (y as i32 + ry).clamp(0, height - 1);
            data[(sy * width + sx) as usize]
        };

        let mut words = [0u64; 4];
        for (bit, &[x1, y1, x2, y2]) in self.pattern.iter().enumerate() {
            if sample(x1, y1) < sample(x2, y2) {
                words[bit / 64] |= 1u64 << (bit % 64);
            }
        }
        Descriptor(words)
    }
}

/// Sum of absolute differences beyond the threshold on the winning side, or 0
/// when no arc of nine contiguous pixels is uniformly brighter or darker.
fn fast_score(data: &[u8], width: usize, x: usize, y: usize, threshold: i32) -> u32 {
    let center = data[y * width + x] as i32;
    let mut ring = [0i32; 16];
    for (value, (dx, dy)) in ring.iter_mut().zip(FAST_CIRCLE.iter()) {
        let px = (x as i32 + dx) as usize;
        let py = (y as i32 + dy) as usize;
        *value = data[py * width + px] as i32 - center;
    }

    // Any arc of nine covers at least two compass points.
    let compass = [ring[0], ring[4], ring[8], ring[12]];
    let bright = compass.iter().filter(|&&d| d > threshold).count();
    let dark = compass.iter().filter(|&&d| d < -threshold).count();
    if bright < 2 && dark < 2 {
        return 0;
    }

    let mut best = 0u32;
    for sign in [1i32, -1] {
        let mut run = 0usize;
        let mut longest = 0usize;
        for i in 0..ring.len() * 2 {
            if sign * ring[i % 16] > threshold {
                run += 1;
                longest = longest.max(run);
            } else {
                run = 0;
            }
        }
        if longest >= FAST_ARC {
            let score: i32 = ring
                .iter()
                .map(|&d| (sign * d - threshold).max(0))
                .sum();
            best = best.max(score as u32);
        }
    }
    best
}

/// Ties go to the neighbour that comes first in raster order.
fn is_local_maximum(scores: &[u32], width: usize, x: usize, y: usize, score: u32) -> bool {
    for dy in -1i32..=1 {
        for dx in -1i32..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            let nx = (x as i32 + dx) as usize;
            let ny = (y as i32 + dy) as usize;
            let neighbour = scores[ny * width + nx];
            let earlier = dy < 0 || (dy == 0 && dx < 0);
            if (earlier && neighbour >= score) || (!earlier && neighbour > score) {
                return false;
            }
        }
    }
    true
}

/// Harris response over a 7x7 window of Sobel gradients.
fn harris_response(image: &GrayImage, x: u32, y: u32, k: f32) -> f32 {
    let width = image.width() as i32;
    let data = image.as_raw();
    let at = |px: i32, py: i32| data[(py * width + px) as usize] as f64;

    let radius = HARRIS_BLOCK / 2;
    let (cx, cy) = (x as i32, y as i32);
    let (mut a, mut b, mut c) = (0.0f64, 0.0f64, 0.0f64);
    for py in cy - radius..=cy + radius {
        for px in cx - radius..=cx + radius {
            let ix = (at(px + 1, py - 1) + 2.0 * at(px + 1, py) + at(px + 1, py + 1))
                - (at(px - 1, py - 1) + 2.0 * at(px - 1, py) + at(px - 1, py + 1));
            let iy = (at(px - 1, py + 1) + 2.0 * at(px, py + 1) + at(px + 1, py + 1))
                - (at(px - 1, py - 1) + 2.0 * at(px, py - 1) + at(px + 1, py - 1));
            a += ix * ix;
            b += iy * iy;
            c += ix * iy;
        }
    }

    let scale = 1.0 / (4.0 * HARRIS_BLOCK as f64 * 255.0);
    let scale_4 = scale * scale * scale * scale;
    ((a * b - c * c - k as f64 * (a + b) * (a + b)) * scale_4) as f32
}

/// Orientation of the vector from the keypoint to the intensity centroid of
/// the surrounding disc.
fn intensity_centroid_angle(image: &GrayImage, x: u32, y: u32) -> f32 {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let data = image.as_raw();
    let r = ORIENTATION_RADIUS;

    let mut m01 = 0.0f64;
    let mut m10 = 0.0f64;
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy > r * r {
                continue;
            }
            let px = x as i32 + dx;
            let py = y as i32 + dy;
            if px < 0 || py < 0 || px >= width || py >= height {
                continue;
            }
            let intensity = data[(py * width + px) as usize] as f64;
            m10 += intensity * dx as f64;
            m01 += intensity * dy as f64;
        }
    }

    m01.atan2(m10) as f32
}

/// Fixed pseudo-random point pairs inside the 31x31 patch (splitmix64 with a
/// constant seed), so descriptors are reproducible across runs and builds.
fn sampling_pattern() -> Vec<[i8; 4]> {
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    let mut next_coordinate = move || {
        state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^= z >> 31;
        (z % (2 * PATTERN_RADIUS as u64 + 1)) as i8 - PATTERN_RADIUS as i8
    };

    let mut pattern = Vec::with_capacity(DESCRIPTOR_BITS);
    while pattern.len() < DESCRIPTOR_BITS {
        let pair = [
            next_coordinate(),
            next_coordinate(),
            next_coordinate(),
            next_coordinate(),
        ];
        if pair[0] != pair[2] || pair[1] != pair[3] {
            pattern.push(pair);
        }
    }
    pattern
}
