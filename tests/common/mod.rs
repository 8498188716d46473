#![allow(dead_code)]

use cross_section_aligner::pipeline::composite::warp;
use cross_section_aligner::RigidTransform;
use image::{Rgb, RgbImage};

const BACKGROUND: Rgb<u8> = Rgb([225, 215, 230]);

/// Small linear congruential generator so scenes are identical on every run.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 33) as u32
    }

    fn range(&mut self, low: u32, high: u32) -> u32 {
        low + self.next() % (high - low)
    }
}

/// Dark rectangles and discs of varied size on a light background, kept at
/// least 40 px away from the border.
pub fn section_image(size: u32, seed: u64) -> RgbImage {
    let mut rng = Lcg(seed);
    let mut image = RgbImage::from_pixel(size, size, BACKGROUND);
    let (low, high) = (40, size - 40);

    for i in 0..36 {
        let shade = Rgb([
            rng.range(20, 90) as u8,
            rng.range(10, 80) as u8,
            rng.range(30, 100) as u8,
        ]);
        if i % 3 == 0 {
            let radius = rng.range(5, 14) as i64;
            let cx = rng.range(low + radius as u32, high - radius as u32) as i64;
            let cy = rng.range(low + radius as u32, high - radius as u32) as i64;
            for y in cy - radius..=cy + radius {
                for x in cx - radius..=cx + radius {
                    if (x - cx).pow(2) + (y - cy).pow(2) <= radius * radius {
                        image.put_pixel(x as u32, y as u32, shade);
                    }
                }
            }
        } else {
            let w = rng.range(8, 36);
            let h = rng.range(8, 36);
            let x0 = rng.range(low, high - w);
            let y0 = rng.range(low, high - h);
            for y in y0..y0 + h {
                for x in x0..x0 + w {
                    image.put_pixel(x, y, shade);
                }
            }
        }
    }
    image
}

pub fn blank_image(size: u32) -> RgbImage {
    RgbImage::from_pixel(size, size, BACKGROUND)
}

/// Target such that `transform` maps target coordinates onto `reference`.
pub fn displaced_target(reference: &RgbImage, transform: &RigidTransform) -> RgbImage {
    let inverse = transform.inverse().unwrap();
    let (width, height) = reference.dimensions();
    let mut target = warp(reference, &inverse, width, height).unwrap();
    // Blend the uncovered border into the slide background.
    let covered = warp(
        &RgbImage::from_pixel(width, height, Rgb([255, 255, 255])),
        &inverse,
        width,
        height,
    )
    .unwrap();
    for (pixel, mask) in target.pixels_mut().zip(covered.pixels()) {
        let uncovered = 1.0 - mask[0] as f32 / 255.0;
        for channel in 0..3 {
            let filled = pixel[channel] as f32 + uncovered * BACKGROUND[channel] as f32;
            pixel[channel] = filled.round().min(255.0) as u8;
        }
    }
    target
}
