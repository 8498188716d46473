use image::RgbImage;
use rayon::prelude::*;

use crate::error::{AlignError, AlignResult, EstimationFailure};
use crate::pipeline::types::RigidTransform;

const REFERENCE_WEIGHT: f32 = 0.5;
const TRANSFORMED_WEIGHT: f32 = 0.7;

/// Resamples the target into the reference frame and blends the overlay.
#[derive(Debug, Clone, Copy)]
pub struct Compositor {
    overlay: bool,
}

impl Default for Compositor {
    fn default() -> Self {
        Self { overlay: true }
    }
}

impl Compositor {
    pub fn new(overlay: bool) -> Self {
        Self { overlay }
    }

    /// Transformed target, plus the overlay when enabled.
    pub fn compose(
        &self,
        target: &RgbImage,
        transform: &RigidTransform,
        reference: &RgbImage,
    ) -> AlignResult<(RgbImage, Option<RgbImage>)> {
        let (width, height) = reference.dimensions();
        let transformed = warp(target, transform, width, height)?;
        let overlay = if self.overlay {
            Some(blend(reference, &transformed)?)
        } else {
            None
        };
        Ok((transformed, overlay))
    }
}

/// Inverse-mapped bilinear warp into a `width x height` canvas. Pixels that
/// map outside the source are black.
pub fn warp(
    source: &RgbImage,
    transform: &RigidTransform,
    width: u32,
    height: u32,
) -> AlignResult<RgbImage> {
    let inverse = transform
        .inverse()
        .ok_or(AlignError::Estimation(EstimationFailure::DegenerateGeometry { stage: "warp" }))?;

    let (src_w, src_h) = (source.width() as i64, source.height() as i64);
    let src = source.as_raw();
    let texel = |x: i64, y: i64, channel: usize| -> f32 {
        if x < 0 || y < 0 || x >= src_w || y >= src_h {
            0.0
        } else {
            src[((y * src_w + x) * 3) as usize + channel] as f32
        }
    };

    let row_len = width as usize * 3;
    let mut buffer = vec![0u8; row_len * height as usize];
    if row_len > 0 {
        buffer
            .par_chunks_mut(row_len)
            .enumerate()
            .for_each(|(y, row)| {
                for x in 0..width as usize {
                    let (sx, sy) = inverse.apply(x as f64, y as f64);
                    if !sx.is_finite() || !sy.is_finite() {
                        continue;
                    }
                    let (x0, y0) = (sx.floor(), sy.floor());
                    if x0 < -1.0 || y0 < -1.0 || x0 >= src_w as f64 || y0 >= src_h as f64 {
                        continue;
                    }
                    let (fx, fy) = ((sx - x0) as f32, (sy - y0) as f32);
                    let (x0, y0) = (x0 as i64, y0 as i64);

                    for channel in 0..3 {
                        let top = texel(x0, y0, channel) * (1.0 - fx) + texel(x0 + 1, y0, channel) * fx;
                        let bottom =
                            texel(x0, y0 + 1, channel) * (1.0 - fx) + texel(x0 + 1, y0 + 1, channel) * fx;
                        let value = top * (1.0 - fy) + bottom * fy;
                        row[x * 3 + channel] = value.round().clamp(0.0, 255.0) as u8;
                    }
                }
            });
    }

    RgbImage::from_raw(width, height, buffer).ok_or_else(|| {
        AlignError::MalformedImage(format!("cannot build a {}x{} canvas", width, height))
    })
}

/// `saturate(round(0.5 * reference + 0.7 * transformed))` per channel.
pub fn blend(reference: &RgbImage, transformed: &RgbImage) -> AlignResult<RgbImage> {
    if reference.dimensions() != transformed.dimensions() {
        return Err(AlignError::MalformedImage(format!(
            "overlay inputs differ in size: {:?} vs {:?}",
            reference.dimensions(),
            transformed.dimensions()
        )));
    }

    let data: Vec<u8> = reference
        .as_raw()
        .par_iter()
        .zip(transformed.as_raw().par_iter())
        .map(|(&r, &t)| {
            (REFERENCE_WEIGHT * r as f32 + TRANSFORMED_WEIGHT * t as f32)
                .round()
                .min(255.0) as u8
        })
        .collect();

    let (width, height) = reference.dimensions();
    RgbImage::from_raw(width, height, data)
        .ok_or_else(|| AlignError::MalformedImage("overlay buffer size mismatch".to_string()))
}
