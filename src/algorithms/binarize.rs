use image::{GrayImage, Luma, RgbImage};

use crate::error::{AlignError, AlignResult};

pub const MASK_HIGH: u8 = 255;
pub const MASK_LOW: u8 = 0;

/// Two-level image produced from one source image and one threshold.
#[derive(Debug, Clone)]
pub struct BinaryMask {
    threshold: u8,
    pixels: GrayImage,
}

impl BinaryMask {
    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn image(&self) -> &GrayImage {
        &self.pixels
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    /// Fraction of pixels at the high level.
    pub fn foreground_ratio(&self) -> f64 {
        let total = self.pixels.as_raw().len();
        if total == 0 {
            return 0.0;
        }
        let high = self.pixels.as_raw().iter().filter(|&&p| p == MASK_HIGH).count();
        high as f64 / total as f64
    }
}

/// BT.601 luma in 14-bit fixed point: 0.299 R + 0.587 G + 0.114 B.
#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    const R: u32 = 4899;
    const G: u32 = 9617;
    const B: u32 = 1868;
    const HALF: u32 = 1 << 13;
    ((r as u32 * R + g as u32 * G + b as u32 * B + HALF) >> 14) as u8
}

pub fn to_grayscale(image: &RgbImage) -> GrayImage {
    let (width, height) = image.dimensions();
    let data = image
        .as_raw()
        .chunks_exact(3)
        .map(|px| luma(px[0], px[1], px[2]))
        .collect();
    // Buffer length is width * height by construction.
    GrayImage::from_raw(width, height, data).unwrap_or_else(|| GrayImage::new(width, height))
}

/// Grayscale conversion followed by a fixed cutoff: intensities at or above
/// `threshold` become 255, everything else 0.
pub fn binarize(image: &RgbImage, threshold: u8) -> AlignResult<BinaryMask> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(AlignError::MalformedImage(format!(
            "cannot binarize a {}x{} image",
            width, height
        )));
    }

    let mut pixels = to_grayscale(image);
    for pixel in pixels.pixels_mut() {
        let Luma([value]) = *pixel;
        *pixel = Luma([if value >= threshold { MASK_HIGH } else { MASK_LOW }]);
    }

    Ok(BinaryMask { threshold, pixels })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_luma_weights() {
        assert_eq!(luma(0, 0, 0), 0);
        assert_eq!(luma(255, 255, 255), 255);
        assert_eq!(luma(255, 0, 0), 76);
        assert_eq!(luma(0, 255, 0), 150);
        assert_eq!(luma(0, 0, 255), 29);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let image = RgbImage::from_fn(3, 1, |x, _| {
            let v = [99u8, 100, 101][x as usize];
            Rgb([v, v, v])
        });
        let mask = binarize(&image, 100).unwrap();
        let values: Vec<u8> = mask.image().pixels().map(|p| p[0]).collect();
        assert_eq!(values, vec![0, 255, 255]);
        assert_eq!(mask.threshold(), 100);
    }

    #[test]
    fn test_mask_is_two_level() {
        let image = RgbImage::from_fn(16, 16, |x, y| Rgb([(x * 16) as u8, (y * 16) as u8, 7]));
        let mask = binarize(&image, 60).unwrap();
        assert!(mask
            .image()
            .pixels()
            .all(|p| p[0] == MASK_HIGH || p[0] == MASK_LOW));
        assert!(mask.foreground_ratio() > 0.0 && mask.foreground_ratio() < 1.0);
    }

    #[test]
    fn test_extreme_thresholds() {
        let image = RgbImage::from_pixel(4, 4, Rgb([0, 0, 0]));
        assert_eq!(binarize(&image, 0).unwrap().foreground_ratio(), 1.0);
        let bright = RgbImage::from_pixel(4, 4, Rgb([254, 254, 254]));
        assert_eq!(binarize(&bright, 255).unwrap().foreground_ratio(), 0.0);
    }

    #[test]
    fn test_empty_image_is_rejected() {
        let image = RgbImage::new(0, 5);
        assert!(matches!(binarize(&image, 10), Err(AlignError::MalformedImage(_))));
    }
}
