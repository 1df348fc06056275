use std::path::Path;

use image::{imageops::FilterType, RgbImage};

use crate::{ModulationFactors, PulseError, Result};

/// Still image every frame is derived from. Never modified after loading.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceImage {
    pixels: RgbImage,
}

impl SourceImage {
    pub fn new(pixels: RgbImage) -> Result<Self> {
        if pixels.width() == 0 || pixels.height() == 0 {
            return Err(PulseError::InvalidImage(format!(
                "image has no pixels ({}x{})",
                pixels.width(),
                pixels.height()
            )));
        }
        Ok(Self { pixels })
    }

    /// Decodes an image file, converts it to 8-bit RGB and shrinks each side
    /// by `downscale` (integer division).
    pub fn open(path: &Path, downscale: u32) -> Result<Self> {
        let decoded = image::open(path)
            .map_err(|e| PulseError::InvalidImage(format!("{}: {e}", path.display())))?;
        Self::new(decoded.to_rgb8())?.downscaled(downscale)
    }

    /// Returns a copy reduced to `width / factor` by `height / factor`.
    pub fn downscaled(&self, factor: u32) -> Result<Self> {
        if factor == 0 {
            return Err(PulseError::InvalidImage("downscale factor must be at least 1".into()));
        }
        if factor == 1 {
            return Ok(self.clone());
        }

        let width = self.pixels.width() / factor;
        let height = self.pixels.height() / factor;
        if width == 0 || height == 0 {
            return Err(PulseError::InvalidImage(format!(
                "{}x{} image is too small to downscale by {factor}",
                self.pixels.width(),
                self.pixels.height()
            )));
        }

        let resized = image::imageops::resize(&self.pixels, width, height, FilterType::CatmullRom);
        Self::new(resized)
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }
}

/// Applies a brightness enhancement followed by a contrast enhancement.
///
/// Brightness scales every channel: `v * brightness`. Contrast pulls every
/// channel toward or away from the mean luma `m` of the brightened image:
/// `m + contrast * (v - m)`. Each step truncates and clamps to `0..=255`.
/// The source is only read; a new buffer is returned.
pub fn synthesize(image: &SourceImage, factors: ModulationFactors) -> Result<RgbImage> {
    if !factors.is_finite() {
        return Err(PulseError::InvalidImage(format!(
            "modulation factors are not finite: brightness={}, contrast={}",
            factors.brightness, factors.contrast
        )));
    }

    let mut frame = image.pixels.clone();
    let brightness = factors.brightness as f32;
    for channel in frame.iter_mut() {
        *channel = blend(0.0, *channel, brightness);
    }

    let mean = f32::from(mean_luma(&frame));
    let contrast = factors.contrast as f32;
    for channel in frame.iter_mut() {
        *channel = blend(mean, *channel, contrast);
    }

    Ok(frame)
}

/// Linear interpolation from `base` toward `value`, extrapolating when
/// `alpha` lies outside `[0, 1]`.
fn blend(base: f32, value: u8, alpha: f32) -> u8 {
    let out = base + alpha * (f32::from(value) - base);
    if out <= 0.0 {
        0
    } else if out >= 255.0 {
        255
    } else {
        out as u8
    }
}

/// Rounded mean of the ITU-R 601 luma of every pixel.
fn mean_luma(image: &RgbImage) -> u8 {
    let count = u64::from(image.width()) * u64::from(image.height());
    if count == 0 {
        return 0;
    }

    let total: u64 = image
        .pixels()
        .map(|pixel| {
            let [r, g, b] = pixel.0;
            (u32::from(r) * 19_595 + u32::from(g) * 38_470 + u32::from(b) * 7_471 + 0x8000) >> 16
        })
        .map(u64::from)
        .sum();

    ((total as f64 / count as f64) + 0.5).floor().min(255.0) as u8
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;

    fn gradient(width: u32, height: u32) -> SourceImage {
        let pixels = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 17 % 256) as u8, (y * 29 % 256) as u8, ((x + y) * 7 % 256) as u8])
        });
        SourceImage::new(pixels).unwrap()
    }

    fn factors(brightness: f64, contrast: f64) -> ModulationFactors {
        ModulationFactors {
            brightness,
            contrast,
        }
    }

    #[test]
    fn identity_factors_reproduce_the_source() {
        let source = gradient(8, 6);
        let frame = synthesize(&source, ModulationFactors::IDENTITY).unwrap();
        assert_eq!(&frame, source.pixels());
    }

    #[test]
    fn source_is_untouched_by_synthesis() {
        let source = gradient(16, 9);
        let before = source.pixels().as_raw().clone();
        for step in 0..5 {
            let value = step as f64 * 0.7 - 1.0;
            let _ = synthesize(&source, factors(value + 2.0, value)).unwrap();
        }
        assert_eq!(source.pixels().as_raw(), &before);
    }

    #[test]
    fn brightness_scales_and_clamps() {
        let source = SourceImage::new(RgbImage::from_pixel(2, 2, Rgb([100, 200, 10]))).unwrap();
        let frame = synthesize(&source, factors(1.5, 1.0)).unwrap();
        assert_eq!(frame.get_pixel(0, 0), &Rgb([150, 255, 15]));

        let dark = synthesize(&source, factors(-0.5, 1.0)).unwrap();
        assert_eq!(dark.get_pixel(1, 1), &Rgb([0, 0, 0]));
    }

    #[test]
    fn contrast_pushes_away_from_mean_luma() {
        let mut pixels = RgbImage::from_pixel(2, 1, Rgb([50, 50, 50]));
        pixels.put_pixel(1, 0, Rgb([150, 150, 150]));
        let source = SourceImage::new(pixels).unwrap();

        // Mean luma is 100.
        let frame = synthesize(&source, factors(1.0, 2.0)).unwrap();
        assert_eq!(frame.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(frame.get_pixel(1, 0), &Rgb([200, 200, 200]));

        let flat = synthesize(&source, factors(1.0, 0.0)).unwrap();
        assert!(flat.pixels().all(|p| p == &Rgb([100, 100, 100])));
    }

    #[test]
    fn brightness_is_applied_before_contrast() {
        let mut pixels = RgbImage::from_pixel(2, 1, Rgb([40, 40, 40]));
        pixels.put_pixel(1, 0, Rgb([200, 200, 200]));
        let source = SourceImage::new(pixels).unwrap();

        // Brightness 2 saturates the bright pixel at 255 before contrast sees
        // it; the mean is then (80 + 255) / 2 rounded = 168.
        let frame = synthesize(&source, factors(2.0, 0.5)).unwrap();
        assert_eq!(frame.get_pixel(0, 0), &Rgb([124, 124, 124]));
        assert_eq!(frame.get_pixel(1, 0), &Rgb([211, 211, 211]));
    }

    #[test]
    fn non_finite_factors_are_rejected() {
        let source = gradient(2, 2);
        assert!(synthesize(&source, factors(f64::NAN, 1.0)).is_err());
        assert!(synthesize(&source, factors(1.0, f64::INFINITY)).is_err());
    }

    #[test]
    fn downscale_halves_each_side() {
        let source = gradient(101, 40);
        let small = source.downscaled(2).unwrap();
        assert_eq!(small.dimensions(), (50, 20));
    }

    #[test]
    fn downscale_rejects_degenerate_results() {
        let source = gradient(1, 7);
        let err = source.downscaled(2).unwrap_err();
        assert!(matches!(err, PulseError::InvalidImage(_)));
        assert!(source.downscaled(0).is_err());
    }

    #[test]
    fn empty_images_are_invalid() {
        assert!(SourceImage::new(RgbImage::new(0, 4)).is_err());
    }

    #[test]
    fn opens_and_downscales_png_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cover.png");
        gradient(64, 48).pixels().save(&path).unwrap();

        let source = SourceImage::open(&path, 2).unwrap();
        assert_eq!(source.dimensions(), (32, 24));
    }

    #[test]
    fn unreadable_images_are_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not a png").unwrap();
        assert!(matches!(
            SourceImage::open(&path, 2),
            Err(PulseError::InvalidImage(_))
        ));
    }
}
