//! Joint image/label augmentation for Cityscapes training.
//!
//! Applied in order: color jitter on the image, horizontal flip, random rescale and a
//! random crop. Geometric transforms are applied identically to the label, which is
//! always resampled with nearest neighbour so train ids are never blended.

use image::{
    imageops::{self, FilterType},
    GrayImage, Rgb, RgbImage,
};
use rand::{seq::IndexedRandom, Rng};

/// Random photometric and geometric transforms of a training pair.
#[derive(Debug, Clone)]
pub struct Augmentation {
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub scales: Vec<f32>,
    /// Output `[height, width]`.
    pub crop_size: [u32; 2],
}

impl Augmentation {
    pub fn apply<R: Rng + ?Sized>(
        &self,
        image: RgbImage,
        label: GrayImage,
        rng: &mut R,
    ) -> (RgbImage, GrayImage) {
        let image = color_jitter(
            image,
            jitter_factor(self.brightness, rng),
            jitter_factor(self.contrast, rng),
            jitter_factor(self.saturation, rng),
        );

        let (image, label) = if rng.random_bool(0.5) {
            horizontal_flip(image, label)
        } else {
            (image, label)
        };

        let scale = self.scales.choose(rng).copied().unwrap_or(1.0);
        let (image, label) = rescale(image, label, scale);

        random_crop(image, label, self.crop_size, rng)
    }
}

fn jitter_factor<R: Rng + ?Sized>(amount: f32, rng: &mut R) -> f32 {
    if amount <= 0.0 {
        return 1.0;
    }
    rng.random_range((1.0 - amount).max(0.0)..=1.0 + amount)
}

fn luma(pixel: &Rgb<u8>) -> f32 {
    let [r, g, b] = pixel.0;
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}

fn blend(degenerate: f32, value: f32, factor: f32) -> f32 {
    degenerate + factor * (value - degenerate)
}

/// Brightness, contrast and saturation enhancement, each a blend with a degenerate
/// image: black, the mean grey level and the per-pixel greyscale respectively.
pub fn color_jitter(
    mut image: RgbImage,
    brightness: f32,
    contrast: f32,
    saturation: f32,
) -> RgbImage {
    let num_pixels = (image.width() as usize * image.height() as usize).max(1);

    for pixel in image.pixels_mut() {
        for c in pixel.0.iter_mut() {
            *c = (*c as f32 * brightness).round().clamp(0.0, 255.0) as u8;
        }
    }

    let mean = (image.pixels().map(luma).sum::<f32>() / num_pixels as f32).round();
    for pixel in image.pixels_mut() {
        for c in pixel.0.iter_mut() {
            *c = blend(mean, *c as f32, contrast).round().clamp(0.0, 255.0) as u8;
        }
    }

    for pixel in image.pixels_mut() {
        let grey = luma(pixel).round();
        for c in pixel.0.iter_mut() {
            *c = blend(grey, *c as f32, saturation).round().clamp(0.0, 255.0) as u8;
        }
    }

    image
}

pub fn horizontal_flip(image: RgbImage, label: GrayImage) -> (RgbImage, GrayImage) {
    (imageops::flip_horizontal(&image), imageops::flip_horizontal(&label))
}

/// Resizes both images by `scale`, truncating the new size.
pub fn rescale(image: RgbImage, label: GrayImage, scale: f32) -> (RgbImage, GrayImage) {
    if (scale - 1.0).abs() < f32::EPSILON {
        return (image, label);
    }
    let width = ((image.width() as f32 * scale) as u32).max(1);
    let height = ((image.height() as f32 * scale) as u32).max(1);
    resize_pair(image, label, width, height)
}

fn resize_pair(
    image: RgbImage,
    label: GrayImage,
    width: u32,
    height: u32,
) -> (RgbImage, GrayImage) {
    (
        imageops::resize(&image, width, height, FilterType::Triangle),
        imageops::resize(&label, width, height, FilterType::Nearest),
    )
}

/// Crops a random `[height, width]` window.
///
/// Pairs smaller than the crop on either side are first upscaled, keeping the aspect
/// ratio, until both sides cover it.
pub fn random_crop<R: Rng + ?Sized>(
    image: RgbImage,
    label: GrayImage,
    [crop_h, crop_w]: [u32; 2],
    rng: &mut R,
) -> (RgbImage, GrayImage) {
    let (w, h) = image.dimensions();
    if (w, h) == (crop_w, crop_h) {
        return (image, label);
    }

    let (image, label) = if w < crop_w || h < crop_h {
        let scale = (crop_w as f32 / w as f32).max(crop_h as f32 / h as f32);
        let width = (scale * w as f32 + 1.0) as u32;
        let height = (scale * h as f32 + 1.0) as u32;
        resize_pair(image, label, width, height)
    } else {
        (image, label)
    };

    let (w, h) = image.dimensions();
    let x = (rng.random::<f32>() * w.saturating_sub(crop_w) as f32) as u32;
    let y = (rng.random::<f32>() * h.saturating_sub(crop_h) as f32) as u32;

    (
        imageops::crop_imm(&image, x, y, crop_w, crop_h).to_image(),
        imageops::crop_imm(&label, x, y, crop_w, crop_h).to_image(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use rand::{rngs::StdRng, SeedableRng};

    fn gradient(width: u32, height: u32) -> (RgbImage, GrayImage) {
        let image = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let label = GrayImage::from_fn(width, height, |x, _| Luma([(x % 19) as u8]));
        (image, label)
    }

    #[test]
    fn identity_jitter_keeps_pixels() {
        let (image, _) = gradient(8, 4);
        let jittered = color_jitter(image.clone(), 1.0, 1.0, 1.0);
        assert_eq!(jittered, image);
    }

    #[test]
    fn zero_saturation_gives_greyscale() {
        let (image, _) = gradient(8, 4);
        let grey = color_jitter(image, 1.0, 1.0, 0.0);
        for pixel in grey.pixels() {
            let [r, g, b] = pixel.0;
            assert!(r == g && g == b, "{:?}", pixel.0);
        }
    }

    #[test]
    fn zero_brightness_gives_black() {
        let (image, _) = gradient(8, 4);
        let black = color_jitter(image, 0.0, 1.0, 1.0);
        assert!(black.pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn flip_mirrors_label_columns() {
        let (image, label) = gradient(5, 2);
        let (_, flipped) = horizontal_flip(image, label.clone());
        assert_eq!(flipped.get_pixel(0, 0), label.get_pixel(4, 0));
        assert_eq!(flipped.get_pixel(4, 1), label.get_pixel(0, 1));
    }

    #[test]
    fn rescale_keeps_label_values_discrete() {
        let (image, label) = gradient(20, 10);
        let (image, label) = rescale(image, label, 1.75);
        assert_eq!(image.dimensions(), (35, 17));
        assert_eq!(label.dimensions(), (35, 17));
        assert!(label.pixels().all(|p| p.0[0] < 19));
    }

    #[test]
    fn crop_outputs_requested_size() {
        let mut rng = StdRng::seed_from_u64(7);
        let (image, label) = gradient(40, 30);
        let (image, label) = random_crop(image, label, [16, 24], &mut rng);
        assert_eq!(image.dimensions(), (24, 16));
        assert_eq!(label.dimensions(), (24, 16));
    }

    #[test]
    fn crop_upscales_small_inputs() {
        let mut rng = StdRng::seed_from_u64(7);
        let (image, label) = gradient(10, 20);
        let (image, label) = random_crop(image, label, [32, 32], &mut rng);
        assert_eq!(image.dimensions(), (32, 32));
        assert_eq!(label.dimensions(), (32, 32));
    }

    #[test]
    fn crop_upscales_until_both_sides_fit() {
        let mut rng = StdRng::seed_from_u64(7);
        // Wide input, tall crop: the width already fits but the height needs x3.2.
        let (image, label) = gradient(20, 10);
        let (image, label) = random_crop(image, label, [32, 8], &mut rng);
        assert_eq!(image.dimensions(), (8, 32));
        assert_eq!(label.dimensions(), (8, 32));

        // Tall input, wide crop.
        let (image, label) = gradient(10, 20);
        let (image, label) = random_crop(image, label, [8, 32], &mut rng);
        assert_eq!(image.dimensions(), (32, 8));
        assert_eq!(label.dimensions(), (32, 8));
    }

    #[test]
    fn full_pipeline_outputs_crop() {
        let mut rng = StdRng::seed_from_u64(42);
        let augmentation = Augmentation {
            brightness: 0.5,
            contrast: 0.5,
            saturation: 0.5,
            scales: vec![0.75, 1.0, 1.25, 1.5, 1.75, 2.0],
            crop_size: [24, 32],
        };
        let (image, label) = gradient(64, 32);

        for _ in 0..4 {
            let (i, l) = augmentation.apply(image.clone(), label.clone(), &mut rng);
            assert_eq!(i.dimensions(), (32, 24));
            assert_eq!(l.dimensions(), (32, 24));
        }
    }
}
