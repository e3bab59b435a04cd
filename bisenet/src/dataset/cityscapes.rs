//! Cityscapes fine-annotation dataset.

use std::path::{Path, PathBuf};

use burn::{data::dataset::Dataset, prelude::*};
use image::{GrayImage, RgbImage};
use walkdir::WalkDir;

use super::{augmentation::Augmentation, labels::label_id_to_train_id};
use crate::{
    config::Split,
    error::{DatasetError, DatasetResult},
};

const IMAGE_SUFFIX: &str = "_leftImg8bit.png";
const LABEL_SUFFIX: &str = "_gtFine_labelIds.png";

/// Configuration to create a [Cityscapes dataset](CityscapesDataset).
#[derive(Config, Debug)]
pub struct CityscapesConfig {
    /// Directory holding `leftImg8bit/` and `gtFine/`.
    #[config(default = "PathBuf::from(\"./data\")")]
    pub root: PathBuf,
    /// Training crop `[height, width]`.
    #[config(default = "[1024, 1024]")]
    pub crop_size: [usize; 2],
    /// Candidate rescale factors for training.
    #[config(default = "vec![0.75, 1.0, 1.25, 1.5, 1.75, 2.0]")]
    pub scales: Vec<f32>,
    #[config(default = 0.5)]
    pub brightness: f32,
    #[config(default = 0.5)]
    pub contrast: f32,
    #[config(default = 0.5)]
    pub saturation: f32,
    /// Per-channel normalization mean (ImageNet).
    #[config(default = "[0.485, 0.456, 0.406]")]
    pub mean: [f32; 3],
    /// Per-channel normalization std (ImageNet).
    #[config(default = "[0.229, 0.224, 0.225]")]
    pub std: [f32; 3],
}

/// A decoded, normalized sample, independent of any device.
#[derive(Debug, Clone)]
pub struct CityscapesItem {
    /// Normalized pixels in `[3, height, width]` order.
    pub image: Vec<f32>,
    /// Train ids in `[height, width]` order.
    pub label: Vec<i64>,
    pub height: usize,
    pub width: usize,
}

/// One image file and its `labelIds` annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CityscapesSample {
    pub image: PathBuf,
    pub label: PathBuf,
}

#[derive(Debug)]
pub struct CityscapesDataset {
    samples: Vec<CityscapesSample>,
    augmentation: Option<Augmentation>,
    mean: [f32; 3],
    std: [f32; 3],
}

impl CityscapesDataset {
    /// Index a split; the training split is augmented.
    pub fn new(config: &CityscapesConfig, split: &Split) -> DatasetResult<Self> {
        let samples = Self::collect_samples(&config.root, split)?;

        tracing::info!(
            split = %split,
            samples = samples.len(),
            root = %config.root.display(),
            "indexed cityscapes split"
        );

        let augmentation = (*split == Split::Train).then(|| Augmentation {
            brightness: config.brightness,
            contrast: config.contrast,
            saturation: config.saturation,
            scales: config.scales.clone(),
            crop_size: [config.crop_size[0] as u32, config.crop_size[1] as u32],
        });

        Ok(Self {
            samples,
            augmentation,
            mean: config.mean,
            std: config.std,
        })
    }

    /// Pair every `<split>/<city>/*_leftImg8bit.png` with its fine annotation.
    fn collect_samples(root: &Path, split: &Split) -> DatasetResult<Vec<CityscapesSample>> {
        let image_root = root.join("leftImg8bit").join(split.dir_name());
        let label_root = root.join("gtFine").join(split.dir_name());

        if !image_root.is_dir() {
            return Err(DatasetError::ImageDirectoryNotFound { path: image_root });
        }

        let mut samples = Vec::new();
        for entry in WalkDir::new(&image_root).min_depth(2).max_depth(2) {
            let entry = entry.map_err(|source| DatasetError::DirectoryReadFailed {
                path: image_root.clone(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let image = entry.into_path();
            let Some(name) = image.file_name().and_then(|n| n.to_str()) else {
                return Err(DatasetError::InvalidFileName { path: image });
            };
            let Some(stem) = name.strip_suffix(IMAGE_SUFFIX) else {
                continue;
            };
            let Some(city) = image.parent().and_then(Path::file_name) else {
                return Err(DatasetError::InvalidFileName { path: image });
            };

            let label = label_root.join(city).join(format!("{stem}{LABEL_SUFFIX}"));
            if !label.is_file() {
                return Err(DatasetError::MissingLabel {
                    image,
                    expected: label,
                });
            }

            samples.push(CityscapesSample { image, label });
        }

        if samples.is_empty() {
            return Err(DatasetError::NoValidPairs { path: image_root });
        }

        samples.sort_by(|a, b| a.image.cmp(&b.image));
        Ok(samples)
    }

    pub fn samples(&self) -> &[CityscapesSample] {
        &self.samples
    }

    pub const fn is_augmented(&self) -> bool {
        self.augmentation.is_some()
    }

    /// Decode, map, augment and normalize one sample.
    pub fn load(&self, index: usize) -> DatasetResult<Option<CityscapesItem>> {
        let Some(sample) = self.samples.get(index) else {
            return Ok(None);
        };

        let image = open(&sample.image)?.to_rgb8();
        let mut label = open(&sample.label)?.to_luma8();

        if image.dimensions() != label.dimensions() {
            return Err(DatasetError::SizeMismatch {
                path: sample.image.clone(),
                image: image.dimensions(),
                label: label.dimensions(),
            });
        }

        for pixel in label.pixels_mut() {
            pixel.0[0] = label_id_to_train_id(pixel.0[0]);
        }

        let (image, label) = match &self.augmentation {
            Some(augmentation) => augmentation.apply(image, label, &mut rand::rng()),
            None => (image, label),
        };

        Ok(Some(self.to_item(&image, &label)))
    }

    fn to_item(&self, image: &RgbImage, label: &GrayImage) -> CityscapesItem {
        let (width, height) = image.dimensions();
        let (width, height) = (width as usize, height as usize);
        let plane = width * height;

        let mut pixels = vec![0.0f32; 3 * plane];
        for (i, pixel) in image.pixels().enumerate() {
            for c in 0..3 {
                let value = pixel.0[c] as f32 / 255.0;
                pixels[c * plane + i] = (value - self.mean[c]) / self.std[c];
            }
        }

        CityscapesItem {
            image: pixels,
            label: label.as_raw().iter().map(|&v| v as i64).collect(),
            height,
            width,
        }
    }
}

fn open(path: &Path) -> DatasetResult<image::DynamicImage> {
    image::open(path).map_err(|source| DatasetError::ImageOpenFailed {
        path: path.to_path_buf(),
        source,
    })
}

impl Dataset<CityscapesItem> for CityscapesDataset {
    fn get(&self, index: usize) -> Option<CityscapesItem> {
        self.load(index).unwrap_or_else(|e| {
            tracing::warn!(index, error = %e, "skipping unreadable sample");
            None
        })
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}
