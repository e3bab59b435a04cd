//! Multi-scale, sliding-window evaluation.
//!
//! Each image is resized to every scale, covered by overlapping `crop_size` windows
//! (zero padded when smaller), and the per-window class scores are accumulated, resized
//! back and summed over scales before the argmax.

use core::ops::Range;

use burn::{
    data::dataloader::DataLoaderBuilder,
    prelude::*,
    tensor::activation::softmax,
};
use serde::Serialize;

use super::confusion::ConfusionMatrix;
use crate::{
    dataset::{CityscapesBatcher, CityscapesDataset, CLASS_NAMES},
    error::BiSeNetResult,
    models::{resize_bilinear, BiSeNet},
};

/// Configuration of the [multi-scale evaluator](MscEval).
#[derive(Config, Debug)]
pub struct MscEvalConfig {
    #[config(default = "vec![0.75, 1.0, 1.25, 1.5, 1.75]")]
    pub scales: Vec<f32>,
    /// Also score the horizontally flipped window.
    #[config(default = true)]
    pub flip: bool,
    /// Square window side.
    #[config(default = 1024)]
    pub crop_size: usize,
    /// Window stride as a fraction of `crop_size`.
    #[config(default = "5.0 / 6.0")]
    pub stride_rate: f64,
    #[config(default = 2)]
    pub batch_size: usize,
    #[config(default = 2)]
    pub num_workers: usize,
}

/// IoU of one class.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassIou {
    pub name: String,
    /// `None` when the class is absent from both labels and predictions.
    pub iou: Option<f64>,
}

/// Evaluation results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalReport {
    pub images: usize,
    pub miou: f64,
    pub pixel_accuracy: f64,
    pub classes: Vec<ClassIou>,
}

impl EvalReport {
    pub fn from_confusion(confusion: &ConfusionMatrix, images: usize) -> Self {
        let classes = confusion
            .class_iou()
            .into_iter()
            .enumerate()
            .map(|(c, iou)| ClassIou {
                name: CLASS_NAMES
                    .get(c)
                    .map_or_else(|| format!("class {c}"), |n| (*n).to_string()),
                iou,
            })
            .collect();

        Self {
            images,
            miou: confusion.mean_iou(),
            pixel_accuracy: confusion.pixel_accuracy(),
            classes,
        }
    }
}

/// Multi-scale evaluator around an inference-mode model.
pub struct MscEval<'a, B: Backend> {
    model: &'a BiSeNet<B>,
    config: &'a MscEvalConfig,
}

impl<'a, B: Backend> MscEval<'a, B> {
    pub const fn new(model: &'a BiSeNet<B>, config: &'a MscEvalConfig) -> Self {
        Self { model, config }
    }

    /// Exponentiated class probabilities of one window, summed with its flip.
    fn eval_chip(&self, chip: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut prob = softmax(self.model.infer(chip.clone()), 1);
        if self.config.flip {
            let flipped = self.model.infer(chip.flip([3])).flip([3]);
            prob = prob + softmax(flipped, 1);
        }
        prob.exp()
    }

    /// Scores an image of any size, padding it up to the window where needed.
    fn crop_eval(&self, image: Tensor<B, 4>) -> Tensor<B, 4> {
        let crop = self.config.crop_size;
        let n_classes = self.model.n_classes();
        let [n, c, h, w] = image.dims();

        if h.max(w) < crop {
            let (padded, region) = pad(image, [crop, crop]);
            return crop_spatial(self.eval_chip(padded), region);
        }

        let padded_size = [h.max(crop), w.max(crop)];
        let (image, region) = if h < crop || w < crop {
            let (padded, region) = pad(image, padded_size);
            (padded, Some(region))
        } else {
            (image, None)
        };

        let [ph, pw] = padded_size;
        let stride = ((crop as f64 * self.config.stride_rate).ceil() as usize).max(1);
        let n_x = (pw - crop).div_ceil(stride) + 1;
        let n_y = (ph - crop).div_ceil(stride) + 1;

        let device = image.device();
        let mut prob = Tensor::<B, 4>::zeros([n, n_classes, ph, pw], &device);
        for iy in 0..n_y {
            for ix in 0..n_x {
                let h_end = ph.min(stride * iy + crop);
                let w_end = pw.min(stride * ix + crop);
                let (rows, cols) = (h_end - crop..h_end, w_end - crop..w_end);

                let chip = image.clone().slice([0..n, 0..c, rows.clone(), cols.clone()]);
                let chip_prob = self.eval_chip(chip);

                let target = [0..n, 0..n_classes, rows, cols];
                let current = prob.clone().slice(target.clone());
                prob = prob.slice_assign(target, current + chip_prob);
            }
        }

        match region {
            Some(region) => crop_spatial(prob, region),
            None => prob,
        }
    }

    fn scale_crop_eval(&self, image: Tensor<B, 4>, scale: f32) -> Tensor<B, 4> {
        let [_, _, h, w] = image.dims();
        let scaled = [
            ((h as f32 * scale) as usize).max(1),
            ((w as f32 * scale) as usize).max(1),
        ];

        let image = resize_bilinear(image, scaled);
        resize_bilinear(self.crop_eval(image), [h, w])
    }

    /// Accumulated class scores over all scales, `[N, n_classes, H, W]`.
    pub fn scores(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let [n, _, h, w] = images.dims();
        let device = images.device();

        self.config.scales.iter().fold(
            Tensor::zeros([n, self.model.n_classes(), h, w], &device),
            |acc, &scale| acc + self.scale_crop_eval(images.clone(), scale),
        )
    }

    /// Predicted train ids, `[N, H, W]`.
    pub fn predict(&self, images: Tensor<B, 4>) -> Tensor<B, 3, Int> {
        self.scores(images).argmax(1).squeeze::<3>(1)
    }
}

type Region = [Range<usize>; 2];

/// Centers `x` in a zero tensor of spatial `size`, returning the rows and columns it
/// occupies.
fn pad<B: Backend>(x: Tensor<B, 4>, [th, tw]: [usize; 2]) -> (Tensor<B, 4>, Region) {
    let [n, c, h, w] = x.dims();
    let (top, left) = ((th - h) / 2, (tw - w) / 2);
    let region = [top..top + h, left..left + w];

    let padded = Tensor::zeros([n, c, th, tw], &x.device()).slice_assign(
        [0..n, 0..c, region[0].clone(), region[1].clone()],
        x,
    );

    (padded, region)
}

fn crop_spatial<B: Backend>(x: Tensor<B, 4>, [rows, cols]: Region) -> Tensor<B, 4> {
    let [n, c, _, _] = x.dims();
    x.slice([0..n, 0..c, rows, cols])
}

/// Scores `dataset` with multi-scale sliding-window inference.
pub fn evaluate<B: Backend>(
    model: &BiSeNet<B>,
    dataset: CityscapesDataset,
    config: &MscEvalConfig,
    device: &B::Device,
) -> BiSeNetResult<EvalReport> {
    let total = dataset.samples().len();
    let builder = DataLoaderBuilder::<B, _, _>::new(CityscapesBatcher::new())
        .batch_size(config.batch_size.max(1))
        .set_device(device.clone());
    let builder = match config.num_workers {
        0 => builder,
        workers => builder.num_workers(workers),
    };
    let loader = builder.build(dataset);

    let evaluator = MscEval::new(model, config);
    let mut confusion = ConfusionMatrix::new(model.n_classes());
    let mut images = 0;

    tracing::info!(images = total, scales = ?config.scales, flip = config.flip, "evaluating");

    for (i, batch) in loader.iter().enumerate() {
        images += batch.len();
        let preds = evaluator.predict(batch.images);
        confusion.update(preds, batch.labels)?;
        tracing::debug!(batch = i + 1, images, total, "evaluated batch");
    }

    let report = EvalReport::from_confusion(&confusion, images);
    tracing::info!("mIOU is: {:.6}", report.miou);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::Distribution};

    use crate::{
        config::Split,
        dataset::{fake_cityscapes, CityscapesConfig},
        models::BiSeNetConfig,
    };

    type TestBackend = NdArray;

    fn config(crop_size: usize) -> MscEvalConfig {
        MscEvalConfig::new()
            .with_scales(vec![0.5, 1.0])
            .with_crop_size(crop_size)
            .with_num_workers(0)
    }

    #[test]
    fn pad_centers_input() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::ones([1, 1, 2, 2], &device);
        let (padded, region) = pad(x, [4, 6]);

        assert_eq!(padded.dims(), [1, 1, 4, 6]);
        assert_eq!(region, [1..3, 2..4]);
        assert_eq!(padded.clone().sum().into_scalar(), 4.0);

        let inner = crop_spatial(padded, region);
        assert_eq!(inner.dims(), [1, 1, 2, 2]);
        assert_eq!(inner.sum().into_scalar(), 4.0);
    }

    #[test]
    fn sliding_and_padded_paths_keep_resolution() {
        let device = Default::default();
        let model = BiSeNetConfig::new().with_n_classes(4).init::<TestBackend>(&device);

        // Wide image: windows slide along the width, height gets padded.
        let cfg = config(32);
        let eval = MscEval::new(&model, &cfg);
        let x = Tensor::random([1, 3, 24, 80], Distribution::Normal(0.0, 1.0), &device);
        assert_eq!(eval.scores(x.clone()).dims(), [1, 4, 24, 80]);

        // Small image: a single padded window.
        let cfg = config(128);
        let eval = MscEval::new(&model, &cfg);
        assert_eq!(eval.predict(x).dims(), [1, 24, 80]);
    }

    #[test]
    fn overlapping_windows_accumulate() {
        let device = Default::default();
        let model = BiSeNetConfig::new().with_n_classes(2).init::<TestBackend>(&device);
        let cfg = config(32).with_scales(vec![1.0]).with_flip(false);
        let eval = MscEval::new(&model, &cfg);

        let x = Tensor::random([1, 3, 32, 64], Distribution::Normal(0.0, 1.0), &device);
        let scores = eval.scores(x);

        // Stride 27 puts windows at 0, 27 and 32: column 0 is covered once and column 30
        // twice. One window adds exp(p) + exp(1 - p), between 2 * e^0.5 and 1 + e.
        let (low, high) = (2.0 * 0.5f32.exp(), 1.0 + core::f32::consts::E);
        let col0 = scores.clone().slice([0..1, 0..2, 0..1, 0..1]).sum().into_scalar();
        let col30 = scores.slice([0..1, 0..2, 0..1, 30..31]).sum().into_scalar();
        assert!(col0 >= low - 1e-4 && col0 <= high + 1e-4, "{col0}");
        assert!(col30 >= 2.0 * low - 1e-4 && col30 <= 2.0 * high + 1e-4, "{col30}");
    }

    #[test]
    fn evaluates_a_dataset() {
        let data = fake_cityscapes("val", 1, (40, 24));
        let device = Default::default();
        let model = BiSeNetConfig::new().init::<TestBackend>(&device);
        let dataset = CityscapesDataset::new(
            &CityscapesConfig::new().with_root(data.path().to_path_buf()),
            &Split::Val,
        )
        .unwrap();

        let report = evaluate(&model, dataset, &config(32), &device).unwrap();

        assert_eq!(report.images, 2);
        assert_eq!(report.classes.len(), 19);
        assert_eq!(report.classes[0].name, "road");
        assert!((0.0..=1.0).contains(&report.miou));
        // Road and sky are labelled, so both have a defined IoU.
        assert!(report.classes[0].iou.is_some());
        assert!(report.classes[10].iou.is_some());
    }
}
