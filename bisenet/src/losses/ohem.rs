//! Online hard example mining cross entropy.
//!
//! Per-pixel cross entropy where only the hardest pixels contribute: every pixel whose
//! loss exceeds `-ln(score_threshold)` when there are more than `n_min` of them,
//! otherwise the `n_min` largest losses.

use burn::{
    prelude::*,
    tensor::{activation::log_softmax, ElementConversion},
};

/// Configuration to create an [OHEM cross entropy loss](OhemCrossEntropyLoss).
#[derive(Config, Debug)]
pub struct OhemCrossEntropyLossConfig {
    /// Minimum number of pixels averaged per batch.
    pub n_min: usize,
    /// Predicted probability of the true class under which a pixel counts as hard.
    #[config(default = 0.7)]
    pub score_threshold: f64,
    /// Label excluded from the loss.
    #[config(default = 255)]
    pub ignore_index: usize,
}

impl OhemCrossEntropyLossConfig {
    pub fn init(&self) -> OhemCrossEntropyLoss {
        assert!(
            self.score_threshold > 0.0 && self.score_threshold <= 1.0,
            "Score threshold must be in (0, 1]"
        );

        OhemCrossEntropyLoss {
            threshold: -self.score_threshold.ln(),
            n_min: self.n_min,
            ignore_index: self.ignore_index,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OhemCrossEntropyLoss {
    threshold: f64,
    n_min: usize,
    ignore_index: usize,
}

impl OhemCrossEntropyLoss {
    /// Loss threshold, `-ln(score_threshold)`.
    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    /// # Shapes
    ///   - logits: `[batch_size, n_classes, height, width]`
    ///   - labels: `[batch_size, height, width]`
    ///   - output: `[1]`
    pub fn forward<B: Backend>(&self, logits: Tensor<B, 4>, labels: Tensor<B, 3, Int>) -> Tensor<B, 1> {
        let pixel_loss = self.pixel_loss(logits, labels);
        let num_pixels = pixel_loss.dims()[0];

        let (sorted, indices) = pixel_loss
            .clone()
            .detach()
            .sort_descending_with_indices(0);

        let keep = if num_pixels <= self.n_min {
            num_pixels
        } else {
            let pivot = sorted
                .clone()
                .slice([self.n_min..self.n_min + 1])
                .into_scalar()
                .elem::<f64>();

            if pivot > self.threshold {
                sorted
                    .greater_elem(self.threshold)
                    .int()
                    .sum()
                    .into_scalar()
                    .elem::<i64>() as usize
            } else {
                self.n_min
            }
        };

        pixel_loss
            .select(0, indices.slice([0..keep.max(1)]))
            .mean()
    }

    /// Unreduced cross entropy, flattened; ignored pixels are zero.
    pub fn pixel_loss<B: Backend>(&self, logits: Tensor<B, 4>, labels: Tensor<B, 3, Int>) -> Tensor<B, 1> {
        let [n, c, h, w] = logits.dims();
        let ignored = labels.clone().equal_elem(self.ignore_index as i64);
        let targets = labels
            .mask_fill(ignored.clone(), 0)
            .unsqueeze_dim::<4>(1)
            .repeat_dim(1, c);

        // One-hot selection keeps the backward a plain multiplication.
        let classes = Tensor::<B, 1, Int>::arange(0..c as i64, &targets.device())
            .reshape([1, c, 1, 1])
            .repeat_dim(0, n)
            .repeat_dim(2, h)
            .repeat_dim(3, w);
        let one_hot = classes.equal(targets).float();

        let log_probs = log_softmax(logits, 1);
        let nll = (log_probs * one_hot).sum_dim(1).squeeze::<3>(1).neg();

        nll.mask_fill(ignored, 0.0).flatten::<1>(0, 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::{Autodiff, NdArray},
        tensor::TensorData,
    };

    type TestBackend = NdArray;

    fn labels(values: [i64; 4]) -> Tensor<TestBackend, 3, Int> {
        Tensor::from_data(TensorData::new(values.to_vec(), [1, 1, 4]), &Default::default())
    }

    #[test]
    fn ignored_pixels_have_zero_loss() {
        let device = Default::default();
        let loss = OhemCrossEntropyLossConfig::new(1).init();

        let logits = Tensor::<TestBackend, 4>::zeros([1, 2, 1, 4], &device);
        let pixel = loss.pixel_loss(logits, labels([0, 1, 255, 255]));

        let values = pixel.into_data().to_vec::<f32>().unwrap();
        let ln2 = core::f32::consts::LN_2;
        assert!((values[0] - ln2).abs() < 1e-5);
        assert!((values[1] - ln2).abs() < 1e-5);
        assert_eq!(&values[2..], &[0.0, 0.0]);
    }

    #[test]
    fn averages_hard_pixels_when_enough_exceed_threshold() {
        let device = Default::default();
        let loss = OhemCrossEntropyLossConfig::new(1).init();

        // Uniform logits give ln(2) > -ln(0.7) on both labelled pixels.
        let logits = Tensor::<TestBackend, 4>::zeros([1, 2, 1, 4], &device);
        let value = loss
            .forward(logits, labels([0, 1, 255, 255]))
            .into_scalar();

        assert!((value - core::f32::consts::LN_2).abs() < 1e-5);
    }

    #[test]
    fn falls_back_to_top_n_min_for_easy_batches() {
        let device = Default::default();
        let loss = OhemCrossEntropyLossConfig::new(2).init();

        // Confident, correct predictions with growing margins.
        let margins = [8.0f32, 6.0, 4.0, 2.0];
        let mut data = vec![0.0f32; 8];
        data[..4].copy_from_slice(&margins);
        let logits =
            Tensor::<TestBackend, 4>::from_data(TensorData::new(data, [1, 2, 1, 4]), &device);

        let value = loss.forward(logits, labels([0, 0, 0, 0])).into_scalar();

        // The two largest losses belong to the margins 2 and 4.
        let softplus = |m: f32| (1.0 + (-m).exp()).ln();
        let expected = (softplus(2.0) + softplus(4.0)) / 2.0;
        assert!(value < loss.threshold() as f32);
        assert!((value - expected).abs() < 1e-5, "{value} != {expected}");
    }

    #[test]
    fn gradients_flow_through_selected_pixels() {
        type AD = Autodiff<TestBackend>;
        let device = Default::default();
        let loss = OhemCrossEntropyLossConfig::new(1).init();

        let logits = Tensor::<AD, 4>::zeros([1, 2, 1, 4], &device).require_grad();
        let labels = Tensor::<AD, 3, Int>::from_data(
            TensorData::new(vec![0i64, 1, 255, 255], [1, 1, 4]),
            &device,
        );

        let grads = loss.forward(logits.clone(), labels).backward();
        let grad = logits.grad(&grads).unwrap();

        let values = grad.into_data().to_vec::<f32>().unwrap();
        // Layout [class][pixel]: ignored pixels 2 and 3 receive nothing.
        assert_eq!(values[2], 0.0);
        assert_eq!(values[3], 0.0);
        assert!(values[0] < 0.0);
        assert!(values[1] > 0.0);
    }

    #[test]
    fn backward_matches_softmax_minus_one_hot() {
        type AD = Autodiff<TestBackend>;
        let device = Default::default();
        // More pixels than n_min and uniform logits: every labelled pixel is kept.
        let loss = OhemCrossEntropyLossConfig::new(1).init();

        let logits = Tensor::<AD, 4>::zeros([2, 3, 2, 2], &device).require_grad();
        let labels = Tensor::<AD, 3, Int>::from_data(
            TensorData::new(vec![0i64, 1, 2, 0, 2, 1, 0, 255], [2, 2, 2]),
            &device,
        );

        let value = loss.forward(logits.clone(), labels.clone());
        assert!((value.clone().into_scalar() - 3.0f32.ln()).abs() < 1e-5);

        let grads = value.backward();
        let grad = logits.grad(&grads).unwrap();
        assert_eq!(grad.dims(), [2, 3, 2, 2]);

        // d/dz of the mean over 7 pixels: (1/3 - [class == label]) / 7.
        let values = grad.into_data().to_vec::<f32>().unwrap();
        let labels = labels.into_data().to_vec::<i64>().unwrap();
        for b in 0..2 {
            for class in 0..3 {
                for pixel in 0..4 {
                    let label = labels[b * 4 + pixel];
                    let expected = if label == 255 {
                        0.0
                    } else if label == class as i64 {
                        (1.0 / 3.0 - 1.0) / 7.0
                    } else {
                        1.0 / 3.0 / 7.0
                    };
                    let got = values[(b * 3 + class) * 4 + pixel];
                    assert!((got - expected).abs() < 1e-5, "{b} {class} {pixel}: {got}");
                }
            }
        }
    }
}
