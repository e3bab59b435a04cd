use burn::prelude::*;

use crate::error::{BiSeNetError, BiSeNetResult};

/// Pixel confusion counts, rows indexed by label and columns by prediction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    n_classes: usize,
    counts: Vec<u64>,
}

impl ConfusionMatrix {
    pub fn new(n_classes: usize) -> Self {
        Self {
            n_classes,
            counts: vec![0; n_classes * n_classes],
        }
    }

    pub const fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn get(&self, label: usize, pred: usize) -> u64 {
        self.counts[label * self.n_classes + pred]
    }

    /// Counts every pixel whose label is a valid class; other labels, including the
    /// ignore index, are skipped.
    pub fn update_slices(&mut self, preds: &[i64], labels: &[i64]) {
        let n = self.n_classes as i64;
        for (&pred, &label) in preds.iter().zip(labels) {
            if (0..n).contains(&label) && (0..n).contains(&pred) {
                self.counts[(label * n + pred) as usize] += 1;
            }
        }
    }

    /// # Shapes
    ///   - preds: `[batch_size, height, width]`
    ///   - labels: `[batch_size, height, width]`
    pub fn update<B: Backend>(
        &mut self,
        preds: Tensor<B, 3, Int>,
        labels: Tensor<B, 3, Int>,
    ) -> BiSeNetResult<()> {
        if preds.dims() != labels.dims() {
            return Err(BiSeNetError::EvaluationData {
                reason: format!(
                    "predictions {:?} and labels {:?} differ in shape",
                    preds.dims(),
                    labels.dims()
                ),
            });
        }

        let to_vec = |t: Tensor<B, 3, Int>| {
            t.into_data()
                .convert::<i64>()
                .to_vec::<i64>()
                .map_err(|e| BiSeNetError::EvaluationData {
                    reason: format!("{e:?}"),
                })
        };
        self.update_slices(&to_vec(preds)?, &to_vec(labels)?);
        Ok(())
    }

    pub fn merge(&mut self, other: &Self) {
        debug_assert_eq!(self.n_classes, other.n_classes);
        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            *a += b;
        }
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Intersection over union per class; `None` when the class never occurs in
    /// either labels or predictions.
    pub fn class_iou(&self) -> Vec<Option<f64>> {
        (0..self.n_classes)
            .map(|c| {
                let tp = self.get(c, c);
                let label_total: u64 = (0..self.n_classes).map(|p| self.get(c, p)).sum();
                let pred_total: u64 = (0..self.n_classes).map(|l| self.get(l, c)).sum();
                let union = label_total + pred_total - tp;
                (union > 0).then(|| tp as f64 / union as f64)
            })
            .collect()
    }

    /// Mean of the defined class IoUs.
    pub fn mean_iou(&self) -> f64 {
        let ious: Vec<f64> = self.class_iou().into_iter().flatten().collect();
        if ious.is_empty() {
            0.0
        } else {
            ious.iter().sum::<f64>() / ious.len() as f64
        }
    }

    pub fn pixel_accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let correct: u64 = (0..self.n_classes).map(|c| self.get(c, c)).sum();
        correct as f64 / total as f64
    }
}
