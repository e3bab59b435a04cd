//! Loss functions for BiSeNet training.

mod ohem;

pub use ohem::{OhemCrossEntropyLoss, OhemCrossEntropyLossConfig};

use burn::prelude::*;

use crate::models::BiSeNetOutput;

/// Deep-supervision loss: one OHEM criterion per head, summed.
#[derive(Debug, Clone)]
pub struct BiSeNetLoss {
    main: OhemCrossEntropyLoss,
    aux16: OhemCrossEntropyLoss,
    aux32: OhemCrossEntropyLoss,
}

/// Per-head loss terms and their sum.
#[derive(Debug, Clone)]
pub struct BiSeNetLossOutput<B: Backend> {
    pub total: Tensor<B, 1>,
    pub main: Tensor<B, 1>,
    pub aux16: Tensor<B, 1>,
    pub aux32: Tensor<B, 1>,
}

impl BiSeNetLoss {
    pub fn new(config: &OhemCrossEntropyLossConfig) -> Self {
        Self {
            main: config.init(),
            aux16: config.init(),
            aux32: config.init(),
        }
    }

    pub fn forward<B: Backend>(
        &self,
        output: BiSeNetOutput<B>,
        labels: Tensor<B, 3, Int>,
    ) -> BiSeNetLossOutput<B> {
        let main = self.main.forward(output.main, labels.clone());
        let aux16 = self.aux16.forward(output.aux16, labels.clone());
        let aux32 = self.aux32.forward(output.aux32, labels);

        BiSeNetLossOutput {
            total: main.clone() + aux16.clone() + aux32.clone(),
            main,
            aux16,
            aux32,
        }
    }
}
