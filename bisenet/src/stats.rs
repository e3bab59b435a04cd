//! Model complexity statistics.

use std::fmt;

use burn::prelude::*;

use crate::models::BiSeNet;

/// Parameter and operation counts for a given input size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelStats {
    pub params: usize,
    /// Multiply-accumulates of one forward pass over the whole batch.
    pub macs: u64,
    /// `[batch, channels, height, width]`
    pub input: [usize; 4],
}

impl ModelStats {
    /// Counts convolution MACs for an RGB `[batch, 3, height, width]` input.
    pub fn measure<B: Backend>(model: &BiSeNet<B>, input: [usize; 4]) -> Self {
        let [batch, _, height, width] = input;
        Self {
            params: model.num_params(),
            macs: batch as u64 * model.macs([height, width]),
            input,
        }
    }

    pub fn gmac(&self) -> f64 {
        self.macs as f64 / 1e9
    }

    /// One MAC counts as two floating point operations.
    pub fn gflops(&self) -> f64 {
        2.0 * self.gmac()
    }
}

impl fmt::Display for ModelStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GFlops : {:.2} GMAC : {:.2}", self.gflops(), self.gmac())
    }
}
