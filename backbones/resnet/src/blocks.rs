//! ResNet block implementations.
//!
//! This module contains the building blocks for ResNet-18/34: BasicBlock, Downsample and LayerBlock.

use core::f64::consts::SQRT_2;

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d, Relu,
    },
    prelude::*,
};

use crate::{conv_macs, conv_out_size};

pub(crate) fn kaiming_fan_out() -> Initializer {
    Initializer::KaimingNormal {
        gain: SQRT_2,
        fan_out_only: true,
    }
}

/// ResNet basic residual block implementation.
/// Derived from torchvision.models.resnet.BasicBlock
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    relu: Relu,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    downsample: Option<Downsample<B>>,
    stride: usize,
}

impl<B: Backend> BasicBlock<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = input.clone();

        let out = self.conv1.forward(input);
        let out = self.bn1.forward(out);
        let out = self.relu.forward(out);
        let out = self.conv2.forward(out);
        let out = self.bn2.forward(out);

        // Skip connection
        let out = match &self.downsample {
            Some(downsample) => out + downsample.forward(identity),
            None => out + identity,
        };

        self.relu.forward(out)
    }

    /// Create a new BasicBlock.
    pub fn new(in_channels: usize, out_channels: usize, stride: usize, device: &Device<B>) -> Self {
        // conv3x3
        let conv1 = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .with_initializer(kaiming_fan_out())
            .init(device);
        let bn1 = BatchNormConfig::new(out_channels).init(device);

        // conv3x3
        let conv2 = Conv2dConfig::new([out_channels, out_channels], [3, 3])
            .with_stride([1, 1])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .with_initializer(kaiming_fan_out())
            .init(device);
        let bn2 = BatchNormConfig::new(out_channels).init(device);

        let downsample = (stride != 1 || in_channels != out_channels)
            .then(|| Downsample::new(in_channels, out_channels, stride, device));

        Self {
            conv1,
            bn1,
            relu: Relu::new(),
            conv2,
            bn2,
            downsample,
            stride,
        }
    }

    /// Multiply-accumulate count for an input of shape `[c, h, w]`.
    pub fn macs(&self, [_, h, w]: [usize; 3]) -> (u64, [usize; 3]) {
        let [out_channels, in_channels, _, _] = self.conv1.weight.val().dims();
        let oh = conv_out_size(h, 3, self.stride, 1);
        let ow = conv_out_size(w, 3, self.stride, 1);

        let mut macs = conv_macs(in_channels, out_channels, [3, 3], [oh, ow]);
        macs += conv_macs(out_channels, out_channels, [3, 3], [oh, ow]);
        if self.downsample.is_some() {
            macs += conv_macs(in_channels, out_channels, [1, 1], [oh, ow]);
        }

        (macs, [out_channels, oh, ow])
    }
}

/// Downsample layer applies a 1x1 conv to reduce the resolution (H, W) and adjust the number of channels.
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> Downsample<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.conv.forward(input);
        self.bn.forward(out)
    }

    /// Create a new Downsample.
    pub fn new(in_channels: usize, out_channels: usize, stride: usize, device: &Device<B>) -> Self {
        // conv1x1
        let conv = Conv2dConfig::new([in_channels, out_channels], [1, 1])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(0, 0))
            .with_bias(false)
            .with_initializer(kaiming_fan_out())
            .init(device);
        let bn = BatchNormConfig::new(out_channels).init(device);

        Self { conv, bn }
    }
}

/// Collection of sequential residual blocks.
#[derive(Module, Debug)]
pub struct LayerBlock<B: Backend> {
    blocks: Vec<BasicBlock<B>>,
}

impl<B: Backend> LayerBlock<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut out = input;
        for block in &self.blocks {
            out = block.forward(out);
        }
        out
    }

    /// Create a new LayerBlock. Only the first block uses `stride`.
    pub fn new(
        num_blocks: usize,
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        device: &Device<B>,
    ) -> Self {
        let blocks = (0..num_blocks)
            .map(|b| {
                if b == 0 {
                    BasicBlock::new(in_channels, out_channels, stride, device)
                } else {
                    BasicBlock::new(out_channels, out_channels, 1, device)
                }
            })
            .collect();

        Self { blocks }
    }

    pub fn macs(&self, input: [usize; 3]) -> (u64, [usize; 3]) {
        self.blocks
            .iter()
            .fold((0, input), |(total, shape), block| {
                let (macs, shape) = block.macs(shape);
                (total + macs, shape)
            })
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn basic_block_downsamples_when_strided() {
        let device = Default::default();
        let block = BasicBlock::<TestBackend>::new(64, 128, 2, &device);

        let input = Tensor::<TestBackend, 4>::zeros([1, 64, 16, 16], &device);
        let output = block.forward(input);

        assert_eq!(output.dims(), [1, 128, 8, 8]);
        assert!(block.downsample.is_some());
    }

    #[test]
    fn basic_block_macs_include_downsample() {
        let device = Default::default();
        let block = BasicBlock::<TestBackend>::new(4, 8, 2, &device);

        let (macs, shape) = block.macs([4, 8, 8]);

        // conv1: 8*4*9*16, conv2: 8*8*9*16, downsample: 8*4*1*16
        assert_eq!(shape, [8, 4, 4]);
        assert_eq!(macs, 4608 + 9216 + 512);
    }

    #[test]
    fn layer_block_keeps_identity_blocks_after_first() {
        let device = Default::default();
        let layer = LayerBlock::<TestBackend>::new(2, 64, 64, 1, &device);

        assert_eq!(layer.len(), 2);
        assert!(layer.blocks.iter().all(|b| b.downsample.is_none()));
    }
}
