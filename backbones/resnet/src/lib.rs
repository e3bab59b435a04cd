//! ResNet implementation for the BiSeNet context path.
//!
//! This module provides the basic-block ResNet variants (18 and 34 layers) used as
//! feature extractors. The implementation is based on the official torchvision ResNet
//! implementation, with the classification head removed.

use burn::nn::{
    conv::{Conv2d, Conv2dConfig},
    pool::{MaxPool2d, MaxPool2dConfig},
    BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
};
use burn::prelude::*;

mod blocks;
pub use blocks::*;

// ResNet residual layer block configs
const RESNET18_BLOCKS: [usize; 4] = [2, 2, 2, 2];
const RESNET34_BLOCKS: [usize; 4] = [3, 4, 6, 3];

/// Spatial output size of a convolution or pooling window.
pub const fn conv_out_size(size: usize, kernel: usize, stride: usize, padding: usize) -> usize {
    (size + 2 * padding - kernel) / stride + 1
}

/// Multiply-accumulate count of a dense 2d convolution producing an `[oh, ow]` map.
pub const fn conv_macs(
    in_channels: usize,
    out_channels: usize,
    [kh, kw]: [usize; 2],
    [oh, ow]: [usize; 2],
) -> u64 {
    (out_channels * in_channels * kh * kw * oh * ow) as u64
}

/// ResNet backbone.
///
/// Produces the 4 feature levels at strides 4, 8, 16 and 32.
/// Derived from torchvision.models.resnet.ResNet
#[derive(Module, Debug)]
pub struct ResNetBackbone<B: Backend> {
    // First feature level: conv1 + bn1 + relu + maxpool + layer1
    pub conv1_block: Conv1Block<B>,
    pub layer1: LayerBlock<B>,
    pub layer2: LayerBlock<B>,
    pub layer3: LayerBlock<B>,
    pub layer4: LayerBlock<B>,
}

impl<B: Backend> ResNetBackbone<B> {
    /// Forward pass returning the features at strides `[4, 8, 16, 32]`.
    pub fn forward(&self, input: Tensor<B, 4>) -> [Tensor<B, 4>; 4] {
        let feat4 = self.conv1_block.forward(input);
        let feat4 = self.layer1.forward(feat4);
        let feat8 = self.layer2.forward(feat4.clone());
        let feat16 = self.layer3.forward(feat8.clone());
        let feat32 = self.layer4.forward(feat16.clone());

        [feat4, feat8, feat16, feat32]
    }

    /// Create ResNet-18 backbone.
    pub fn resnet18(device: &Device<B>) -> Self {
        Self::new(RESNET18_BLOCKS, device)
    }

    /// Create ResNet-34 backbone.
    pub fn resnet34(device: &Device<B>) -> Self {
        Self::new(RESNET34_BLOCKS, device)
    }

    /// Channels of the four feature levels.
    pub const fn output_channels(&self) -> [usize; 4] {
        [64, 128, 256, 512]
    }

    /// Multiply-accumulate count for one `[c, h, w]` image, with the shape of every feature level.
    pub fn macs(&self, input: [usize; 3]) -> (u64, [[usize; 3]; 4]) {
        let (stem, shape4) = self.conv1_block.macs(input);
        let (l1, shape4) = self.layer1.macs(shape4);
        let (l2, shape8) = self.layer2.macs(shape4);
        let (l3, shape16) = self.layer3.macs(shape8);
        let (l4, shape32) = self.layer4.macs(shape16);

        (
            stem + l1 + l2 + l3 + l4,
            [shape4, shape8, shape16, shape32],
        )
    }

    fn new(blocks: [usize; 4], device: &Device<B>) -> Self {
        // First conv block: 7x7 conv, 64, stride=2, padding=3
        let conv1_block = Conv1Block::new(3, 64, device);

        let layer1 = LayerBlock::new(blocks[0], 64, 64, 1, device);
        let layer2 = LayerBlock::new(blocks[1], 64, 128, 2, device);
        let layer3 = LayerBlock::new(blocks[2], 128, 256, 2, device);
        let layer4 = LayerBlock::new(blocks[3], 256, 512, 2, device);

        Self {
            conv1_block,
            layer1,
            layer2,
            layer3,
            layer4,
        }
    }
}

/// First conv block: conv1 + bn1 + relu + maxpool
#[derive(Module, Debug)]
pub struct Conv1Block<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    relu: Relu,
    maxpool: MaxPool2d,
}

impl<B: Backend> Conv1Block<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.conv1.forward(input);
        let out = self.bn1.forward(out);
        let out = self.relu.forward(out);
        self.maxpool.forward(out)
    }

    /// Create a new Conv1Block.
    pub fn new(in_channels: usize, out_channels: usize, device: &Device<B>) -> Self {
        // 7x7 conv, stride=2, padding=3
        let conv1 = Conv2dConfig::new([in_channels, out_channels], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .with_bias(false)
            .with_initializer(blocks::kaiming_fan_out())
            .init(device);

        let bn1 = BatchNormConfig::new(out_channels).init(device);

        // 3x3 maxpool, stride=2, padding=1
        let maxpool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        Self {
            conv1,
            bn1,
            relu: Relu::new(),
            maxpool,
        }
    }

    pub fn macs(&self, [_, h, w]: [usize; 3]) -> (u64, [usize; 3]) {
        let [out_channels, in_channels, _, _] = self.conv1.weight.val().dims();
        let (ch, cw) = (conv_out_size(h, 7, 2, 3), conv_out_size(w, 7, 2, 3));
        let macs = conv_macs(in_channels, out_channels, [7, 7], [ch, cw]);

        let (ph, pw) = (conv_out_size(ch, 3, 2, 1), conv_out_size(cw, 3, 2, 1));
        (macs, [out_channels, ph, pw])
    }
}

/// ResNet variants usable as a BiSeNet context path.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum ResNetVariant {
    /// ResNet-18
    ResNet18,
    /// ResNet-34
    ResNet34,
}

impl ResNetVariant {
    /// Initialize the backbone for this variant.
    pub fn init<B: Backend>(&self, device: &B::Device) -> ResNetBackbone<B> {
        match self {
            Self::ResNet18 => ResNetBackbone::resnet18(device),
            Self::ResNet34 => ResNetBackbone::resnet34(device),
        }
    }
}
