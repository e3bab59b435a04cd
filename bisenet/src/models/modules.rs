//! Building blocks shared by the BiSeNet paths and heads.

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d, Relu,
    },
    prelude::*,
    tensor::activation::sigmoid,
};
use resnet::{conv_macs, conv_out_size};

/// Kaiming normal with `a = 1`, i.e. unit gain on the fan-in.
fn kaiming_unit() -> Initializer {
    Initializer::KaimingNormal {
        gain: 1.0,
        fan_out_only: false,
    }
}

fn conv2d<B: Backend>(
    channels: [usize; 2],
    kernel: usize,
    stride: usize,
    padding: usize,
    device: &B::Device,
) -> Conv2d<B> {
    Conv2dConfig::new(channels, [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_bias(false)
        .with_initializer(kaiming_unit())
        .init(device)
}

/// MACs of a stride-1, unpadded conv applied on an `[h, w]` map.
fn pointwise_macs<B: Backend>(conv: &Conv2d<B>, [h, w]: [usize; 2]) -> u64 {
    let [out_channels, in_channels, kh, kw] = conv.weight.val().dims();
    conv_macs(in_channels, out_channels, [kh, kw], [h, w])
}

/// Convolution + batch norm + ReLU.
#[derive(Module, Debug)]
pub struct ConvBnRelu<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    relu: Relu,
    kernel: usize,
    stride: usize,
    padding: usize,
}

impl<B: Backend> ConvBnRelu<B> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
        device: &B::Device,
    ) -> Self {
        Self {
            conv: conv2d([in_channels, out_channels], kernel, stride, padding, device),
            bn: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
            kernel,
            stride,
            padding,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        self.relu.forward(x)
    }

    pub fn macs(&self, [_, h, w]: [usize; 3]) -> (u64, [usize; 3]) {
        let [out_channels, in_channels, _, _] = self.conv.weight.val().dims();
        let oh = conv_out_size(h, self.kernel, self.stride, self.padding);
        let ow = conv_out_size(w, self.kernel, self.stride, self.padding);
        let macs = conv_macs(in_channels, out_channels, [self.kernel; 2], [oh, ow]);
        (macs, [out_channels, oh, ow])
    }
}

/// Attention refinement module: reweights channels with globally pooled context.
#[derive(Module, Debug)]
pub struct AttentionRefinementModule<B: Backend> {
    conv: ConvBnRelu<B>,
    pool: AdaptiveAvgPool2d,
    conv_atten: Conv2d<B>,
    bn_atten: BatchNorm<B, 2>,
}

impl<B: Backend> AttentionRefinementModule<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            conv: ConvBnRelu::new(in_channels, out_channels, 3, 1, 1, device),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            conv_atten: conv2d([out_channels, out_channels], 1, 1, 0, device),
            bn_atten: BatchNormConfig::new(out_channels).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let feat = self.conv.forward(x);
        let atten = self.pool.forward(feat.clone());
        let atten = self.conv_atten.forward(atten);
        let atten = sigmoid(self.bn_atten.forward(atten));
        feat * atten
    }

    pub fn macs(&self, input: [usize; 3]) -> (u64, [usize; 3]) {
        let (macs, shape) = self.conv.macs(input);
        (macs + pointwise_macs(&self.conv_atten, [1, 1]), shape)
    }
}

/// Feature fusion module: merges the spatial and context paths.
#[derive(Module, Debug)]
pub struct FeatureFusionModule<B: Backend> {
    convblk: ConvBnRelu<B>,
    pool: AdaptiveAvgPool2d,
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    relu: Relu,
}

impl<B: Backend> FeatureFusionModule<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            convblk: ConvBnRelu::new(in_channels, out_channels, 1, 1, 0, device),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            conv1: conv2d([out_channels, out_channels / 4], 1, 1, 0, device),
            conv2: conv2d([out_channels / 4, out_channels], 1, 1, 0, device),
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, spatial: Tensor<B, 4>, context: Tensor<B, 4>) -> Tensor<B, 4> {
        let fcat = Tensor::cat(vec![spatial, context], 1);
        let feat = self.convblk.forward(fcat);

        let atten = self.pool.forward(feat.clone());
        let atten = self.relu.forward(self.conv1.forward(atten));
        let atten = sigmoid(self.conv2.forward(atten));

        feat.clone() * atten + feat
    }

    pub fn macs(&self, input: [usize; 3]) -> (u64, [usize; 3]) {
        let (macs, shape) = self.convblk.macs(input);
        let atten = pointwise_macs(&self.conv1, [1, 1]) + pointwise_macs(&self.conv2, [1, 1]);
        (macs + atten, shape)
    }
}

/// Segmentation head producing per-class logits.
#[derive(Module, Debug)]
pub struct OutputHead<B: Backend> {
    conv: ConvBnRelu<B>,
    conv_out: Conv2d<B>,
}

impl<B: Backend> OutputHead<B> {
    pub fn new(
        in_channels: usize,
        mid_channels: usize,
        n_classes: usize,
        device: &B::Device,
    ) -> Self {
        Self {
            conv: ConvBnRelu::new(in_channels, mid_channels, 3, 1, 1, device),
            conv_out: conv2d([mid_channels, n_classes], 1, 1, 0, device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.conv_out.forward(self.conv.forward(x))
    }

    pub fn macs(&self, input: [usize; 3]) -> (u64, [usize; 3]) {
        let (macs, [_, h, w]) = self.conv.macs(input);
        let [n_classes, _, _, _] = self.conv_out.weight.val().dims();
        (
            macs + pointwise_macs(&self.conv_out, [h, w]),
            [n_classes, h, w],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::Distribution};

    type TestBackend = NdArray;

    #[test]
    fn conv_bn_relu_output_is_non_negative() {
        let device = Default::default();
        let block = ConvBnRelu::<TestBackend>::new(3, 8, 3, 2, 1, &device);

        let x = Tensor::random([2, 3, 16, 16], Distribution::Normal(0.0, 1.0), &device);
        let y = block.forward(x);

        assert_eq!(y.dims(), [2, 8, 8, 8]);
        let min = y.min().into_scalar();
        assert!(min >= 0.0);
        assert_eq!(block.macs([3, 16, 16]), (8 * 3 * 9 * 64, [8, 8, 8]));
    }

    #[test]
    fn attention_refinement_keeps_spatial_size() {
        let device = Default::default();
        let arm = AttentionRefinementModule::<TestBackend>::new(16, 8, &device);

        let x = Tensor::random([1, 16, 6, 10], Distribution::Normal(0.0, 1.0), &device);
        assert_eq!(arm.forward(x).dims(), [1, 8, 6, 10]);
    }

    #[test]
    fn feature_fusion_concatenates_paths() {
        let device = Default::default();
        let ffm = FeatureFusionModule::<TestBackend>::new(24, 16, &device);

        let spatial = Tensor::random([2, 8, 4, 4], Distribution::Normal(0.0, 1.0), &device);
        let context = Tensor::random([2, 16, 4, 4], Distribution::Normal(0.0, 1.0), &device);

        assert_eq!(ffm.forward(spatial, context).dims(), [2, 16, 4, 4]);
        // convblk 24->16 on 4x4, then 16->4 and 4->16 on 1x1
        assert_eq!(ffm.macs([24, 4, 4]).0, 24 * 16 * 16 + 16 * 4 + 4 * 16);
    }

    #[test]
    fn output_head_emits_class_channels() {
        let device = Default::default();
        let head = OutputHead::<TestBackend>::new(8, 4, 19, &device);

        let x = Tensor::random([1, 8, 5, 7], Distribution::Normal(0.0, 1.0), &device);
        assert_eq!(head.forward(x).dims(), [1, 19, 5, 7]);
        assert_eq!(head.macs([8, 5, 7]).1, [19, 5, 7]);
    }
}
