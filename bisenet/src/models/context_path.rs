//! Context path: a ResNet with attention refinement and a global context branch.

use burn::{
    nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
    prelude::*,
};
use resnet::{ResNetBackbone, ResNetBackboneRecord, ResNetVariant};

use super::{
    modules::{AttentionRefinementModule, ConvBnRelu},
    resize::resize_nearest,
};

/// Features produced by [`ContextPath::forward`].
#[derive(Debug, Clone)]
pub struct ContextFeatures<B: Backend> {
    /// Raw backbone feature at stride 8.
    pub feat8: Tensor<B, 4>,
    /// Refined context at stride 8.
    pub cp8: Tensor<B, 4>,
    /// Refined context at stride 16.
    pub cp16: Tensor<B, 4>,
}

#[derive(Module, Debug)]
pub struct ContextPath<B: Backend> {
    resnet: ResNetBackbone<B>,
    arm16: AttentionRefinementModule<B>,
    arm32: AttentionRefinementModule<B>,
    conv_head32: ConvBnRelu<B>,
    conv_head16: ConvBnRelu<B>,
    pool: AdaptiveAvgPool2d,
    conv_avg: ConvBnRelu<B>,
}

impl<B: Backend> ContextPath<B> {
    pub fn new(variant: &ResNetVariant, device: &B::Device) -> Self {
        let resnet = variant.init(device);
        let [_, _, c16, c32] = resnet.output_channels();

        Self {
            resnet,
            arm16: AttentionRefinementModule::new(c16, 128, device),
            arm32: AttentionRefinementModule::new(c32, 128, device),
            conv_head32: ConvBnRelu::new(128, 128, 3, 1, 1, device),
            conv_head16: ConvBnRelu::new(128, 128, 3, 1, 1, device),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            conv_avg: ConvBnRelu::new(c32, 128, 1, 1, 0, device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> ContextFeatures<B> {
        let [_, feat8, feat16, feat32] = self.resnet.forward(x);
        let [_, _, h8, w8] = feat8.dims();
        let [_, _, h16, w16] = feat16.dims();
        let [_, _, h32, w32] = feat32.dims();

        let avg = self.conv_avg.forward(self.pool.forward(feat32.clone()));
        let avg_up = resize_nearest(avg, [h32, w32]);

        let feat32_sum = self.arm32.forward(feat32) + avg_up;
        let feat32_up = resize_nearest(feat32_sum, [h16, w16]);
        let feat32_up = self.conv_head32.forward(feat32_up);

        let feat16_sum = self.arm16.forward(feat16) + feat32_up.clone();
        let feat16_up = resize_nearest(feat16_sum, [h8, w8]);
        let feat16_up = self.conv_head16.forward(feat16_up);

        ContextFeatures {
            feat8,
            cp8: feat16_up,
            cp16: feat32_up,
        }
    }

    /// Replace the backbone parameters, e.g. with ImageNet weights.
    pub fn load_backbone_record(mut self, record: ResNetBackboneRecord<B>) -> Self {
        self.resnet = self.resnet.load_record(record);
        self
    }

    /// MACs for one `[3, h, w]` image and the shapes of `(feat8, cp8, cp16)`.
    pub fn macs(&self, input: [usize; 3]) -> (u64, [[usize; 3]; 3]) {
        let (backbone, [_, shape8, shape16, shape32]) = self.resnet.macs(input);

        let (arm32, _) = self.arm32.macs(shape32);
        let (avg, _) = self.conv_avg.macs([shape32[0], 1, 1]);
        let (head32, cp16) = self.conv_head32.macs([128, shape16[1], shape16[2]]);
        let (arm16, _) = self.arm16.macs(shape16);
        let (head16, cp8) = self.conv_head16.macs([128, shape8[1], shape8[2]]);

        (
            backbone + arm32 + avg + head32 + arm16 + head16,
            [shape8, cp8, cp16],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::Distribution};

    type TestBackend = NdArray;

    #[test]
    fn context_features_have_expected_strides() {
        let device = Default::default();
        let cp = ContextPath::<TestBackend>::new(&ResNetVariant::ResNet18, &device);

        let x = Tensor::random([1, 3, 64, 96], Distribution::Normal(0.0, 1.0), &device);
        let features = cp.forward(x);

        assert_eq!(features.feat8.dims(), [1, 128, 8, 12]);
        assert_eq!(features.cp8.dims(), [1, 128, 8, 12]);
        assert_eq!(features.cp16.dims(), [1, 128, 4, 6]);

        let (_, shapes) = cp.macs([3, 64, 96]);
        assert_eq!(shapes, [[128, 8, 12], [128, 8, 12], [128, 4, 6]]);
    }
}
