//! BiSeNet: Bilateral Segmentation Network.
//!
//! The network fuses a high-resolution spatial path with a ResNet context path and
//! emits logits at full input resolution from three heads: the fused main head and two
//! auxiliary heads on the context features at strides 8 and 16.

use burn::{module::ModuleVisitor, prelude::*};
use resnet::ResNetBackboneRecord;

use super::{
    context_path::ContextPath,
    modules::{FeatureFusionModule, OutputHead},
    resize::resize_bilinear,
    spatial_path::SpatialPath,
};
use crate::config::{ResNetVariant, SpatialPathMode};

/// Configuration to create a [BiSeNet](BiSeNet) model.
#[derive(Config, Debug)]
pub struct BiSeNetConfig {
    /// Number of segmentation classes.
    #[config(default = 19)]
    pub n_classes: usize,
    /// Context path backbone.
    #[config(default = "ResNetVariant::ResNet18")]
    pub backbone: ResNetVariant,
    /// Spatial path flavour.
    #[config(default = "SpatialPathMode::Backbone")]
    pub spatial_path: SpatialPathMode,
}

impl BiSeNetConfig {
    /// Initializes a new model on `device`.
    pub fn init<B: Backend>(&self, device: &B::Device) -> BiSeNet<B> {
        let sp = match self.spatial_path {
            SpatialPathMode::Backbone => None,
            SpatialPathMode::Dedicated => Some(SpatialPath::new(device)),
        };

        BiSeNet {
            cp: ContextPath::new(&self.backbone, device),
            sp,
            ffm: FeatureFusionModule::new(256, 256, device),
            conv_out: OutputHead::new(256, 256, self.n_classes, device),
            conv_out16: OutputHead::new(128, 64, self.n_classes, device),
            conv_out32: OutputHead::new(128, 64, self.n_classes, device),
            n_classes: self.n_classes,
        }
    }
}

/// Logits of the three heads, all upsampled to the input resolution.
#[derive(Debug, Clone)]
pub struct BiSeNetOutput<B: Backend> {
    /// Fused prediction, `[N, n_classes, H, W]`.
    pub main: Tensor<B, 4>,
    /// Auxiliary prediction from the stride-8 context feature.
    pub aux16: Tensor<B, 4>,
    /// Auxiliary prediction from the stride-16 context feature.
    pub aux32: Tensor<B, 4>,
}

#[derive(Module, Debug)]
pub struct BiSeNet<B: Backend> {
    cp: ContextPath<B>,
    sp: Option<SpatialPath<B>>,
    ffm: FeatureFusionModule<B>,
    conv_out: OutputHead<B>,
    conv_out16: OutputHead<B>,
    conv_out32: OutputHead<B>,
    n_classes: usize,
}

impl<B: Backend> BiSeNet<B> {
    /// # Shapes
    ///   - input: `[batch_size, 3, height, width]`
    ///   - output: three tensors of `[batch_size, n_classes, height, width]`
    pub fn forward(&self, x: Tensor<B, 4>) -> BiSeNetOutput<B> {
        let [_, _, h, w] = x.dims();

        let spatial = self.sp.as_ref().map(|sp| sp.forward(x.clone()));
        let features = self.cp.forward(x);
        let spatial = spatial.unwrap_or(features.feat8);

        let fuse = self.ffm.forward(spatial, features.cp8.clone());

        let upsample = |logits: Tensor<B, 4>| resize_bilinear(logits, [h, w]);

        BiSeNetOutput {
            main: upsample(self.conv_out.forward(fuse)),
            aux16: upsample(self.conv_out16.forward(features.cp8)),
            aux32: upsample(self.conv_out32.forward(features.cp16)),
        }
    }

    /// Main-head logits only, as used at inference time.
    pub fn infer(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.forward(x).main
    }

    pub const fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Visits the parameters trained with a boosted learning rate: the fusion module and
    /// the three output heads.
    pub fn visit_lr_mul_params<V: ModuleVisitor<B>>(&self, visitor: &mut V) {
        self.ffm.visit(visitor);
        self.conv_out.visit(visitor);
        self.conv_out16.visit(visitor);
        self.conv_out32.visit(visitor);
    }

    /// Replace the context-path backbone parameters.
    pub fn load_backbone_record(mut self, record: ResNetBackboneRecord<B>) -> Self {
        self.cp = self.cp.load_backbone_record(record);
        self
    }

    /// Multiply-accumulate count of a forward pass on one `[3, h, w]` image.
    ///
    /// Only convolutions are counted; the final bilinear upsampling is ignored.
    pub fn macs(&self, [h, w]: [usize; 2]) -> u64 {
        let input = [3, h, w];
        let (context, [feat8, cp8, cp16]) = self.cp.macs(input);

        let (spatial, spatial_shape) = match &self.sp {
            Some(sp) => sp.macs(input),
            None => (0, feat8),
        };

        let fused_shape = [spatial_shape[0] + cp8[0], cp8[1], cp8[2]];
        let (ffm, fuse) = self.ffm.macs(fused_shape);
        let (head, _) = self.conv_out.macs(fuse);
        let (head16, _) = self.conv_out16.macs(cp8);
        let (head32, _) = self.conv_out32.macs(cp16);

        context + spatial + ffm + head + head16 + head32
    }
}
