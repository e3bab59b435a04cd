use burn::{data::dataloader::batcher::Batcher, prelude::*};

use super::cityscapes::CityscapesItem;

/// A batch of normalized images and their train-id labels.
#[derive(Debug, Clone)]
pub struct CityscapesBatch<B: Backend> {
    /// `[batch_size, 3, height, width]`
    pub images: Tensor<B, 4>,
    /// `[batch_size, height, width]`
    pub labels: Tensor<B, 3, Int>,
}

impl<B: Backend> CityscapesBatch<B> {
    pub fn len(&self) -> usize {
        self.images.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Stacks [items](CityscapesItem) of equal size into a [batch](CityscapesBatch).
#[derive(Clone, Debug, Default)]
pub struct CityscapesBatcher;

impl CityscapesBatcher {
    pub const fn new() -> Self {
        Self
    }
}

impl<B: Backend> Batcher<B, CityscapesItem, CityscapesBatch<B>> for CityscapesBatcher {
    fn batch(&self, items: Vec<CityscapesItem>, device: &B::Device) -> CityscapesBatch<B> {
        let (images, labels): (Vec<_>, Vec<_>) = items
            .into_iter()
            .map(|item| {
                let [h, w] = [item.height, item.width];
                let image = Tensor::<B, 3>::from_data(TensorData::new(item.image, [3, h, w]), device);
                let label =
                    Tensor::<B, 2, Int>::from_data(TensorData::new(item.label, [h, w]), device);
                (image.unsqueeze::<4>(), label.unsqueeze::<3>())
            })
            .unzip();

        CityscapesBatch {
            images: Tensor::cat(images, 0),
            labels: Tensor::cat(labels, 0),
        }
    }
}
