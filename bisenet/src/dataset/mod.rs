//! Cityscapes loading, label mapping and augmentation.

pub mod augmentation;
mod batcher;
mod cityscapes;
mod labels;

pub use augmentation::Augmentation;
pub use batcher::{CityscapesBatch, CityscapesBatcher};
pub use cityscapes::{CityscapesConfig, CityscapesDataset, CityscapesItem, CityscapesSample};
pub use labels::{label_id_to_train_id, CLASS_NAMES, IGNORE_INDEX};

#[cfg(test)]
pub(crate) use cityscapes::tests::fake_cityscapes;
