//! BiSeNet real-time semantic segmentation on Cityscapes, built on Burn.
//!
//! The crate covers the full training recipe: the network and its ResNet context path,
//! the three-head OHEM loss, Cityscapes loading with augmentation, the warmup-poly SGD
//! schedule, a multi-device training loop, multi-scale evaluation and weight export.

mod config;
pub mod dataset;
mod error;
pub mod evaluation;
pub mod export;
pub mod losses;
pub mod models;
pub mod optimizer;
#[cfg(feature = "pretrained")]
pub mod pretrained;
pub mod stats;
pub mod training;

pub use config::*;
pub use error::{BiSeNetError, BiSeNetResult, DatasetError, DatasetResult};
pub use models::{BiSeNet, BiSeNetConfig, BiSeNetOutput, BiSeNetRecord};
