mod bisenet;
mod context_path;
mod modules;
mod resize;
mod spatial_path;

pub use bisenet::{BiSeNet, BiSeNetConfig, BiSeNetOutput, BiSeNetRecord};
pub use context_path::{ContextFeatures, ContextPath};
pub use modules::{AttentionRefinementModule, ConvBnRelu, FeatureFusionModule, OutputHead};
pub use resize::{resize_bilinear, resize_nearest};
pub use spatial_path::SpatialPath;
