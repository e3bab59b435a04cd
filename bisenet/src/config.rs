use burn::prelude::*;

pub use resnet::ResNetVariant;

/// Source of the high-resolution features fed to the fusion module.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum SpatialPathMode {
    /// Reuse the stride-8 backbone feature.
    Backbone,
    /// Dedicated three-conv spatial path.
    Dedicated,
}

/// Dataset split names as laid out on disk.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub const fn dir_name(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Val => "val",
            Self::Test => "test",
        }
    }
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}
