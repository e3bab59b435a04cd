//! ImageNet-pretrained backbone weights from torchvision checkpoints.

use std::path::Path;

use burn::{
    prelude::*,
    record::{FullPrecisionSettings, Recorder},
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use resnet::ResNetBackboneRecord;

use crate::{
    error::{BiSeNetError, BiSeNetResult},
    models::BiSeNet,
};

/// Maps torchvision ResNet state dict keys onto the backbone module tree.
fn load_args(path: &Path) -> LoadArgs {
    LoadArgs::new(path.to_path_buf())
        .with_key_remap("^conv1\\.(.+)", "conv1_block.conv1.$1")
        .with_key_remap("^bn1\\.(.+)", "conv1_block.bn1.$1")
        .with_key_remap(
            "^(layer[1-4])\\.([0-9]+)\\.downsample\\.0\\.(.+)",
            "$1.blocks.$2.downsample.conv.$3",
        )
        .with_key_remap(
            "^(layer[1-4])\\.([0-9]+)\\.downsample\\.1\\.(.+)",
            "$1.blocks.$2.downsample.bn.$3",
        )
        .with_key_remap("^(layer[1-4])\\.([0-9]+)\\.(.+)", "$1.blocks.$2.$3")
}

/// Loads a torchvision `resnet18`/`resnet34` `.pth` file into the context path.
///
/// The classifier (`fc.*`) is ignored. The file must match the configured backbone
/// depth.
pub fn load_pretrained_backbone<B: Backend>(
    model: BiSeNet<B>,
    path: impl AsRef<Path>,
    device: &B::Device,
) -> BiSeNetResult<BiSeNet<B>> {
    let path = path.as_ref();
    let record: ResNetBackboneRecord<B> = PyTorchFileRecorder::<FullPrecisionSettings>::default()
        .load(load_args(path), device)
        .map_err(|e| BiSeNetError::WeightLoadingFailed {
            reason: format!("{}: {e}", path.display()),
        })?;

    tracing::info!(path = %path.display(), "loaded pretrained backbone");
    Ok(model.load_backbone_record(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    use crate::models::BiSeNetConfig;

    type TestBackend = NdArray;

    #[test]
    fn missing_file_is_reported() {
        let device = Default::default();
        let model = BiSeNetConfig::new().init::<TestBackend>(&device);

        let result = load_pretrained_backbone(model, "does/not/exist.pth", &device);
        assert!(matches!(
            result,
            Err(BiSeNetError::WeightLoadingFailed { .. })
        ));
    }
}
