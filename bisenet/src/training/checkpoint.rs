//! Resumable training checkpoints.
//!
//! A checkpoint at iteration `N` is three files in the checkpoint directory:
//! `model-N.mpk`, `optim-N.mpk` and `state-N.json`.

use std::{
    fs,
    path::{Path, PathBuf},
};

use burn::{
    optim::Optimizer,
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::backend::AutodiffBackend,
};

use super::config::TrainingState;
use crate::{
    error::{BiSeNetError, BiSeNetResult},
    models::BiSeNet,
};

#[derive(Debug, Clone)]
pub struct Checkpointer {
    directory: PathBuf,
    recorder: NamedMpkFileRecorder<FullPrecisionSettings>,
}

impl Checkpointer {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            recorder: NamedMpkFileRecorder::new(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path(&self, kind: &str, iteration: usize) -> PathBuf {
        self.directory.join(format!("{kind}-{iteration}"))
    }

    pub fn save<B, O>(
        &self,
        model: &BiSeNet<B>,
        optim: &O,
        state: &TrainingState,
    ) -> BiSeNetResult<()>
    where
        B: AutodiffBackend,
        O: Optimizer<BiSeNet<B>, B>,
    {
        fs::create_dir_all(&self.directory).map_err(BiSeNetError::io(&self.directory))?;
        let iteration = state.iteration;

        let model_path = self.path("model", iteration);
        model
            .clone()
            .save_file(&model_path, &self.recorder)
            .map_err(BiSeNetError::record("save", &model_path))?;

        let optim_path = self.path("optim", iteration);
        Recorder::<B>::record(&self.recorder, optim.to_record(), optim_path.clone())
            .map_err(BiSeNetError::record("save", &optim_path))?;

        let state_path = self.path("state", iteration).with_extension("json");
        state
            .save(&state_path)
            .map_err(BiSeNetError::io(&state_path))?;

        tracing::info!(iteration, path = %self.directory.display(), "checkpoint saved");
        Ok(())
    }

    /// Restores the model, optimizer and loop state saved at `iteration`.
    pub fn load<B, O>(
        &self,
        iteration: usize,
        model: BiSeNet<B>,
        optim: O,
        device: &B::Device,
    ) -> BiSeNetResult<(BiSeNet<B>, O, TrainingState)>
    where
        B: AutodiffBackend,
        O: Optimizer<BiSeNet<B>, B>,
    {
        let state_path = self.path("state", iteration).with_extension("json");
        let state = TrainingState::load(&state_path)
            .map_err(BiSeNetError::record("load", &state_path))?;

        let model_path = self.path("model", iteration);
        let model = model
            .load_file(&model_path, &self.recorder, device)
            .map_err(BiSeNetError::record("load", &model_path))?;

        let optim_path = self.path("optim", iteration);
        let record = Recorder::<B>::load(&self.recorder, optim_path.clone(), device)
            .map_err(BiSeNetError::record("load", &optim_path))?;
        let optim = optim.load_record(record);

        tracing::info!(iteration, epoch = state.epoch, "resumed from checkpoint");
        Ok((model, optim, state))
    }

    /// Highest iteration with a saved state file.
    pub fn latest(&self) -> Option<usize> {
        fs::read_dir(&self.directory)
            .ok()?
            .filter_map(|entry| {
                let name = entry.ok()?.file_name();
                let name = name.to_str()?;
                name.strip_prefix("state-")?
                    .strip_suffix(".json")?
                    .parse::<usize>()
                    .ok()
            })
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::{Autodiff, NdArray},
        module::AutodiffModule,
        optim::GradientsParams,
    };

    use crate::{models::BiSeNetConfig, optimizer::SgdSettings};

    type TestBackend = Autodiff<NdArray>;

    #[test]
    fn save_then_resume_restores_state_and_weights() {
        let dir = tempfile::tempdir().unwrap();
        let checkpointer = Checkpointer::new(dir.path().join("checkpoints"));
        let device = Default::default();
        let config = BiSeNetConfig::new().with_n_classes(2);

        let model = config.init::<TestBackend>(&device);
        let mut optim = SgdSettings::new().init::<TestBackend, BiSeNet<TestBackend>>();

        let x = Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &device);
        let grads = GradientsParams::from_grads(model.forward(x.clone()).main.sum().backward(), &model);
        let model = optim.step(1e-2, model, grads);

        checkpointer
            .save(&model, &optim, &TrainingState::new(7, 1))
            .unwrap();
        checkpointer
            .save(&model, &optim, &TrainingState::new(12, 2))
            .unwrap();
        assert_eq!(checkpointer.latest(), Some(12));

        let fresh = config.init::<TestBackend>(&device);
        let fresh_optim = SgdSettings::new().init::<TestBackend, BiSeNet<TestBackend>>();
        let (restored, _optim, state) = checkpointer.load(7, fresh, fresh_optim, &device).unwrap();

        assert_eq!(state, TrainingState::new(7, 1));
        let expected = model.valid().infer(x.clone().inner());
        let actual = restored.valid().infer(x.inner());
        let max_diff = (expected - actual).abs().max().into_scalar();
        assert!(max_diff < 1e-4, "restored model differs by {max_diff}");
    }

    #[test]
    fn missing_checkpoint_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let checkpointer = Checkpointer::new(dir.path());
        let device = Default::default();
        let model = BiSeNetConfig::new().init::<TestBackend>(&device);
        let optim = SgdSettings::new().init::<TestBackend, BiSeNet<TestBackend>>();

        assert_eq!(checkpointer.latest(), None);
        assert!(matches!(
            checkpointer.load(3, model, optim, &device),
            Err(BiSeNetError::Record { action: "load", .. })
        ));
    }
}
