use std::path::PathBuf;

use burn::prelude::*;

use crate::{
    dataset::CityscapesConfig,
    error::{BiSeNetError, BiSeNetResult},
    losses::OhemCrossEntropyLossConfig,
    models::BiSeNetConfig,
    optimizer::{SgdSettings, WarmupPolyLrSchedulerConfig},
};

/// Everything needed to reproduce a training run, persisted as `config.json`.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    #[config(default = "BiSeNetConfig::new()")]
    pub model: BiSeNetConfig,

    #[config(default = "CityscapesConfig::new()")]
    pub dataset: CityscapesConfig,

    #[config(default = "WarmupPolyLrSchedulerConfig::new()")]
    pub scheduler: WarmupPolyLrSchedulerConfig,

    #[config(default = "SgdSettings::new()")]
    pub optimizer: SgdSettings,

    /// OHEM score threshold shared by the three loss heads.
    #[config(default = 0.7)]
    pub score_threshold: f64,

    /// Images per device and iteration.
    #[config(default = 8)]
    pub n_img_per_device: usize,

    /// Dataloader workers per device.
    #[config(default = 4)]
    pub num_workers: usize,

    /// Logging period in iterations.
    #[config(default = 50)]
    pub msg_iter: usize,

    #[config(default = 42)]
    pub seed: u64,

    /// Save a resumable checkpoint every N iterations.
    #[config(default = "None")]
    pub checkpoint_interval: Option<usize>,

    /// torchvision ResNet weights loaded into the context path before training. Needs
    /// the `pretrained` feature.
    #[config(default = "None")]
    pub pretrained_backbone: Option<PathBuf>,

    /// `[batch, channels, height, width]` used to report model complexity.
    #[config(default = "[8, 3, 360, 640]")]
    pub stats_input: [usize; 4],
}

impl TrainingConfig {
    /// Rejects settings the training loop cannot run with.
    pub fn validate(&self) -> BiSeNetResult<()> {
        let invalid = |reason: &str| {
            Err(BiSeNetError::InvalidConfiguration {
                reason: reason.to_string(),
            })
        };

        if self.n_img_per_device == 0 {
            return invalid("n_img_per_device must be positive");
        }
        if self.msg_iter == 0 {
            return invalid("msg_iter must be positive");
        }
        if self.checkpoint_interval == Some(0) {
            return invalid("checkpoint_interval must be positive");
        }
        if self.dataset.crop_size.contains(&0) {
            return invalid("crop_size must be positive");
        }
        if !(self.score_threshold > 0.0 && self.score_threshold <= 1.0) {
            return invalid("score_threshold must be in (0, 1]");
        }
        if self.scheduler.warmup_steps >= self.scheduler.max_iter {
            return invalid("warmup_steps must be smaller than max_iter");
        }
        if self.scheduler.lr0 <= 0.0 || self.scheduler.warmup_start_lr <= 0.0 {
            return invalid("learning rates must be positive");
        }
        if cfg!(not(feature = "pretrained")) && self.pretrained_backbone.is_some() {
            return invalid("pretrained_backbone requires the `pretrained` feature");
        }
        if self.stats_input[1] != 3 {
            return invalid("stats_input must describe RGB images");
        }
        Ok(())
    }

    /// Minimum number of pixels each OHEM head averages over: a sixteenth of the
    /// pixels of one device batch.
    pub fn n_min(&self) -> usize {
        let [h, w] = self.dataset.crop_size;
        self.n_img_per_device * h * w / 16
    }

    pub fn loss(&self) -> OhemCrossEntropyLossConfig {
        OhemCrossEntropyLossConfig::new(self.n_min()).with_score_threshold(self.score_threshold)
    }
}

/// Loop position saved alongside checkpoints.
#[derive(Config, Debug, PartialEq, Eq)]
pub struct TrainingState {
    /// Completed iterations.
    pub iteration: usize,
    /// Completed passes over the training shards.
    pub epoch: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_n_min_matches_cityscapes_recipe() {
        let config = TrainingConfig::new();
        assert_eq!(config.n_min(), 8 * 1024 * 1024 / 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_warmup_past_max_iter() {
        let config = TrainingConfig::new().with_scheduler(
            WarmupPolyLrSchedulerConfig::new()
                .with_warmup_steps(10)
                .with_max_iter(10),
        );
        assert!(matches!(
            config.validate(),
            Err(BiSeNetError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn rejects_zero_batch() {
        let config = TrainingConfig::new().with_n_img_per_device(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = TrainingConfig::new()
            .with_checkpoint_interval(Some(500))
            .with_n_img_per_device(2);

        config.save(&path).unwrap();
        let loaded = TrainingConfig::load(&path).unwrap();

        assert_eq!(loaded.checkpoint_interval, Some(500));
        assert_eq!(loaded.n_img_per_device, 2);
        assert_eq!(loaded.dataset.crop_size, [1024, 1024]);
        assert_eq!(loaded.model.backbone, crate::config::ResNetVariant::ResNet18);
    }
}
