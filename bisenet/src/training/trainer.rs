//! Iteration-driven training loop.

use std::{fs, path::Path, sync::Arc};

use burn::{
    data::{
        dataloader::{DataLoader, DataLoaderBuilder, DataLoaderIterator},
        dataset::{transform::PartialDataset, Dataset},
    },
    lr_scheduler::LrScheduler,
    optim::Optimizer,
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::backend::AutodiffBackend,
};

use super::{
    checkpoint::Checkpointer,
    config::{TrainingConfig, TrainingState},
    parallel::DataParallel,
    progress::ProgressTracker,
};
use crate::{
    config::Split,
    dataset::{CityscapesBatch, CityscapesBatcher, CityscapesDataset},
    error::{BiSeNetError, BiSeNetResult, DatasetError},
    losses::BiSeNetLoss,
    models::BiSeNet,
    stats::ModelStats,
};

/// File stem of the trained model inside the artifact directory.
pub const FINAL_MODEL_STEM: &str = "model_final";

/// Where to pick the run up from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// Start from scratch.
    No,
    /// Checkpoint saved at this iteration.
    Iteration(usize),
    /// Most recent checkpoint, or from scratch if there is none.
    Latest,
}

type Loader<B> = Arc<dyn DataLoader<B, CityscapesBatch<B>>>;
type LoaderIter<'a, B> = Box<dyn DataLoaderIterator<CityscapesBatch<B>> + 'a>;

/// Trains a BiSeNet on the Cityscapes training split with one batch per device and
/// iteration, then saves `model_final.mpk` in `artifact_dir`.
///
/// The first device holds the master weights and receives the final model.
pub fn train<B: AutodiffBackend>(
    config: &TrainingConfig,
    devices: &[B::Device],
    artifact_dir: &Path,
    resume: Resume,
) -> BiSeNetResult<BiSeNet<B>> {
    config.validate()?;
    let main_device = devices.first().ok_or(BiSeNetError::NoDevice)?;

    fs::create_dir_all(artifact_dir).map_err(BiSeNetError::io(artifact_dir))?;
    let config_path = artifact_dir.join("config.json");
    config
        .save(&config_path)
        .map_err(BiSeNetError::io(&config_path))?;

    B::seed(config.seed);

    let dataset = CityscapesDataset::new(&config.dataset, &Split::Train)?;
    let shards = Shards::<B>::new(dataset, devices, config)?;

    let model = config.model.init::<B>(main_device);
    #[cfg(feature = "pretrained")]
    let model = match &config.pretrained_backbone {
        Some(path) => crate::pretrained::load_pretrained_backbone(model, path, main_device)?,
        None => model,
    };
    let stats = ModelStats::measure(&model, config.stats_input);
    tracing::info!(params = stats.params, input = ?stats.input, "{stats}");

    let optim = config.optimizer.init::<B, BiSeNet<B>>();
    let checkpointer = Checkpointer::new(artifact_dir.join("checkpoints"));

    let resume_from = match resume {
        Resume::No => None,
        Resume::Iteration(iteration) => Some(iteration),
        Resume::Latest => checkpointer.latest(),
    };
    let (model, optim, state) = match resume_from {
        Some(iteration) => checkpointer.load(iteration, model, optim, main_device)?,
        None => (model, optim, TrainingState::new(0, 0)),
    };

    let criterion = BiSeNetLoss::new(&config.loss());
    let parallel = DataParallel::new(devices, criterion)?;

    tracing::info!(
        devices = parallel.world_size(),
        n_img_per_device = config.n_img_per_device,
        max_iter = config.scheduler.max_iter,
        start = state.iteration,
        "start training"
    );

    let model = run_loop(
        config,
        &shards,
        &parallel,
        &checkpointer,
        model,
        optim,
        state,
    )?;

    let model_path = artifact_dir.join(FINAL_MODEL_STEM);
    model
        .clone()
        .save_file(
            &model_path,
            &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
        )
        .map_err(BiSeNetError::record("save", &model_path))?;
    tracing::info!(
        "training done, model saved to: {}",
        model_path.with_extension("mpk").display()
    );

    Ok(model)
}

fn run_loop<B, O>(
    config: &TrainingConfig,
    shards: &Shards<B>,
    parallel: &DataParallel<B>,
    checkpointer: &Checkpointer,
    mut model: BiSeNet<B>,
    mut optim: O,
    mut state: TrainingState,
) -> BiSeNetResult<BiSeNet<B>>
where
    B: AutodiffBackend,
    O: Optimizer<BiSeNet<B>, B>,
{
    let max_iter = config.scheduler.max_iter;
    let lr_multiplier = config.optimizer.lr_multiplier();
    let mut scheduler = config
        .scheduler
        .init()
        .load_record::<B>(state.iteration);
    let mut progress = ProgressTracker::new(config.msg_iter, max_iter, state.iteration);

    let mut loaders = shards.epoch(state.epoch);
    let mut iterators = start_epoch(&loaders);

    for it in state.iteration..max_iter {
        let batches = match next_batches(&mut iterators, shards.batch_size) {
            Some(batches) => batches,
            None => {
                state.epoch += 1;
                tracing::debug!(epoch = state.epoch, "epoch rollover");
                drop(iterators);
                loaders = shards.epoch(state.epoch);
                iterators = start_epoch(&loaders);
                next_batches(&mut iterators, shards.batch_size).ok_or(
                    DatasetError::NoFullBatch {
                        shard_len: shards.shard_len,
                        batch_size: shards.batch_size,
                    },
                )?
            }
        };

        let output = parallel.step(&model, batches)?;
        let grads = lr_multiplier.apply(&model, output.grads);
        let lr = scheduler.step();
        model = optim.step(lr, model, grads);
        state.iteration = it + 1;

        if let Some(report) = progress.update(state.iteration, lr, output.loss) {
            tracing::info!("{report}");
        }

        if let Some(interval) = config.checkpoint_interval {
            if state.iteration % interval == 0 && state.iteration < max_iter {
                checkpointer.save(&model, &optim, &state)?;
            }
        }
    }

    Ok(model)
}

/// The training set split into one contiguous shard per device.
///
/// Loaders are rebuilt every epoch with a seed derived from the epoch and the rank, so
/// a run resumed at epoch `e` replays the same order as an uninterrupted one.
struct Shards<B: Backend> {
    dataset: Arc<CityscapesDataset>,
    devices: Vec<B::Device>,
    shard_len: usize,
    batch_size: usize,
    num_workers: usize,
    seed: u64,
}

impl<B: Backend> Shards<B> {
    fn new(
        dataset: CityscapesDataset,
        devices: &[B::Device],
        config: &TrainingConfig,
    ) -> BiSeNetResult<Self> {
        let shard_len = dataset.len() / devices.len().max(1);
        if shard_len < config.n_img_per_device {
            return Err(DatasetError::ShardTooSmall {
                len: shard_len,
                batch_size: config.n_img_per_device,
            }
            .into());
        }

        Ok(Self {
            dataset: Arc::new(dataset),
            devices: devices.to_vec(),
            shard_len,
            batch_size: config.n_img_per_device,
            num_workers: config.num_workers,
            seed: config.seed,
        })
    }

    fn shuffle_seed(&self, epoch: usize, rank: usize) -> u64 {
        let stream = (epoch * self.devices.len() + rank) as u64;
        self.seed.wrapping_add(stream)
    }

    /// One loader per rank, yielding batches on that rank's device.
    fn epoch(&self, epoch: usize) -> Vec<Loader<B>> {
        self.devices
            .iter()
            .enumerate()
            .map(|(rank, device)| {
                let start = rank * self.shard_len;
                let shard =
                    PartialDataset::new(self.dataset.clone(), start, start + self.shard_len);
                let builder = DataLoaderBuilder::<B, _, _>::new(CityscapesBatcher::new())
                    .batch_size(self.batch_size)
                    .shuffle(self.shuffle_seed(epoch, rank))
                    .set_device(device.clone());
                let builder = match self.num_workers {
                    0 => builder,
                    workers => builder.num_workers(workers),
                };
                builder.build(shard)
            })
            .collect()
    }
}

fn start_epoch<B: Backend>(loaders: &[Loader<B>]) -> Vec<LoaderIter<'_, B>> {
    loaders.iter().map(|loader| loader.iter()).collect()
}

/// One full batch per device, or `None` once any shard is exhausted.
///
/// Short batches are dropped, like a `drop_last` loader: every loader worker ends its
/// slice of a shard with one, so they can show up before the shard is exhausted.
fn next_batches<B: Backend>(
    iterators: &mut [LoaderIter<'_, B>],
    batch_size: usize,
) -> Option<Vec<CityscapesBatch<B>>> {
    iterators
        .iter_mut()
        .map(|iterator| iterator.find(|batch| batch.len() == batch_size))
        .collect()
}
