//! In-process data parallelism.
//!
//! The first device is the main device: it holds the master model and runs its shard
//! inline. Every other device gets a worker thread that forks the model, computes the
//! loss on its own batch and sends its gradients back. Each rank scales its loss by
//! `1 / world_size`, so summing the gradients on the main device averages them.

use std::{
    sync::mpsc::{channel, Receiver, Sender},
    thread::spawn,
};

use burn::{
    optim::{GradientsAccumulator, GradientsParams},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::{
    dataset::CityscapesBatch,
    error::{BiSeNetError, BiSeNetResult},
    losses::BiSeNetLoss,
    models::BiSeNet,
};

/// Averaged gradients and loss of one data-parallel iteration.
pub struct ParallelStepOutput {
    /// Gradients on the main device.
    pub grads: GradientsParams,
    /// Mean total loss over ranks.
    pub loss: f32,
}

struct Message<B: AutodiffBackend> {
    model: BiSeNet<B>,
    batch: CityscapesBatch<B>,
}

struct RankOutput {
    grads: GradientsParams,
    loss: f32,
}

struct Worker<B: AutodiffBackend> {
    sender: Sender<Message<B>>,
    device: B::Device,
}

impl<B: AutodiffBackend> Worker<B> {
    fn start(
        device: B::Device,
        criterion: BiSeNetLoss,
        scale: f32,
        sender_output: Sender<RankOutput>,
    ) -> Self {
        let (sender, receiver) = channel::<Message<B>>();
        let thread_device = device.clone();

        spawn(move || {
            while let Ok(message) = receiver.recv() {
                let model = message.model.fork(&thread_device);
                let output = rank_step(&model, message.batch, &criterion, scale);
                if sender_output.send(output).is_err() {
                    break;
                }
            }
            tracing::debug!(device = ?thread_device, "closing data-parallel worker");
        });

        Self { sender, device }
    }
}

fn rank_step<B: AutodiffBackend>(
    model: &BiSeNet<B>,
    batch: CityscapesBatch<B>,
    criterion: &BiSeNetLoss,
    scale: f32,
) -> RankOutput {
    let output = model.forward(batch.images);
    let loss = criterion.forward(output, batch.labels).total.mul_scalar(scale);
    let loss_value = loss.clone().into_scalar().elem::<f32>();

    RankOutput {
        grads: GradientsParams::from_grads(loss.backward(), model),
        loss: loss_value,
    }
}

/// Computes averaged gradients over one batch per device.
pub struct DataParallel<B: AutodiffBackend> {
    main_device: B::Device,
    workers: Vec<Worker<B>>,
    receiver: Receiver<RankOutput>,
    criterion: BiSeNetLoss,
}

impl<B: AutodiffBackend> DataParallel<B> {
    pub fn new(devices: &[B::Device], criterion: BiSeNetLoss) -> BiSeNetResult<Self> {
        let (main_device, others) = devices.split_first().ok_or(BiSeNetError::NoDevice)?;
        let scale = 1.0 / devices.len() as f32;
        let (sender_output, receiver) = channel();

        let workers = others
            .iter()
            .map(|device| {
                Worker::start(
                    device.clone(),
                    criterion.clone(),
                    scale,
                    sender_output.clone(),
                )
            })
            .collect();

        Ok(Self {
            main_device: main_device.clone(),
            workers,
            receiver,
            criterion,
        })
    }

    pub fn world_size(&self) -> usize {
        self.workers.len() + 1
    }

    pub const fn main_device(&self) -> &B::Device {
        &self.main_device
    }

    /// `batches[r]` must live on device `r`; `model` on the main device.
    pub fn step(
        &self,
        model: &BiSeNet<B>,
        mut batches: Vec<CityscapesBatch<B>>,
    ) -> BiSeNetResult<ParallelStepOutput> {
        if batches.len() != self.world_size() {
            return Err(BiSeNetError::InvalidConfiguration {
                reason: format!(
                    "expected {} batches, got {}",
                    self.world_size(),
                    batches.len()
                ),
            });
        }

        let remote = batches.split_off(1);
        for (worker, batch) in self.workers.iter().zip(remote) {
            let message = Message {
                model: model.clone(),
                batch,
            };
            worker
                .sender
                .send(message)
                .map_err(|_| BiSeNetError::WorkerDisconnected {
                    device: format!("{:?}", worker.device),
                })?;
        }

        let scale = 1.0 / self.world_size() as f32;
        let mut outputs = Vec::with_capacity(self.world_size());
        for batch in batches {
            outputs.push(rank_step(model, batch, &self.criterion, scale));
        }
        for worker in &self.workers {
            let output = self
                .receiver
                .recv()
                .map_err(|_| BiSeNetError::WorkerDisconnected {
                    device: format!("{:?}", worker.device),
                })?;
            outputs.push(output);
        }

        let mut accumulator = GradientsAccumulator::new();
        let mut loss = 0.0;
        for output in outputs {
            loss += output.loss;
            let grads = output.grads.to_device(&self.main_device, model);
            accumulator.accumulate::<B>(model, grads);
        }

        Ok(ParallelStepOutput {
            grads: accumulator.grads(),
            loss,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::{Autodiff, NdArray},
        module::{ModuleVisitor, ParamId},
        tensor::Distribution,
    };

    use crate::{losses::OhemCrossEntropyLossConfig, models::BiSeNetConfig};

    type TestBackend = Autodiff<NdArray>;

    fn batch(seed_value: f32, device: &<TestBackend as Backend>::Device) -> CityscapesBatch<TestBackend> {
        let images = Tensor::random([2, 3, 32, 32], Distribution::Normal(0.0, 1.0), device)
            .add_scalar(seed_value);
        let labels = Tensor::<TestBackend, 3, Int>::ones([2, 32, 32], device);
        CityscapesBatch { images, labels }
    }

    struct GradSum<'a> {
        grads: &'a GradientsParams,
        total: f64,
    }

    impl<B: AutodiffBackend> ModuleVisitor<B> for GradSum<'_> {
        fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
            if let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) {
                self.total += grad.abs().sum().into_scalar().elem::<f64>();
            }
        }
    }

    fn grad_sum(model: &BiSeNet<TestBackend>, grads: &GradientsParams) -> f64 {
        let mut visitor = GradSum { grads, total: 0.0 };
        model.visit(&mut visitor);
        visitor.total
    }

    #[test]
    fn replicated_batches_average_to_single_device_gradients() {
        let device = Default::default();
        let model = BiSeNetConfig::new()
            .with_n_classes(3)
            .init::<TestBackend>(&device);
        let criterion = BiSeNetLoss::new(&OhemCrossEntropyLossConfig::new(2 * 32 * 32 / 16));
        let b = batch(0.0, &device);

        let single = DataParallel::new(&[device], criterion.clone())
            .unwrap()
            .step(&model, vec![b.clone()])
            .unwrap();
        let double = DataParallel::new(&[device, device], criterion)
            .unwrap()
            .step(&model, vec![b.clone(), b])
            .unwrap();

        assert!((single.loss - double.loss).abs() < 1e-4 * single.loss.abs().max(1.0));

        let single_sum = grad_sum(&model, &single.grads);
        let double_sum = grad_sum(&model, &double.grads);
        assert!(single_sum > 0.0);
        assert!((single_sum - double_sum).abs() < 1e-3 * single_sum);
    }

    #[test]
    fn rejects_wrong_number_of_batches() {
        let device = Default::default();
        let model = BiSeNetConfig::new()
            .with_n_classes(3)
            .init::<TestBackend>(&device);
        let parallel = DataParallel::new(
            &[device],
            BiSeNetLoss::new(&OhemCrossEntropyLossConfig::new(1)),
        )
        .unwrap();

        let result = parallel.step(&model, vec![batch(0.0, &device), batch(1.0, &device)]);
        assert!(matches!(
            result,
            Err(BiSeNetError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn requires_a_device() {
        let result = DataParallel::<TestBackend>::new(
            &[],
            BiSeNetLoss::new(&OhemCrossEntropyLossConfig::new(1)),
        );
        assert!(matches!(result, Err(BiSeNetError::NoDevice)));
    }
}
