//! Learning rate schedule and SGD settings.
//!
//! The schedule ramps the learning rate up exponentially from `warmup_start_lr` to
//! `lr0` over `warmup_steps` iterations, then decays it polynomially to zero at
//! `max_iter`.

use core::marker::PhantomData;

use burn::{
    lr_scheduler::LrScheduler,
    module::{AutodiffModule, ModuleVisitor, ParamId},
    optim::{
        decay::WeightDecayConfig, momentum::MomentumConfig, GradientsParams, Optimizer,
        SgdConfig,
    },
    prelude::*,
    tensor::backend::AutodiffBackend,
    LearningRate,
};

use crate::models::BiSeNet;

/// Configuration to create a [warmup-poly scheduler](WarmupPolyLrScheduler).
#[derive(Config, Debug)]
pub struct WarmupPolyLrSchedulerConfig {
    /// Peak learning rate, reached at the end of warmup.
    #[config(default = 1e-2)]
    pub lr0: LearningRate,
    #[config(default = 1000)]
    pub warmup_steps: usize,
    #[config(default = 1e-5)]
    pub warmup_start_lr: LearningRate,
    #[config(default = 80000)]
    pub max_iter: usize,
    /// Exponent of the polynomial decay.
    #[config(default = 0.9)]
    pub power: f64,
}

impl WarmupPolyLrSchedulerConfig {
    /// # Panics
    /// If the rates are not positive or warmup does not end before `max_iter`.
    pub fn init(&self) -> WarmupPolyLrScheduler {
        assert!(self.lr0 > 0.0, "Peak learning rate must be positive");
        assert!(
            self.warmup_start_lr > 0.0,
            "Warmup start learning rate must be positive"
        );
        assert!(
            self.warmup_steps < self.max_iter,
            "Warmup must end before the last iteration"
        );

        WarmupPolyLrScheduler {
            lr0: self.lr0,
            warmup_steps: self.warmup_steps,
            warmup_start_lr: self.warmup_start_lr,
            max_iter: self.max_iter,
            power: self.power,
            iteration: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct WarmupPolyLrScheduler {
    lr0: LearningRate,
    warmup_steps: usize,
    warmup_start_lr: LearningRate,
    max_iter: usize,
    power: f64,
    iteration: usize,
}

impl WarmupPolyLrScheduler {
    /// Learning rate at `iteration`, without advancing.
    pub fn lr_at(&self, iteration: usize) -> LearningRate {
        if iteration <= self.warmup_steps {
            let ratio = self.lr0 / self.warmup_start_lr;
            let progress = iteration as f64 / self.warmup_steps.max(1) as f64;
            self.warmup_start_lr * ratio.powf(progress)
        } else {
            let decay_steps = (self.max_iter - self.warmup_steps) as f64;
            let progress = (iteration - self.warmup_steps) as f64 / decay_steps;
            self.lr0 * (1.0 - progress).max(0.0).powf(self.power)
        }
    }

    /// Iterations consumed so far.
    pub const fn iteration(&self) -> usize {
        self.iteration
    }

    pub const fn in_warmup(&self) -> bool {
        self.iteration <= self.warmup_steps
    }

    /// True right after the first step taken at a decayed rate, where "warmup done" is
    /// logged.
    pub const fn warmup_just_done(&self) -> bool {
        self.iteration == self.warmup_steps + 2
    }
}

impl LrScheduler for WarmupPolyLrScheduler {
    type Record<B: Backend> = usize;

    fn step(&mut self) -> LearningRate {
        let lr = self.lr_at(self.iteration);
        self.iteration += 1;
        if self.warmup_just_done() {
            tracing::info!(iteration = self.iteration, "warmup done");
        }
        lr
    }

    fn to_record<B: Backend>(&self) -> Self::Record<B> {
        self.iteration
    }

    fn load_record<B: Backend>(mut self, record: Self::Record<B>) -> Self {
        self.iteration = record;
        self
    }
}

/// Momentum SGD settings.
#[derive(Config, Debug)]
pub struct SgdSettings {
    #[config(default = 0.9)]
    pub momentum: f64,
    #[config(default = 5e-4)]
    pub weight_decay: f32,
    /// Gradient scale of the fusion module and the output heads.
    #[config(default = 10.0)]
    pub lr_multiplier: f64,
}

impl SgdSettings {
    /// Builds the Burn SGD optimizer (undampened momentum, L2 weight decay).
    pub fn init<B: AutodiffBackend, M: AutodiffModule<B>>(&self) -> impl Optimizer<M, B> {
        SgdConfig::new()
            .with_momentum(Some(
                MomentumConfig::new()
                    .with_momentum(self.momentum)
                    .with_dampening(0.0),
            ))
            .with_weight_decay(Some(WeightDecayConfig::new(self.weight_decay)))
            .init::<B, M>()
    }

    pub const fn lr_multiplier(&self) -> LrMultiplier {
        LrMultiplier {
            factor: self.lr_multiplier,
        }
    }
}

/// Scales the gradients of the boosted parameter group of a [BiSeNet].
///
/// Plain SGD is linear in the gradient, so this is equivalent to a per-group learning
/// rate of `lr * factor` for those parameters.
#[derive(Debug, Clone, Copy)]
pub struct LrMultiplier {
    factor: f64,
}

impl LrMultiplier {
    pub const fn factor(&self) -> f64 {
        self.factor
    }

    pub fn apply<B: AutodiffBackend>(
        &self,
        model: &BiSeNet<B>,
        mut grads: GradientsParams,
    ) -> GradientsParams {
        if (self.factor - 1.0).abs() > f64::EPSILON {
            let mut scaler = GradScaler::<B> {
                grads: &mut grads,
                factor: self.factor,
                phantom: PhantomData,
            };
            model.visit_lr_mul_params(&mut scaler);
        }
        grads
    }
}

struct GradScaler<'a, B: AutodiffBackend> {
    grads: &'a mut GradientsParams,
    factor: f64,
    phantom: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradScaler<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.remove::<B::InnerBackend, D>(id) {
            self.grads
                .register::<B::InnerBackend, D>(id, grad.mul_scalar(self.factor));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    use crate::models::BiSeNetConfig;

    type TestBackend = NdArray;
    type TestAutodiffBackend = Autodiff<TestBackend>;

    const EPS: f64 = 1e-12;

    fn scheduler() -> WarmupPolyLrScheduler {
        WarmupPolyLrSchedulerConfig::new()
            .with_warmup_steps(10)
            .with_max_iter(110)
            .init()
    }

    #[test]
    fn warmup_is_exponential() {
        let s = scheduler();
        assert!((s.lr_at(0) - 1e-5).abs() < EPS);
        assert!((s.lr_at(10) - 1e-2).abs() < EPS);

        let expected_mid = 1e-5 * 1000f64.powf(0.5);
        assert!((s.lr_at(5) - expected_mid).abs() < EPS);
    }

    #[test]
    fn decay_is_polynomial() {
        let s = scheduler();
        let expected = 1e-2 * 0.5f64.powf(0.9);
        assert!((s.lr_at(60) - expected).abs() < EPS);
        assert!(s.lr_at(110).abs() < EPS);
        assert!(s.lr_at(11) < s.lr_at(10));
    }

    #[test]
    fn step_returns_current_rate_then_advances() {
        let mut s = scheduler();
        let reference = s.clone();
        for it in 0..20 {
            assert!(s.in_warmup() == (it <= 10));
            assert!((s.step() - reference.lr_at(it)).abs() < EPS);
        }
        assert_eq!(s.iteration(), 20);
    }

    #[test]
    fn warmup_done_is_announced_once_after_first_decayed_step() {
        let mut s = scheduler();
        let mut announced = Vec::new();
        for _ in 0..20 {
            let lr = s.step();
            if s.warmup_just_done() {
                announced.push((s.iteration(), lr));
            }
        }

        // Steps 0..=10 run the warmup ramp; step 11 is the first decayed rate.
        assert_eq!(announced.len(), 1);
        assert_eq!(announced[0].0, 12);
        assert!(announced[0].1 < 1e-2);
    }

    #[test]
    fn record_restores_position() {
        let mut s = scheduler();
        for _ in 0..37 {
            s.step();
        }
        let record = s.to_record::<TestBackend>();
        let mut restored = scheduler().load_record::<TestBackend>(record);
        assert!((restored.step() - s.step()).abs() < EPS);
    }

    #[test]
    #[should_panic = "Warmup must end before the last iteration"]
    fn rejects_warmup_longer_than_training() {
        WarmupPolyLrSchedulerConfig::new()
            .with_warmup_steps(100)
            .with_max_iter(100)
            .init();
    }

    #[test]
    fn multiplier_scales_only_boosted_group() {
        let device = Default::default();
        let model = BiSeNetConfig::new()
            .with_n_classes(3)
            .init::<TestAutodiffBackend>(&device);

        let x = Tensor::<TestAutodiffBackend, 4>::ones([1, 3, 32, 32], &device);
        let loss = model.forward(x).main.sum();
        let grads = GradientsParams::from_grads(loss.backward(), &model);

        let before = grads_norms(&model, &grads);
        let scaled = SgdSettings::new().lr_multiplier().apply(&model, grads);
        let after = grads_norms(&model, &scaled);

        let mut boosted_ids = IdCollector::default();
        model.visit_lr_mul_params(&mut boosted_ids);

        for (id, norm) in &before {
            let scaled_norm = after.iter().find(|(i, _)| i == id).map(|(_, n)| *n).unwrap();
            let factor = if boosted_ids.ids.contains(id) { 10.0 } else { 1.0 };
            assert!(
                (scaled_norm - factor * norm).abs() <= 1e-3 * (1.0 + factor * norm),
                "{scaled_norm} vs {factor} * {norm}"
            );
        }
    }

    #[derive(Default)]
    struct IdCollector {
        ids: Vec<ParamId>,
    }

    impl<B: Backend> ModuleVisitor<B> for IdCollector {
        fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
            self.ids.push(id);
        }
    }

    struct NormCollector<'a> {
        grads: &'a GradientsParams,
        norms: Vec<(ParamId, f64)>,
    }

    impl<B: AutodiffBackend> ModuleVisitor<B> for NormCollector<'_> {
        fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
            if let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) {
                let norm = grad.abs().sum().into_scalar().elem::<f64>();
                self.norms.push((id, norm));
            }
        }
    }

    fn grads_norms(
        model: &BiSeNet<TestAutodiffBackend>,
        grads: &GradientsParams,
    ) -> Vec<(ParamId, f64)> {
        let mut collector = NormCollector {
            grads,
            norms: Vec::new(),
        };
        model.visit(&mut collector);
        collector.norms
    }
}
