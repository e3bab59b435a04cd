//! Multi-device training of BiSeNet on Cityscapes.

mod checkpoint;
mod config;
mod parallel;
mod progress;
mod trainer;

pub use checkpoint::Checkpointer;
pub use config::{TrainingConfig, TrainingState};
pub use parallel::{DataParallel, ParallelStepOutput};
pub use progress::{format_eta, ProgressReport, ProgressTracker};
pub use trainer::{train, Resume, FINAL_MODEL_STEM};
