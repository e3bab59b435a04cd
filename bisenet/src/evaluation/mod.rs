//! Segmentation quality evaluation.

mod confusion;
mod msc;

pub use confusion::ConfusionMatrix;
pub use msc::{evaluate, ClassIou, EvalReport, MscEval, MscEvalConfig};
