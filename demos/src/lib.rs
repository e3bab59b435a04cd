//! BiSeNet command line tools
//!
//! - `train`: data-parallel training on Cityscapes, followed by evaluation
//! - `evaluate`: multi-scale evaluation of a trained model
//! - `export`: re-save trained weights in other record formats
//!
//! ```bash
//! # Train on the default backend with the default recipe
//! cargo run --release --bin train -- --data ./data --output ./res
//!
//! # Four CUDA devices
//! cargo run --release --bin train --features cuda --no-default-features -- --devices 0-3
//!
//! # Evaluate the trained model
//! cargo run --release --bin evaluate -- --model ./res/model_final.mpk --data ./data
//! ```

pub mod backend;
pub mod logger;

pub use backend::{
    create_devices, get_backend_name, parse_device_indices, SelectedBackend, SelectedDevice,
    TrainingBackend,
};
pub use logger::{setup_logger, LoggerGuard};
