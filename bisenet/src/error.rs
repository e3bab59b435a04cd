//! Error types for BiSeNet-Burn.
//!
//! Dataset failures get their own enum so that loading code can report
//! precise paths, and everything else funnels into [`BiSeNetError`].

use std::path::PathBuf;

use thiserror::Error;

/// Error type for dataset operations.
#[derive(Error, Debug)]
pub enum DatasetError {
    /// The image directory of a split does not exist.
    #[error("Image directory not found: {path}")]
    ImageDirectoryNotFound {
        /// The expected image directory path.
        path: PathBuf,
    },

    /// An image has no matching label file.
    #[error("No label found for image {image} (expected {expected})")]
    MissingLabel {
        /// The image without label.
        image: PathBuf,
        /// The label path that was looked up.
        expected: PathBuf,
    },

    /// No image/label pairs were found.
    #[error("No valid image/label pairs found in: {path}")]
    NoValidPairs {
        /// The directory where no pairs were found.
        path: PathBuf,
    },

    /// A file name could not be interpreted.
    #[error("Invalid file name: {path}")]
    InvalidFileName {
        /// The offending path.
        path: PathBuf,
    },

    /// Walking the dataset tree failed.
    #[error("Failed to read directory: {path}")]
    DirectoryReadFailed {
        /// The directory path that failed to read.
        path: PathBuf,
        /// The underlying walk error.
        #[source]
        source: walkdir::Error,
    },

    /// Opening or decoding an image failed.
    #[error("Failed to open image: {path}")]
    ImageOpenFailed {
        /// The image file path that failed to open.
        path: PathBuf,
        /// The underlying image processing error.
        #[source]
        source: image::ImageError,
    },

    /// Image and label disagree on size.
    #[error("Image {path} is {image:?} but its label is {label:?}")]
    SizeMismatch {
        /// The image path.
        path: PathBuf,
        /// Image size `(width, height)`.
        image: (u32, u32),
        /// Label size `(width, height)`.
        label: (u32, u32),
    },

    /// The dataset cannot produce a single full batch.
    #[error("Dataset shard of {len} items cannot fill a batch of {batch_size}")]
    ShardTooSmall {
        /// Items in the shard.
        len: usize,
        /// Required batch size.
        batch_size: usize,
    },

    /// A fresh epoch did not yield one full batch, e.g. because samples are unreadable.
    #[error("No full batch of {batch_size} could be loaded from a shard of {shard_len} items")]
    NoFullBatch {
        /// Items in the shard.
        shard_len: usize,
        /// Required batch size.
        batch_size: usize,
    },
}

/// A specialized `Result` type for dataset operations.
pub type DatasetResult<T> = Result<T, DatasetError>;

/// The error type for `BiSeNet-Burn` operations.
#[derive(Error, Debug)]
pub enum BiSeNetError {
    /// Error for when an invalid configuration is provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        /// The reason why the configuration is invalid.
        reason: String,
    },

    /// Error for when no training device was supplied.
    #[error("At least one device is required")]
    NoDevice,

    /// Dataset failure.
    #[error(transparent)]
    Dataset(#[from] DatasetError),

    /// Error for when saving or loading a record fails.
    #[error("Failed to {action} {path}: {reason}")]
    Record {
        /// `"save"` or `"load"`.
        action: &'static str,
        /// The record path.
        path: PathBuf,
        /// The recorder error message.
        reason: String,
    },

    /// Error for when loading pretrained weights fails.
    #[error("Failed to load weights: {reason}")]
    WeightLoadingFailed {
        /// The reason for the weight loading failure.
        reason: String,
    },

    /// Filesystem failure.
    #[error("I/O error on {path}")]
    Io {
        /// The path being accessed.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Predictions and labels cannot be compared.
    #[error("Invalid evaluation data: {reason}")]
    EvaluationData {
        /// What was wrong with the tensors.
        reason: String,
    },

    /// A data-parallel worker stopped responding.
    #[error("Worker for device {device} disconnected")]
    WorkerDisconnected {
        /// Debug representation of the worker device.
        device: String,
    },
}

impl BiSeNetError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }

    pub(crate) fn record<E: std::fmt::Display>(
        action: &'static str,
        path: impl Into<PathBuf>,
    ) -> impl FnOnce(E) -> Self {
        let path = path.into();
        move |e| Self::Record {
            action,
            path,
            reason: e.to_string(),
        }
    }
}

/// A specialized `Result` type for `BiSeNet-Burn` operations.
pub type BiSeNetResult<T> = Result<T, BiSeNetError>;
