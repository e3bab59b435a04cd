//! Saving and loading trained weights in Burn record formats.

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use burn::{
    prelude::*,
    record::{BinFileRecorder, FullPrecisionSettings, HalfPrecisionSettings, NamedMpkFileRecorder},
};

use crate::{
    error::{BiSeNetError, BiSeNetResult},
    models::{BiSeNet, BiSeNetConfig},
};

/// Serialized weight formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    /// Named MessagePack, full precision: `<stem>.mpk`.
    NamedMpk,
    /// Named MessagePack, half precision: `<stem>-f16.mpk`.
    NamedMpkHalf,
    /// Bincode, full precision: `<stem>.bin`.
    Bin,
}

impl ExportFormat {
    pub const ALL: [Self; 3] = [Self::NamedMpk, Self::NamedMpkHalf, Self::Bin];

    /// File written for `stem` inside `dir`.
    pub fn path(&self, dir: &Path, stem: &str) -> PathBuf {
        match self {
            Self::NamedMpk => dir.join(format!("{stem}.mpk")),
            Self::NamedMpkHalf => dir.join(format!("{stem}-f16.mpk")),
            Self::Bin => dir.join(format!("{stem}.bin")),
        }
    }

    /// Guesses the format from a file name produced by [`ExportFormat::path`].
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        if name.ends_with("-f16.mpk") {
            Some(Self::NamedMpkHalf)
        } else if name.ends_with(".mpk") {
            Some(Self::NamedMpk)
        } else if name.ends_with(".bin") {
            Some(Self::Bin)
        } else {
            None
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NamedMpk => "mpk",
            Self::NamedMpkHalf => "mpk-f16",
            Self::Bin => "bin",
        })
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mpk" => Ok(Self::NamedMpk),
            "mpk-f16" | "f16" => Ok(Self::NamedMpkHalf),
            "bin" => Ok(Self::Bin),
            other => Err(format!(
                "unknown export format '{other}' (expected mpk, mpk-f16 or bin)"
            )),
        }
    }
}

/// Writes `model` once per format and returns the written files.
pub fn export_model<B: Backend>(
    model: &BiSeNet<B>,
    dir: &Path,
    stem: &str,
    formats: &[ExportFormat],
) -> BiSeNetResult<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).map_err(BiSeNetError::io(dir))?;

    formats
        .iter()
        .map(|format| {
            let path = format.path(dir, stem);
            let model = model.clone();
            // Recorders append their own extension.
            let target = path.with_extension("");
            let saved = match format {
                ExportFormat::NamedMpk => model
                    .save_file(&target, &NamedMpkFileRecorder::<FullPrecisionSettings>::new()),
                ExportFormat::NamedMpkHalf => model
                    .save_file(&target, &NamedMpkFileRecorder::<HalfPrecisionSettings>::new()),
                ExportFormat::Bin => {
                    model.save_file(&target, &BinFileRecorder::<FullPrecisionSettings>::new())
                }
            };
            saved.map_err(BiSeNetError::record("save", &path))?;

            tracing::info!(format = %format, path = %path.display(), "model exported");
            Ok(path)
        })
        .collect()
}

/// Builds a model from `config` and loads weights written by [`export_model`] or the
/// trainer. The format is taken from the file name.
pub fn load_model<B: Backend>(
    config: &BiSeNetConfig,
    path: &Path,
    device: &B::Device,
) -> BiSeNetResult<BiSeNet<B>> {
    let format = ExportFormat::from_path(path).ok_or_else(|| BiSeNetError::Record {
        action: "load",
        path: path.to_path_buf(),
        reason: "unrecognized weight file extension".to_string(),
    })?;

    let model = config.init::<B>(device);
    let target = path.with_extension("");
    let loaded = match format {
        ExportFormat::NamedMpk => model.load_file(
            &target,
            &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
            device,
        ),
        ExportFormat::NamedMpkHalf => model.load_file(
            &target,
            &NamedMpkFileRecorder::<HalfPrecisionSettings>::new(),
            device,
        ),
        ExportFormat::Bin => model.load_file(
            &target,
            &BinFileRecorder::<FullPrecisionSettings>::new(),
            device,
        ),
    };

    loaded.map_err(BiSeNetError::record("load", path))
}
