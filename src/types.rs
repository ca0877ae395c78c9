//! Core types, error definitions, and fixed constants.

use clap::ValueEnum;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv parse error at {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("unknown attribute {0:?}")]
    UnknownAttribute(String),
    #[error("image file missing: {path}")]
    MissingImageFile { path: PathBuf },
    #[error("corrupt cache artifact at {path}: {msg}")]
    Corrupt { path: PathBuf, msg: String },
    #[error("channel statistics missing at {path}; build the train split first")]
    StatsMissing { path: PathBuf },
    #[error("index {index} out of bounds for dataset of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },
}

/// Fixed cache resolution; every cached image is resized to this shape.
pub const IMAGE_WIDTH: u32 = 227;
pub const IMAGE_HEIGHT: u32 = 227;
pub const IMAGE_CHANNELS: u32 = 3;

/// Fallback split fraction applied when the requested one is outside (0, 1).
pub const DEFAULT_SPLIT: f64 = 0.8;

/// The eight FashionAI attribute tasks, each with a fixed class count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize)]
#[value(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    CoatLengthLabels,
    CollarDesignLabels,
    LapelDesignLabels,
    NeckDesignLabels,
    NecklineDesignLabels,
    PantLengthLabels,
    SkirtLengthLabels,
    SleeveLengthLabels,
}

impl Attribute {
    pub const ALL: [Attribute; 8] = [
        Attribute::CoatLengthLabels,
        Attribute::CollarDesignLabels,
        Attribute::LapelDesignLabels,
        Attribute::NeckDesignLabels,
        Attribute::NecklineDesignLabels,
        Attribute::PantLengthLabels,
        Attribute::SkirtLengthLabels,
        Attribute::SleeveLengthLabels,
    ];

    /// Attribute name as it appears in the label CSV.
    pub fn name(&self) -> &'static str {
        match self {
            Attribute::CoatLengthLabels => "coat_length_labels",
            Attribute::CollarDesignLabels => "collar_design_labels",
            Attribute::LapelDesignLabels => "lapel_design_labels",
            Attribute::NeckDesignLabels => "neck_design_labels",
            Attribute::NecklineDesignLabels => "neckline_design_labels",
            Attribute::PantLengthLabels => "pant_length_labels",
            Attribute::SkirtLengthLabels => "skirt_length_labels",
            Attribute::SleeveLengthLabels => "sleeve_length_labels",
        }
    }

    pub fn class_count(&self) -> usize {
        match self {
            Attribute::CoatLengthLabels => 8,
            Attribute::CollarDesignLabels => 5,
            Attribute::LapelDesignLabels => 5,
            Attribute::NeckDesignLabels => 5,
            Attribute::NecklineDesignLabels => 10,
            Attribute::PantLengthLabels => 6,
            Attribute::SkirtLengthLabels => 6,
            Attribute::SleeveLengthLabels => 9,
        }
    }

    pub fn from_name(name: &str) -> DatasetResult<Attribute> {
        Attribute::ALL
            .into_iter()
            .find(|a| a.name() == name)
            .ok_or_else(|| DatasetError::UnknownAttribute(name.to_string()))
    }
}

impl std::fmt::Display for Attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Which partition of an attribute's rows to prepare and serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[value(rename_all = "lower")]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Train,
    Test,
    /// Unlabeled ranking images; no train/test split, no targets.
    Eval,
}

impl Mode {
    pub fn is_labeled(&self) -> bool {
        !matches!(self, Mode::Eval)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Mode::Train => "train",
            Mode::Test => "test",
            Mode::Eval => "eval",
        };
        f.write_str(s)
    }
}

/// Whether downstream cache artifacts may be reused or must be rebuilt.
///
/// Replaces the original process-wide reset flag: the shuffle stage reports
/// the scope it decided and the builder acts on the value it is handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Reuse,
    Rebuild,
}

impl CacheState {
    /// Rebuild wins: once any stage invalidates, everything downstream does.
    pub fn merge(self, other: CacheState) -> CacheState {
        if self == CacheState::Rebuild || other == CacheState::Rebuild {
            CacheState::Rebuild
        } else {
            CacheState::Reuse
        }
    }
}

/// Per-channel normalization statistics, computed over the train split on
/// the 0..=1 pixel scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChannelStats {
    pub mean: [f64; 3],
    pub std: [f64; 3],
}

/// What a cache build produced, for CLI reporting.
#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    pub attribute: Attribute,
    pub mode: Mode,
    pub items: usize,
    pub classes: usize,
    pub reused_cache: bool,
}
