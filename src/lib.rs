//! Cache-backed dataset preparation for FashionAI attribute classification.
//!
//! This crate provides:
//! - CSV label indexing per attribute task
//! - A persisted deterministic shuffle with train/test split planning
//! - Binary pixel/label/statistics cache artifacts keyed by attribute
//! - An accessor serving normalized (image, label) pairs to a training loop

pub mod dataset;
pub mod labels;
pub mod loader;
pub mod shuffle;
pub mod store;
pub mod types;

pub use dataset::{DatasetOptions, FashionAttr, Normalize, Transform};
pub use labels::{read_eval_manifest, read_label_index, LabelRow, CLASS_MARKER};
pub use loader::{DefaultLoader, ImageLoader};
pub use shuffle::{effective_split, load_or_create_permutation, split_bounds};
pub use store::{CachePaths, PixelArray};
pub use types::*;
