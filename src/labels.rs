//! Parsing and filtering the CSV label files.

use crate::types::{Attribute, DatasetError, DatasetResult};
use std::fs::File;
use std::path::Path;

/// Marker character whose position in the label string encodes the class.
pub const CLASS_MARKER: char = 'y';

/// One row of the training label file, already filtered to an attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelRow {
    /// Image path relative to the split's dataset tree.
    pub image: String,
    pub attribute: String,
    pub label: String,
}

impl LabelRow {
    /// Class index = first position of the marker character, -1 if absent.
    /// Well-formed label strings always contain the marker; -1 is passed
    /// through untouched rather than validated here.
    pub fn class_index(&self) -> i64 {
        self.label
            .find(CLASS_MARKER)
            .map(|p| p as i64)
            .unwrap_or(-1)
    }
}

fn open_csv(path: &Path) -> DatasetResult<csv::Reader<File>> {
    let file = File::open(path).map_err(|e| DatasetError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file))
}

fn field<'r>(record: &'r csv::StringRecord, idx: usize, path: &Path) -> DatasetResult<&'r str> {
    record.get(idx).ok_or_else(|| DatasetError::Corrupt {
        path: path.to_path_buf(),
        msg: format!("row has {} fields, expected at least {}", record.len(), idx + 1),
    })
}

/// Read the training label file and keep rows for `attribute`, in file order.
///
/// File order matters: it fixes the meaning of the persisted permutation.
/// No matching rows yields an empty vec; the caller decides whether that is
/// an error.
pub fn read_label_index(path: &Path, attribute: Attribute) -> DatasetResult<Vec<LabelRow>> {
    let mut reader = open_csv(path)?;
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| DatasetError::Csv {
            path: path.to_path_buf(),
            source: e,
        })?;
        if field(&record, 1, path)? != attribute.name() {
            continue;
        }
        rows.push(LabelRow {
            image: field(&record, 0, path)?.to_string(),
            attribute: attribute.name().to_string(),
            label: field(&record, 2, path)?.to_string(),
        });
    }
    log::debug!(
        "label index: {} rows for {} in {}",
        rows.len(),
        attribute,
        path.display()
    );
    Ok(rows)
}

/// Read the label-free eval manifest and return the matching image paths,
/// in file order. Rows carry no ground truth, only (path, attribute, ...).
pub fn read_eval_manifest(path: &Path, attribute: Attribute) -> DatasetResult<Vec<String>> {
    let mut reader = open_csv(path)?;
    let mut images = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| DatasetError::Csv {
            path: path.to_path_buf(),
            source: e,
        })?;
        if field(&record, 1, path)? != attribute.name() {
            continue;
        }
        images.push(field(&record, 0, path)?.to_string());
    }
    Ok(images)
}
