//! Deterministic shuffle cache and train/test split planning.

use crate::types::{CacheState, DatasetError, DatasetResult, DEFAULT_SPLIT};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fs;
use std::io::Write;
use std::path::Path;

const SHUFFLE_MAGIC: &[u8; 4] = b"FSH1";

fn read_u64_le(data: &[u8]) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(data);
    u64::from_le_bytes(arr)
}

/// Load the persisted permutation for an attribute, or generate and persist
/// a fresh one.
///
/// Returning `CacheState::Rebuild` means every downstream artifact keyed to
/// this permutation is stale and must be rebuilt; reusing the stored file is
/// what makes successive runs train and test on the same images.
pub fn load_or_create_permutation(
    path: &Path,
    n: usize,
    reset: bool,
    seed: Option<u64>,
) -> DatasetResult<(Vec<u64>, CacheState)> {
    if !reset && path.exists() {
        let perm = load_permutation(path, n)?;
        log::debug!("shuffle: reusing {} ({} indices)", path.display(), n);
        return Ok((perm, CacheState::Reuse));
    }
    let perm = generate_permutation(n, seed);
    save_permutation(path, &perm)?;
    log::info!(
        "shuffle: regenerated {} ({} indices); downstream caches invalidated",
        path.display(),
        n
    );
    Ok((perm, CacheState::Rebuild))
}

fn generate_permutation(n: usize, seed: Option<u64>) -> Vec<u64> {
    let mut rng = match seed {
        Some(seed) => rand::rngs::StdRng::seed_from_u64(seed),
        None => rand::rngs::StdRng::from_rng(&mut rand::rng()),
    };
    let mut perm: Vec<u64> = (0..n as u64).collect();
    perm.shuffle(&mut rng);
    perm
}

fn save_permutation(path: &Path, perm: &[u64]) -> DatasetResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| DatasetError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let mut buf = Vec::with_capacity(12 + perm.len() * 8);
    buf.extend_from_slice(SHUFFLE_MAGIC);
    buf.extend_from_slice(&(perm.len() as u64).to_le_bytes());
    for idx in perm {
        buf.extend_from_slice(&idx.to_le_bytes());
    }
    let mut file = fs::File::create(path).map_err(|e| DatasetError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    file.write_all(&buf).map_err(|e| DatasetError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

fn load_permutation(path: &Path, expected_n: usize) -> DatasetResult<Vec<u64>> {
    let corrupt = |msg: String| DatasetError::Corrupt {
        path: path.to_path_buf(),
        msg,
    };
    let data = fs::read(path).map_err(|e| DatasetError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    if data.len() < 12 {
        return Err(corrupt("shuffle file too small".into()));
    }
    if &data[0..4] != SHUFFLE_MAGIC {
        return Err(corrupt("bad magic in shuffle file".into()));
    }
    let count = read_u64_le(&data[4..12]) as usize;
    if count != expected_n {
        return Err(corrupt(format!(
            "shuffle file holds {count} indices but the label index has {expected_n} rows; \
             pass reset to regenerate"
        )));
    }
    let payload = &data[12..];
    if payload.len() != count * 8 {
        return Err(corrupt("shuffle file truncated".into()));
    }
    let perm: Vec<u64> = payload.chunks_exact(8).map(read_u64_le).collect();
    let mut seen = vec![false; count];
    for &idx in &perm {
        let Some(slot) = seen.get_mut(idx as usize) else {
            return Err(corrupt(format!("index {idx} out of range in shuffle file")));
        };
        if *slot {
            return Err(corrupt(format!("duplicate index {idx} in shuffle file")));
        }
        *slot = true;
    }
    Ok(perm)
}

/// Requested fraction if within (0, 1) exclusive, otherwise the 0.8 default.
/// A defined fallback, not an error path.
pub fn effective_split(split: f64) -> f64 {
    if split <= 0.0 || split >= 1.0 {
        log::warn!("split fraction {split} outside (0, 1); falling back to {DEFAULT_SPLIT}");
        DEFAULT_SPLIT
    } else {
        split
    }
}

/// Train/test boundary positions: train takes [0, floor(f*n)), test takes
/// [ceil(f*n), n). When f*n is non-integer the position floor(f*n) is
/// silently dropped from both sides, matching the original behavior.
pub fn split_bounds(n: usize, split: f64) -> (usize, usize) {
    let f = effective_split(split);
    let train_end = (f * n as f64).floor() as usize;
    let test_start = (f * n as f64).ceil() as usize;
    (train_end, test_start)
}

/// Slice of the permutation assigned to the train split, in stored order.
pub fn train_slice(perm: &[u64], split: f64) -> &[u64] {
    let (train_end, _) = split_bounds(perm.len(), split);
    &perm[..train_end]
}

/// Slice of the permutation assigned to the test split, in stored order.
pub fn test_slice(perm: &[u64], split: f64) -> &[u64] {
    let (_, test_start) = split_bounds(perm.len(), split);
    &perm[test_start..]
}
