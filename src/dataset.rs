//! Dataset accessor: runs the cache pipeline and serves (image, label) pairs.

use crate::labels::{read_eval_manifest, read_label_index, LabelRow};
use crate::loader::{DefaultLoader, ImageLoader};
use crate::shuffle::{effective_split, load_or_create_permutation, test_slice, train_slice};
use crate::store::{
    assemble_images, load_labels, load_stats, save_labels, save_stats, CachePaths, PixelArray,
};
use crate::types::{
    Attribute, BuildSummary, CacheState, ChannelStats, DatasetError, DatasetResult, Mode,
};
use image::RgbImage;
use std::path::{Path, PathBuf};

/// External capability mapping a cached image to its tensor representation.
pub trait Transform {
    /// Produce a CHW f32 tensor from an RGB image.
    fn apply(&self, img: &RgbImage) -> Vec<f32>;
}

/// Default transform: scale to 0..=1 and normalize with the stored
/// train-split statistics.
#[derive(Debug, Clone, Copy)]
pub struct Normalize {
    pub stats: ChannelStats,
}

impl Transform for Normalize {
    fn apply(&self, img: &RgbImage) -> Vec<f32> {
        let (w, h) = img.dimensions();
        let plane = (w * h) as usize;
        let mut out = vec![0.0f32; plane * 3];
        for (y, x, px) in img.enumerate_pixels() {
            let base = (y * w + x) as usize;
            for c in 0..3 {
                let v = px[c] as f64 / 255.0;
                out[c * plane + base] = ((v - self.stats.mean[c]) / self.stats.std[c]) as f32;
            }
        }
        out
    }
}

/// Construction options; mirrors the defaults of the original loader.
pub struct DatasetOptions {
    /// Train fraction in (0, 1) exclusive; out-of-range values silently fall
    /// back to 0.8.
    pub split: f64,
    /// Force regeneration of the permutation and every downstream artifact.
    pub reset: bool,
    /// Seed for permutation generation; None draws from entropy. The
    /// persisted permutation keeps runs reproducible either way.
    pub seed: Option<u64>,
    pub loader: Box<dyn ImageLoader>,
    /// Overrides the default normalize-with-stored-stats transform.
    pub transform: Option<Box<dyn Transform>>,
    /// Optional remapping of the integer class index.
    pub target_transform: Option<Box<dyn Fn(i64) -> i64>>,
}

impl Default for DatasetOptions {
    fn default() -> Self {
        Self {
            split: crate::types::DEFAULT_SPLIT,
            reset: false,
            seed: None,
            loader: Box::new(DefaultLoader),
            transform: None,
            target_transform: None,
        }
    }
}

/// One attribute's cached split, ready to serve items to a training loop.
pub struct FashionAttr {
    attribute: Attribute,
    mode: Mode,
    data: PixelArray,
    labels: Option<Vec<i64>>,
    stats: ChannelStats,
    transform: Box<dyn Transform>,
    target_transform: Option<Box<dyn Fn(i64) -> i64>>,
    reused_cache: bool,
}

impl FashionAttr {
    /// Run the full pipeline for (attribute, mode): label index, shuffle
    /// cache, split planning, cache build or reuse.
    ///
    /// Cache files are not protected against concurrent writers; callers
    /// must serialize construction per attribute across processes.
    pub fn new(
        root: impl AsRef<Path>,
        attribute: Attribute,
        mode: Mode,
        options: DatasetOptions,
    ) -> DatasetResult<Self> {
        let paths = CachePaths::new(root.as_ref(), attribute);
        let split = effective_split(options.split);

        let rows = read_label_index(&paths.label_csv(), attribute)?;
        let (perm, shuffle_state) =
            load_or_create_permutation(&paths.shuffle(), rows.len(), options.reset, options.seed)?;

        // Missing statistics invalidate as well: cached test/eval arrays
        // normalized against stats that no longer exist are unusable.
        let stats_path = paths.stats();
        let (known_stats, stats_state) = if stats_path.exists() {
            (Some(load_stats(&stats_path)?), CacheState::Reuse)
        } else {
            (None, CacheState::Rebuild)
        };
        let state = shuffle_state.merge(stats_state);

        let (data, labels, stats, reused) = match mode {
            Mode::Train => Self::prepare_train(&paths, &rows, &perm, split, state, &*options.loader)?,
            Mode::Test => {
                // Stats are resolved before any decoding: a test build
                // without train statistics fails before the expensive work.
                let stats = known_stats.ok_or(DatasetError::StatsMissing { path: stats_path })?;
                let (data, labels, reused) =
                    Self::prepare_test(&paths, &rows, &perm, split, state, &*options.loader)?;
                (data, labels, stats, reused)
            }
            Mode::Eval => {
                let stats = known_stats.ok_or(DatasetError::StatsMissing { path: stats_path })?;
                let (data, reused) = Self::prepare_eval(&paths, attribute, state, &*options.loader)?;
                (data, None, stats, reused)
            }
        };

        let transform = options
            .transform
            .unwrap_or_else(|| Box::new(Normalize { stats }));

        log::info!(
            "dataset ready: attribute={attribute} mode={mode} items={} reused_cache={reused}",
            data.count
        );
        Ok(Self {
            attribute,
            mode,
            data,
            labels,
            stats,
            transform,
            target_transform: options.target_transform,
            reused_cache: reused,
        })
    }

    fn prepare_train(
        paths: &CachePaths,
        rows: &[LabelRow],
        perm: &[u64],
        split: f64,
        state: CacheState,
        loader: &dyn ImageLoader,
    ) -> DatasetResult<(PixelArray, Option<Vec<i64>>, ChannelStats, bool)> {
        let data_path = paths.train_data();
        let label_path = paths.train_labels();
        if state == CacheState::Reuse && data_path.exists() && label_path.exists() {
            let data = PixelArray::load(&data_path)?;
            let labels = load_labels(&label_path)?;
            Self::check_counts(&data, &labels, &label_path)?;
            let stats = load_stats(&paths.stats())?;
            return Ok((data, Some(labels), stats, true));
        }
        let selected = train_slice(perm, split);
        let (data, labels) = Self::build_labeled(paths, rows, selected, loader)?;
        let stats = ChannelStats::compute(&data);
        data.save(&data_path)?;
        save_labels(&label_path, &labels)?;
        save_stats(&paths.stats(), &stats)?;
        Ok((data, Some(labels), stats, false))
    }

    fn prepare_test(
        paths: &CachePaths,
        rows: &[LabelRow],
        perm: &[u64],
        split: f64,
        state: CacheState,
        loader: &dyn ImageLoader,
    ) -> DatasetResult<(PixelArray, Option<Vec<i64>>, bool)> {
        let data_path = paths.test_data();
        let label_path = paths.test_labels();
        if state == CacheState::Reuse && data_path.exists() && label_path.exists() {
            let data = PixelArray::load(&data_path)?;
            let labels = load_labels(&label_path)?;
            Self::check_counts(&data, &labels, &label_path)?;
            return Ok((data, Some(labels), true));
        }
        let selected = test_slice(perm, split);
        let (data, labels) = Self::build_labeled(paths, rows, selected, loader)?;
        data.save(&data_path)?;
        save_labels(&label_path, &labels)?;
        Ok((data, Some(labels), false))
    }

    /// Cached pixel and label files are written together but can drift
    /// apart on disk; individually valid files with mismatched counts must
    /// not construct a dataset that panics on an in-range index.
    fn check_counts(data: &PixelArray, labels: &[i64], label_path: &Path) -> DatasetResult<()> {
        if labels.len() != data.count {
            return Err(DatasetError::Corrupt {
                path: label_path.to_path_buf(),
                msg: format!(
                    "label file holds {} entries for {} cached images",
                    labels.len(),
                    data.count
                ),
            });
        }
        Ok(())
    }

    fn build_labeled(
        paths: &CachePaths,
        rows: &[LabelRow],
        selected: &[u64],
        loader: &dyn ImageLoader,
    ) -> DatasetResult<(PixelArray, Vec<i64>)> {
        let mut image_paths = Vec::with_capacity(selected.len());
        let mut labels = Vec::with_capacity(selected.len());
        for &idx in selected {
            let row = &rows[idx as usize];
            image_paths.push(paths.image(&row.image));
            labels.push(row.class_index());
        }
        let data = assemble_images(&image_paths, loader)?;
        Ok((data, labels))
    }

    fn prepare_eval(
        paths: &CachePaths,
        attribute: Attribute,
        state: CacheState,
        loader: &dyn ImageLoader,
    ) -> DatasetResult<(PixelArray, bool)> {
        let data_path = paths.eval_data();
        if state == CacheState::Reuse && data_path.exists() {
            return Ok((PixelArray::load(&data_path)?, true));
        }
        let manifest = read_eval_manifest(&paths.eval_manifest(), attribute)?;
        let image_paths: Vec<PathBuf> =
            manifest.iter().map(|rel| paths.eval_image(rel)).collect();
        let data = assemble_images(&image_paths, loader)?;
        data.save(&data_path)?;
        Ok((data, false))
    }

    pub fn len(&self) -> usize {
        self.data.count
    }

    pub fn is_empty(&self) -> bool {
        self.data.count == 0
    }

    /// Transformed image and class index for one item. Eval items have no
    /// target. Out-of-range indices are a hard error.
    pub fn get(&self, index: usize) -> DatasetResult<(Vec<f32>, Option<i64>)> {
        if index >= self.len() {
            return Err(DatasetError::IndexOutOfBounds {
                index,
                len: self.len(),
            });
        }
        let row = self.data.row(index).to_vec();
        let img = RgbImage::from_raw(self.data.width, self.data.height, row)
            .expect("row length matches width*height*channels");
        let tensor = self.transform.apply(&img);
        let target = self.labels.as_ref().map(|labels| {
            let t = labels[index];
            match &self.target_transform {
                Some(f) => f(t),
                None => t,
            }
        });
        Ok((tensor, target))
    }

    pub fn attribute(&self) -> Attribute {
        self.attribute
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn class_count(&self) -> usize {
        self.attribute.class_count()
    }

    /// Train-split normalization statistics in effect for this dataset.
    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    /// Whether construction served the cached arrays without rebuilding.
    pub fn reused_cache(&self) -> bool {
        self.reused_cache
    }

    /// Raw cached pixel row, untransformed; handy for export tooling.
    pub fn raw_row(&self, index: usize) -> DatasetResult<&[u8]> {
        if index >= self.len() {
            return Err(DatasetError::IndexOutOfBounds {
                index,
                len: self.len(),
            });
        }
        Ok(self.data.row(index))
    }

    pub fn summary(&self) -> BuildSummary {
        BuildSummary {
            attribute: self.attribute,
            mode: self.mode,
            items: self.len(),
            classes: self.class_count(),
            reused_cache: self.reused_cache,
        }
    }
}
