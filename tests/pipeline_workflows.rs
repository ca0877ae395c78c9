//! End-to-end tests for the cache pipeline: label index -> shuffle cache ->
//! split planner -> cache builder -> accessor.

use fashionai_dataset::{
    Attribute, DatasetError, DatasetOptions, DefaultLoader, FashionAttr, ImageLoader, Mode,
};
use image::{Rgb, RgbImage};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const ATTR: Attribute = Attribute::CoatLengthLabels;

/// Each synthetic image carries a distinct uniform color so cached rows can
/// be traced back to their source row via the first pixel byte.
fn tag_color(i: usize) -> u8 {
    (i * 20) as u8
}

fn write_image(path: &Path, tag: u8) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut img = RgbImage::new(8, 8);
    for px in img.pixels_mut() {
        *px = Rgb([tag, 10, 200]);
    }
    img.save(path)?;
    Ok(())
}

fn label_string(class: usize) -> String {
    let mut s = "n".repeat(ATTR.class_count());
    s.replace_range(class..class + 1, "y");
    s
}

/// Lay out root/datasets/base with a label.csv of `n` rows for ATTR plus one
/// decoy row for another attribute.
fn write_base_dataset(root: &Path, n: usize) -> anyhow::Result<()> {
    let base = root.join("datasets").join("base");
    let mut csv_body = String::new();
    for i in 0..n {
        let rel = format!("Images/{}/{:03}.png", ATTR, i);
        write_image(&base.join(&rel), tag_color(i))?;
        csv_body.push_str(&format!("{rel},{},{}\n", ATTR, label_string(i % ATTR.class_count())));
    }
    csv_body.push_str("Images/other/000.png,skirt_length_labels,ynnnnn\n");
    let annotations = base.join("Annotations");
    fs::create_dir_all(&annotations)?;
    fs::write(annotations.join("label.csv"), csv_body)?;
    Ok(())
}

/// Lay out root/datasets/rank with a label-free question.csv of `n` rows.
fn write_rank_dataset(root: &Path, n: usize) -> anyhow::Result<()> {
    let rank = root.join("datasets").join("rank");
    let mut csv_body = String::new();
    for i in 0..n {
        let rel = format!("Images/{}/q{:03}.png", ATTR, i);
        write_image(&rank.join(&rel), tag_color(i))?;
        csv_body.push_str(&format!("{rel},{}\n", ATTR));
    }
    let tests_dir = rank.join("Tests");
    fs::create_dir_all(&tests_dir)?;
    fs::write(tests_dir.join("question.csv"), csv_body)?;
    Ok(())
}

fn options(split: f64) -> DatasetOptions {
    DatasetOptions {
        split,
        seed: Some(42),
        ..DatasetOptions::default()
    }
}

/// Loader wrapper that counts decode calls; a warm cache must never call it.
struct CountingLoader {
    inner: DefaultLoader,
    loads: Arc<AtomicUsize>,
}

impl ImageLoader for CountingLoader {
    fn load(&self, path: &Path) -> Result<RgbImage, DatasetError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load(path)
    }
}

#[test]
fn ten_rows_split_into_eight_train_two_test() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_base_dataset(tmp.path(), 10)?;

    let train = FashionAttr::new(tmp.path(), ATTR, Mode::Train, options(0.8))?;
    let test = FashionAttr::new(tmp.path(), ATTR, Mode::Test, options(0.8))?;
    assert_eq!(train.len(), 8);
    assert_eq!(test.len(), 2);

    // Every source row lands in exactly one split.
    let mut tags = HashSet::new();
    for i in 0..train.len() {
        tags.insert(train.raw_row(i)?[0]);
    }
    for i in 0..test.len() {
        assert!(tags.insert(test.raw_row(i)?[0]), "row served by both splits");
    }
    let expected: HashSet<u8> = (0..10).map(tag_color).collect();
    assert_eq!(tags, expected);
    Ok(())
}

#[test]
fn targets_match_the_label_rows() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_base_dataset(tmp.path(), 10)?;

    let train = FashionAttr::new(tmp.path(), ATTR, Mode::Train, options(0.8))?;
    for i in 0..train.len() {
        let source = train.raw_row(i)?[0] as usize / 20;
        let (tensor, target) = train.get(i)?;
        assert_eq!(tensor.len(), 3 * 227 * 227);
        assert_eq!(target, Some((source % ATTR.class_count()) as i64));
    }
    Ok(())
}

#[test]
fn inexact_boundary_drops_the_straddling_index() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_base_dataset(tmp.path(), 10)?;

    // 0.75 * 10 = 7.5: one permutation position belongs to neither split.
    let train = FashionAttr::new(tmp.path(), ATTR, Mode::Train, options(0.75))?;
    let test = FashionAttr::new(tmp.path(), ATTR, Mode::Test, options(0.75))?;
    assert_eq!(train.len(), 7);
    assert_eq!(test.len(), 2);
    Ok(())
}

#[test]
fn invalid_split_fractions_fall_back_to_default() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_base_dataset(tmp.path(), 10)?;

    let train = FashionAttr::new(tmp.path(), ATTR, Mode::Train, options(1.3))?;
    assert_eq!(train.len(), 8);

    let tmp2 = tempfile::tempdir()?;
    write_base_dataset(tmp2.path(), 10)?;
    let train = FashionAttr::new(tmp2.path(), ATTR, Mode::Train, options(0.0))?;
    assert_eq!(train.len(), 8);
    Ok(())
}

#[test]
fn rebuilds_are_byte_identical() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_base_dataset(tmp.path(), 10)?;

    FashionAttr::new(tmp.path(), ATTR, Mode::Train, options(0.8))?;
    FashionAttr::new(tmp.path(), ATTR, Mode::Test, options(0.8))?;

    let images = tmp.path().join("datasets/base/Images");
    let annotations = tmp.path().join("datasets/base/Annotations");
    let artifacts = [
        annotations.join(format!("{ATTR}_shuffle.bin")),
        images.join(format!("{ATTR}_train_data.bin")),
        images.join(format!("{ATTR}_train_label.bin")),
        images.join(format!("{ATTR}_test_data.bin")),
        images.join(format!("{ATTR}_test_label.bin")),
        images.join(format!("{ATTR}_ms.bin")),
    ];
    let before: Vec<Vec<u8>> = artifacts.iter().map(fs::read).collect::<Result<_, _>>()?;

    // Drop the derived arrays but keep the shuffle file: the rebuild must
    // reproduce them exactly from the persisted permutation.
    for path in &artifacts[1..] {
        fs::remove_file(path)?;
    }
    FashionAttr::new(tmp.path(), ATTR, Mode::Train, options(0.8))?;
    FashionAttr::new(tmp.path(), ATTR, Mode::Test, options(0.8))?;

    let after: Vec<Vec<u8>> = artifacts.iter().map(fs::read).collect::<Result<_, _>>()?;
    assert_eq!(before, after);
    Ok(())
}

#[test]
fn warm_cache_never_touches_the_image_loader() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_base_dataset(tmp.path(), 10)?;

    let first_loads = Arc::new(AtomicUsize::new(0));
    let first = FashionAttr::new(
        tmp.path(),
        ATTR,
        Mode::Train,
        DatasetOptions {
            split: 0.8,
            seed: Some(42),
            loader: Box::new(CountingLoader {
                inner: DefaultLoader,
                loads: first_loads.clone(),
            }),
            ..DatasetOptions::default()
        },
    )?;
    assert_eq!(first_loads.load(Ordering::SeqCst), 8);
    assert!(!first.reused_cache());

    let second_loads = Arc::new(AtomicUsize::new(0));
    let second = FashionAttr::new(
        tmp.path(),
        ATTR,
        Mode::Train,
        DatasetOptions {
            split: 0.8,
            seed: Some(42),
            loader: Box::new(CountingLoader {
                inner: DefaultLoader,
                loads: second_loads.clone(),
            }),
            ..DatasetOptions::default()
        },
    )?;
    assert_eq!(second_loads.load(Ordering::SeqCst), 0);
    assert!(second.reused_cache());

    assert_eq!(first.len(), second.len());
    for i in 0..first.len() {
        assert_eq!(first.get(i)?, second.get(i)?);
    }
    Ok(())
}

#[test]
fn reset_forces_a_full_rebuild() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_base_dataset(tmp.path(), 10)?;

    FashionAttr::new(tmp.path(), ATTR, Mode::Train, options(0.8))?;

    let loads = Arc::new(AtomicUsize::new(0));
    let rebuilt = FashionAttr::new(
        tmp.path(),
        ATTR,
        Mode::Train,
        DatasetOptions {
            split: 0.8,
            reset: true,
            seed: Some(7),
            loader: Box::new(CountingLoader {
                inner: DefaultLoader,
                loads: loads.clone(),
            }),
            ..DatasetOptions::default()
        },
    )?;
    assert_eq!(loads.load(Ordering::SeqCst), 8);
    assert!(!rebuilt.reused_cache());
    Ok(())
}

#[test]
fn stats_come_from_the_train_split_and_are_reused() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_base_dataset(tmp.path(), 10)?;

    let train = FashionAttr::new(tmp.path(), ATTR, Mode::Train, options(0.8))?;
    let test = FashionAttr::new(tmp.path(), ATTR, Mode::Test, options(0.8))?;
    assert_eq!(train.stats(), test.stats());
    // Synthetic images vary across the split, so spread must be nonzero.
    assert!(train.stats().std[0] > 0.0);
    Ok(())
}

#[test]
fn test_mode_without_train_stats_is_an_error() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_base_dataset(tmp.path(), 10)?;

    // The failure must also be cheap: no image may be decoded first.
    let loads = Arc::new(AtomicUsize::new(0));
    let err = FashionAttr::new(
        tmp.path(),
        ATTR,
        Mode::Test,
        DatasetOptions {
            split: 0.8,
            seed: Some(42),
            loader: Box::new(CountingLoader {
                inner: DefaultLoader,
                loads: loads.clone(),
            }),
            ..DatasetOptions::default()
        },
    )
    .err()
    .expect("test split must not construct without train stats");
    assert!(matches!(err, DatasetError::StatsMissing { .. }));
    assert_eq!(loads.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn mismatched_label_and_pixel_caches_refuse_to_construct() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_base_dataset(tmp.path(), 10)?;
    FashionAttr::new(tmp.path(), ATTR, Mode::Train, options(0.8))?;

    // Overwrite the label artifact with a valid file of the wrong length;
    // the warm load must reject the pair instead of serving a dataset that
    // panics on an in-range index.
    let label_path = tmp
        .path()
        .join("datasets/base/Images")
        .join(format!("{ATTR}_train_label.bin"));
    fashionai_dataset::store::save_labels(&label_path, &[0, 1])?;

    let err = FashionAttr::new(tmp.path(), ATTR, Mode::Train, options(0.8))
        .err()
        .expect("mismatched cache artifacts must not construct");
    assert!(matches!(err, DatasetError::Corrupt { .. }));
    Ok(())
}

#[test]
fn eval_mode_loads_all_manifest_rows_without_targets() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_base_dataset(tmp.path(), 10)?;
    write_rank_dataset(tmp.path(), 3)?;

    // Train first so the statistics artifact exists for normalization.
    FashionAttr::new(tmp.path(), ATTR, Mode::Train, options(0.8))?;

    let eval = FashionAttr::new(tmp.path(), ATTR, Mode::Eval, options(0.8))?;
    assert_eq!(eval.len(), 3);
    for i in 0..eval.len() {
        let (tensor, target) = eval.get(i)?;
        assert_eq!(tensor.len(), 3 * 227 * 227);
        assert_eq!(target, None);
    }

    // Second construction serves the cached rank array.
    let loads = Arc::new(AtomicUsize::new(0));
    let warm = FashionAttr::new(
        tmp.path(),
        ATTR,
        Mode::Eval,
        DatasetOptions {
            split: 0.8,
            seed: Some(42),
            loader: Box::new(CountingLoader {
                inner: DefaultLoader,
                loads: loads.clone(),
            }),
            ..DatasetOptions::default()
        },
    )?;
    assert_eq!(loads.load(Ordering::SeqCst), 0);
    assert_eq!(warm.len(), 3);
    Ok(())
}

#[test]
fn missing_source_image_aborts_the_build() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_base_dataset(tmp.path(), 10)?;
    // Remove one source image; the whole build must fail, not skip it.
    fs::remove_file(
        tmp.path()
            .join("datasets/base/Images")
            .join(ATTR.to_string())
            .join("003.png"),
    )?;

    let result = FashionAttr::new(tmp.path(), ATTR, Mode::Train, options(0.8));
    match result {
        Err(DatasetError::MissingImageFile { path }) => {
            assert!(path.ends_with(PathBuf::from(format!("{ATTR}/003.png"))));
        }
        // The removed row may have landed in the dropped/test range; force
        // it into scope by building the test split too.
        Ok(_) => {
            let err = FashionAttr::new(tmp.path(), ATTR, Mode::Test, options(0.8))
                .err()
                .expect("missing image must abort the test-split build");
            assert!(matches!(err, DatasetError::MissingImageFile { .. }));
        }
        Err(other) => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[test]
fn get_out_of_bounds_is_a_hard_error() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_base_dataset(tmp.path(), 10)?;

    let train = FashionAttr::new(tmp.path(), ATTR, Mode::Train, options(0.8))?;
    let err = train.get(train.len()).unwrap_err();
    assert!(matches!(
        err,
        DatasetError::IndexOutOfBounds { index: 8, len: 8 }
    ));
    Ok(())
}

#[test]
fn target_transform_remaps_class_indices() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_base_dataset(tmp.path(), 10)?;

    let train = FashionAttr::new(
        tmp.path(),
        ATTR,
        Mode::Train,
        DatasetOptions {
            split: 0.8,
            seed: Some(42),
            target_transform: Some(Box::new(|t| t + 100)),
            ..DatasetOptions::default()
        },
    )?;
    let (_, target) = train.get(0)?;
    assert!(target.unwrap() >= 100);
    Ok(())
}
