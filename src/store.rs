//! On-disk cache artifacts: pixel arrays, label arrays, channel statistics.
//!
//! All artifacts are little-endian binary files with a 4-byte magic, keyed
//! by (attribute, artifact kind) under the fixed dataset directory layout.

use crate::loader::ImageLoader;
use crate::types::{
    Attribute, ChannelStats, DatasetError, DatasetResult, IMAGE_CHANNELS, IMAGE_HEIGHT, IMAGE_WIDTH,
};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

const PIXEL_MAGIC: &[u8; 4] = b"FPX1";
const LABEL_MAGIC: &[u8; 4] = b"FLB1";
const STATS_MAGIC: &[u8; 4] = b"FMS1";

const BASE_FOLDER: &str = "datasets";
const TRAIN_FOLDER: &str = "base";
const WEB_FOLDER: &str = "web";
const RANK_FOLDER: &str = "rank";
const DATA_FOLDER: &str = "Images";
const LABEL_FOLDER: &str = "Annotations";
const RANK_LABEL_FOLDER: &str = "Tests";
const TRAIN_LABEL_FILE: &str = "label.csv";
const RANK_LABEL_FILE: &str = "question.csv";

/// Resolves every path of the fixed directory convention for one attribute:
/// `root/datasets/{base|web|rank}/{Images|Annotations|Tests}/...`.
#[derive(Debug, Clone)]
pub struct CachePaths {
    root: PathBuf,
    attribute: Attribute,
}

impl CachePaths {
    pub fn new(root: impl Into<PathBuf>, attribute: Attribute) -> Self {
        Self {
            root: root.into(),
            attribute,
        }
    }

    fn base_root(&self) -> PathBuf {
        self.root.join(BASE_FOLDER).join(TRAIN_FOLDER)
    }

    fn rank_root(&self) -> PathBuf {
        self.root.join(BASE_FOLDER).join(RANK_FOLDER)
    }

    /// Warm-up image tree; part of the convention, never read by this crate.
    pub fn web_root(&self) -> PathBuf {
        self.root.join(BASE_FOLDER).join(WEB_FOLDER)
    }

    pub fn label_csv(&self) -> PathBuf {
        self.base_root().join(LABEL_FOLDER).join(TRAIN_LABEL_FILE)
    }

    pub fn shuffle(&self) -> PathBuf {
        self.base_root()
            .join(LABEL_FOLDER)
            .join(format!("{}_shuffle.bin", self.attribute))
    }

    fn data_file(&self, suffix: &str) -> PathBuf {
        self.base_root()
            .join(DATA_FOLDER)
            .join(format!("{}{}", self.attribute, suffix))
    }

    pub fn train_data(&self) -> PathBuf {
        self.data_file("_train_data.bin")
    }

    pub fn train_labels(&self) -> PathBuf {
        self.data_file("_train_label.bin")
    }

    pub fn test_data(&self) -> PathBuf {
        self.data_file("_test_data.bin")
    }

    pub fn test_labels(&self) -> PathBuf {
        self.data_file("_test_label.bin")
    }

    pub fn stats(&self) -> PathBuf {
        self.data_file("_ms.bin")
    }

    pub fn eval_manifest(&self) -> PathBuf {
        self.rank_root().join(RANK_LABEL_FOLDER).join(RANK_LABEL_FILE)
    }

    pub fn eval_data(&self) -> PathBuf {
        self.rank_root()
            .join(DATA_FOLDER)
            .join(format!("{}_rank_data.bin", self.attribute))
    }

    /// Source image path for a train/test label row (relative to the base tree).
    pub fn image(&self, relative: &str) -> PathBuf {
        self.base_root().join(relative)
    }

    /// Source image path for an eval manifest row (relative to the rank tree).
    pub fn eval_image(&self, relative: &str) -> PathBuf {
        self.rank_root().join(relative)
    }
}

/// Dense channel-last pixel block: (count, height, width, channels) u8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelArray {
    pub count: usize,
    pub height: u32,
    pub width: u32,
    pub channels: u32,
    pixels: Vec<u8>,
}

impl PixelArray {
    fn bytes_per_item(&self) -> usize {
        self.height as usize * self.width as usize * self.channels as usize
    }

    /// Raw HWC bytes of one cached image.
    pub fn row(&self, index: usize) -> &[u8] {
        let stride = self.bytes_per_item();
        &self.pixels[index * stride..(index + 1) * stride]
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn save(&self, path: &Path) -> DatasetResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| DatasetError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let mut header = Vec::with_capacity(24);
        header.extend_from_slice(PIXEL_MAGIC);
        header.extend_from_slice(&(self.count as u64).to_le_bytes());
        header.extend_from_slice(&self.height.to_le_bytes());
        header.extend_from_slice(&self.width.to_le_bytes());
        header.extend_from_slice(&self.channels.to_le_bytes());
        let io_err = |e: std::io::Error| DatasetError::Io {
            path: path.to_path_buf(),
            source: e,
        };
        let mut file = fs::File::create(path).map_err(io_err)?;
        file.write_all(&header).map_err(io_err)?;
        file.write_all(&self.pixels).map_err(io_err)
    }

    pub fn load(path: &Path) -> DatasetResult<PixelArray> {
        let corrupt = |msg: String| DatasetError::Corrupt {
            path: path.to_path_buf(),
            msg,
        };
        let data = fs::read(path).map_err(|e| DatasetError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        if data.len() < 24 {
            return Err(corrupt("pixel array file too small".into()));
        }
        if &data[0..4] != PIXEL_MAGIC {
            return Err(corrupt("bad magic in pixel array file".into()));
        }
        let count = read_u64_le(&data[4..12]) as usize;
        let height = read_u32_le(&data[12..16]);
        let width = read_u32_le(&data[16..20]);
        let channels = read_u32_le(&data[20..24]);
        let expected = count
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(width as usize))
            .and_then(|v| v.checked_mul(channels as usize))
            .ok_or_else(|| corrupt("overflow computing pixel payload size".into()))?;
        let payload = &data[24..];
        if payload.len() != expected {
            return Err(corrupt(format!(
                "pixel payload is {} bytes, header implies {expected}",
                payload.len()
            )));
        }
        Ok(PixelArray {
            count,
            height,
            width,
            channels,
            pixels: payload.to_vec(),
        })
    }
}

pub fn save_labels(path: &Path, labels: &[i64]) -> DatasetResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| DatasetError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let mut buf = Vec::with_capacity(12 + labels.len() * 8);
    buf.extend_from_slice(LABEL_MAGIC);
    buf.extend_from_slice(&(labels.len() as u64).to_le_bytes());
    for label in labels {
        buf.extend_from_slice(&label.to_le_bytes());
    }
    fs::write(path, buf).map_err(|e| DatasetError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

pub fn load_labels(path: &Path) -> DatasetResult<Vec<i64>> {
    let corrupt = |msg: String| DatasetError::Corrupt {
        path: path.to_path_buf(),
        msg,
    };
    let data = fs::read(path).map_err(|e| DatasetError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    if data.len() < 12 {
        return Err(corrupt("label file too small".into()));
    }
    if &data[0..4] != LABEL_MAGIC {
        return Err(corrupt("bad magic in label file".into()));
    }
    let count = read_u64_le(&data[4..12]) as usize;
    let expected = count
        .checked_mul(8)
        .ok_or_else(|| corrupt("overflow computing label payload size".into()))?;
    let payload = &data[12..];
    if payload.len() != expected {
        return Err(corrupt("label file truncated".into()));
    }
    Ok(payload
        .chunks_exact(8)
        .map(|c| i64::from_le_bytes(chunk8(c)))
        .collect())
}

pub fn save_stats(path: &Path, stats: &ChannelStats) -> DatasetResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| DatasetError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let mut buf = Vec::with_capacity(8 + 48);
    buf.extend_from_slice(STATS_MAGIC);
    buf.extend_from_slice(&IMAGE_CHANNELS.to_le_bytes());
    for m in stats.mean {
        buf.extend_from_slice(&m.to_le_bytes());
    }
    for s in stats.std {
        buf.extend_from_slice(&s.to_le_bytes());
    }
    fs::write(path, buf).map_err(|e| DatasetError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

pub fn load_stats(path: &Path) -> DatasetResult<ChannelStats> {
    let corrupt = |msg: String| DatasetError::Corrupt {
        path: path.to_path_buf(),
        msg,
    };
    let data = fs::read(path).map_err(|e| DatasetError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    if data.len() != 8 + 48 {
        return Err(corrupt(format!("stats file is {} bytes, expected 56", data.len())));
    }
    if &data[0..4] != STATS_MAGIC {
        return Err(corrupt("bad magic in stats file".into()));
    }
    let channels = read_u32_le(&data[4..8]);
    if channels != IMAGE_CHANNELS {
        return Err(corrupt(format!("stats file has {channels} channels, expected {IMAGE_CHANNELS}")));
    }
    let mut values = data[8..].chunks_exact(8).map(|c| f64::from_le_bytes(chunk8(c)));
    let mut mean = [0.0f64; 3];
    let mut std = [0.0f64; 3];
    for m in mean.iter_mut() {
        *m = values.next().unwrap_or(0.0);
    }
    for s in std.iter_mut() {
        *s = values.next().unwrap_or(0.0);
    }
    Ok(ChannelStats { mean, std })
}

impl ChannelStats {
    /// Per-channel mean and population std over every pixel of the array,
    /// on the 0..=1 scale. Train split only; test and eval reuse the result.
    pub fn compute(data: &PixelArray) -> ChannelStats {
        let c = data.channels as usize;
        let mut sum = [0.0f64; 3];
        let mut sum_sq = [0.0f64; 3];
        for px in data.pixels().chunks_exact(c) {
            for (ch, &v) in px.iter().enumerate() {
                let v = v as f64 / 255.0;
                sum[ch] += v;
                sum_sq[ch] += v * v;
            }
        }
        let n = (data.pixels().len() / c).max(1) as f64;
        let mut mean = [0.0f64; 3];
        let mut std = [0.0f64; 3];
        for ch in 0..3 {
            mean[ch] = sum[ch] / n;
            std[ch] = (sum_sq[ch] / n - mean[ch] * mean[ch]).max(0.0).sqrt();
        }
        ChannelStats { mean, std }
    }
}

/// Decode, resize, and stack source images into one dense channel-last array.
///
/// Pixels are gathered channel-first per image and transposed into HWC for
/// storage, mirroring the stack-then-transpose step of the original cache
/// layout. Any missing or undecodable image aborts the whole build.
pub fn assemble_images(
    image_paths: &[PathBuf],
    loader: &dyn ImageLoader,
) -> DatasetResult<PixelArray> {
    let w = IMAGE_WIDTH as usize;
    let h = IMAGE_HEIGHT as usize;
    let plane = w * h;
    let started = Instant::now();
    let mut pixels = Vec::with_capacity(image_paths.len() * plane * 3);
    let mut chw = vec![0u8; plane * 3];
    for (i, path) in image_paths.iter().enumerate() {
        let img = loader.load(path)?;
        let img = loader.resize(&img, IMAGE_WIDTH, IMAGE_HEIGHT);
        for (y, x, px) in img.enumerate_pixels() {
            let base = (y as usize) * w + x as usize;
            chw[base] = px[0];
            chw[plane + base] = px[1];
            chw[2 * plane + base] = px[2];
        }
        for base in 0..plane {
            pixels.push(chw[base]);
            pixels.push(chw[plane + base]);
            pixels.push(chw[2 * plane + base]);
        }
        if (i + 1) % 500 == 0 {
            log::debug!("cache build: {}/{} images decoded", i + 1, image_paths.len());
        }
    }
    log::info!(
        "cache build: {} images decoded and resized in {} ms",
        image_paths.len(),
        started.elapsed().as_millis()
    );
    Ok(PixelArray {
        count: image_paths.len(),
        height: IMAGE_HEIGHT,
        width: IMAGE_WIDTH,
        channels: IMAGE_CHANNELS,
        pixels,
    })
}

fn chunk8(data: &[u8]) -> [u8; 8] {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(data);
    arr
}

fn read_u32_le(data: &[u8]) -> u32 {
    let mut arr = [0u8; 4];
    arr.copy_from_slice(data);
    u32::from_le_bytes(arr)
}

fn read_u64_le(data: &[u8]) -> u64 {
    u64::from_le_bytes(chunk8(data))
}
