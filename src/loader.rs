//! Image loader collaborator: decoding and resizing live behind this seam.

use crate::types::{DatasetError, DatasetResult};
use image::imageops::FilterType;
use image::RgbImage;
use std::path::Path;

/// External capability the cache builder calls for every source image.
/// The core never decodes pixels itself, which also makes loader activity
/// observable in tests (a warm cache must not call this at all).
pub trait ImageLoader {
    /// Load the file at `path` as an RGB image.
    fn load(&self, path: &Path) -> DatasetResult<RgbImage>;

    /// Resize to the cache resolution.
    fn resize(&self, img: &RgbImage, width: u32, height: u32) -> RgbImage {
        image::imageops::resize(img, width, height, FilterType::Triangle)
    }
}

/// Default loader backed by the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultLoader;

impl ImageLoader for DefaultLoader {
    fn load(&self, path: &Path) -> DatasetResult<RgbImage> {
        if !path.exists() {
            return Err(DatasetError::MissingImageFile {
                path: path.to_path_buf(),
            });
        }
        let img = image::open(path).map_err(|e| DatasetError::Image {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(img.to_rgb8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_reported_as_missing_not_decode_error() {
        let err = DefaultLoader
            .load(Path::new("/nonexistent/frame.png"))
            .unwrap_err();
        assert!(matches!(err, DatasetError::MissingImageFile { .. }));
    }

    #[test]
    fn resize_produces_requested_dimensions() {
        let img = RgbImage::new(8, 6);
        let resized = DefaultLoader.resize(&img, 227, 227);
        assert_eq!(resized.dimensions(), (227, 227));
    }
}
