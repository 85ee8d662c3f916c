//! Local copy of every decoded frame, one PNG per row.

use crate::error::StoreError;
use crate::payload::DecodedFrame;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Writes decoded frames into one directory.
#[derive(Debug, Clone)]
pub struct FileMirror {
    dir: PathBuf,
}

impl FileMirror {
    /// Create the mirror directory (with parents) if absent.
    ///
    /// Called once per batch; an existing directory and its files are kept.
    pub async fn prepare(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        info!(dir = %dir.display(), "Local mirror directory ready");

        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Encode the frame losslessly and write it as `filename`.
    pub async fn write(&self, filename: &str, frame: &DecodedFrame) -> Result<PathBuf, StoreError> {
        let path = self.dir.join(filename);
        let encoded = frame.encode_png()?;

        tokio::fs::write(&path, &encoded).await?;

        debug!(
            path = %path.display(),
            width = frame.width(),
            height = frame.height(),
            size_bytes = encoded.len(),
            "Frame mirrored locally"
        );

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::decode_image;
    use image::{ImageFormat, Rgb, RgbImage};

    fn frame() -> DecodedFrame {
        DecodedFrame {
            pixels: RgbImage::from_fn(3, 2, |x, y| Rgb([x as u8, y as u8, 9])),
            source_format: ImageFormat::Jpeg,
        }
    }

    #[tokio::test]
    async fn test_prepare_creates_nested_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("a/b/extracted_images_D");

        let mirror = FileMirror::prepare(&dir).await.unwrap();
        assert!(dir.is_dir());
        assert_eq!(mirror.dir(), dir.as_path());

        // Idempotent
        FileMirror::prepare(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_stores_lossless_png() {
        let tmp = tempfile::tempdir().unwrap();
        let mirror = FileMirror::prepare(tmp.path()).await.unwrap();
        let frame = frame();

        let path = mirror.write("D_frame_00000.png", &frame).await.unwrap();
        assert_eq!(path, tmp.path().join("D_frame_00000.png"));

        let written = std::fs::read(&path).unwrap();
        let decoded = decode_image(&written).unwrap();
        assert_eq!(decoded.source_format, ImageFormat::Png);
        assert_eq!(decoded.pixels, frame.pixels);
    }

    #[tokio::test]
    async fn test_write_fails_when_dir_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("mirror");
        let mirror = FileMirror::prepare(&dir).await.unwrap();
        std::fs::remove_dir(&dir).unwrap();

        let err = mirror.write("D_frame_00001.png", &frame()).await.unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
    }
}
