use std::path::{Path, PathBuf};

use image::GrayImage;

use super::error::FrameDecodeError;
use super::manifest::FileManifest;
use super::undistort::Undistorter;

/// A raw image that passed the input checks and has been rectified.
#[derive(Debug, Clone)]
pub struct RectifiedFrame {
    pub manifest_pos: usize,
    pub path: PathBuf,
    pub image: GrayImage,
}

/// Walks an image manifest once, front to back. Frames that cannot be read
/// or have the wrong size come out as errors and the walk continues.
pub struct FrameSource<'a> {
    manifest: &'a FileManifest,
    undistorter: &'a dyn Undistorter,
    position: usize,
}

impl<'a> FrameSource<'a> {
    pub fn new(manifest: &'a FileManifest, undistorter: &'a dyn Undistorter) -> Self {
        Self {
            manifest,
            undistorter,
            position: 0,
        }
    }

    /// Manifest position of the next frame to be read.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.manifest.len().saturating_sub(self.position)
    }

    fn load(&self, manifest_pos: usize, path: &Path) -> Result<RectifiedFrame, FrameDecodeError> {
        let raw = image::open(path)
            .map_err(|e| FrameDecodeError::Unreadable {
                path: path.to_path_buf(),
                msg: e.to_string(),
            })?
            .to_luma8();

        let (width, height) = raw.dimensions();
        if width == 0 || height == 0 {
            return Err(FrameDecodeError::Empty {
                path: path.to_path_buf(),
            });
        }
        let (expected_width, expected_height) = self.undistorter.calibration().input_size();
        if (width, height) != (expected_width, expected_height) {
            return Err(FrameDecodeError::DimensionMismatch {
                path: path.to_path_buf(),
                expected_width,
                expected_height,
                width,
                height,
            });
        }

        let image = self
            .undistorter
            .undistort(&raw)
            .map_err(|e| FrameDecodeError::Rectify {
                path: path.to_path_buf(),
                msg: e.to_string(),
            })?;

        Ok(RectifiedFrame {
            manifest_pos,
            path: path.to_path_buf(),
            image,
        })
    }
}

impl Iterator for FrameSource<'_> {
    type Item = Result<RectifiedFrame, FrameDecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let manifest = self.manifest;
        let manifest_pos = self.position;
        let path = manifest.get(manifest_pos)?;
        self.position += 1;
        Some(self.load(manifest_pos, path))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use image::Luma;

    use super::*;
    use crate::replay::camera::CalibrationModel;
    use crate::replay::undistort::RemapUndistorter;

    #[test]
    fn yields_frames_and_errors_in_manifest_order() {
        let dir = tempfile::tempdir().unwrap();
        GrayImage::from_pixel(64, 48, Luma([10u8]))
            .save(dir.path().join("00.png"))
            .unwrap();
        GrayImage::from_pixel(32, 24, Luma([20u8]))
            .save(dir.path().join("01.png"))
            .unwrap();
        fs::write(dir.path().join("02.png"), b"not a png").unwrap();
        GrayImage::from_pixel(64, 48, Luma([30u8]))
            .save(dir.path().join("03.png"))
            .unwrap();

        let manifest = FileManifest::resolve(dir.path()).unwrap();
        let calib = CalibrationModel::pinhole(50.0, 50.0, 31.5, 23.5, 64, 48).unwrap();
        let undistorter = RemapUndistorter::new(calib);
        let mut source = FrameSource::new(&manifest, &undistorter);

        let first = source.next().unwrap().unwrap();
        assert_eq!(first.manifest_pos, 0);
        assert_eq!(first.image.get_pixel(5, 5)[0], 10);
        assert!(matches!(
            source.next(),
            Some(Err(FrameDecodeError::DimensionMismatch { width: 32, height: 24, .. }))
        ));
        assert!(matches!(source.next(), Some(Err(FrameDecodeError::Unreadable { .. }))));
        let last = source.next().unwrap().unwrap();
        assert_eq!(last.manifest_pos, 3);
        assert!(source.next().is_none());
        assert_eq!(source.position(), 4);
    }
}
