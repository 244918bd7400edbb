//! Unknown-face evidence written as JPEG files.

use image::RgbImage;
use ponto_core::evidence::{EvidenceError, EvidenceSink};
use ponto_core::types::{FrameSnapshot, Timestamp};
use std::path::{Path, PathBuf};

/// Saves each frame as `unknown_face_<YYYYmmdd_HHMMSS_mmm>_<id>.jpg` in one directory.
pub struct DirectoryEvidenceSink {
    dir: PathBuf,
}

impl DirectoryEvidenceSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(at: Timestamp) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!("unknown_face_{}_{}.jpg", at.format("%Y%m%d_%H%M%S_%3f"), &id[..8])
    }
}

impl EvidenceSink for DirectoryEvidenceSink {
    fn save(&self, frame: &FrameSnapshot, at: Timestamp) -> Result<PathBuf, EvidenceError> {
        let expected = frame.width as usize * frame.height as usize * 3;
        let invalid = || EvidenceError::InvalidFrame {
            width: frame.width,
            height: frame.height,
            expected,
            got: frame.rgb.len(),
        };
        if frame.width == 0 || frame.height == 0 || frame.rgb.len() != expected {
            return Err(invalid());
        }
        let image = RgbImage::from_raw(frame.width, frame.height, frame.rgb.clone()).ok_or_else(invalid)?;

        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(Self::file_name(at));
        image
            .save_with_format(&path, image::ImageFormat::Jpeg)
            .map_err(|e| EvidenceError::Encode(e.to_string()))?;
        Ok(path)
    }
}
