// SPDX-License-Identifier: GPL-3.0-only

//! Storage of annotated detection frames

use crate::errors::{AppError, AppResult};
use crate::imaging::Blob;
use crate::pipelines::annotate;
use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing::debug;

/// `~/Pictures/retroflash`, falling back to the current directory
pub fn default_save_dir() -> PathBuf {
    dirs::picture_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("retroflash")
}

/// File name for a detection frame: `goal_<timestamp>_<sequence>.png`
pub fn frame_file_name(timestamp: chrono::DateTime<chrono::Local>, sequence: u64) -> String {
    format!(
        "goal_{}_{:06}.png",
        timestamp.format("%Y%m%d_%H%M%S%.3f"),
        sequence
    )
}

/// Writes annotated highlights as PNG files
#[derive(Debug, Clone)]
pub struct FrameSaver {
    dir: PathBuf,
}

impl FrameSaver {
    /// Create the directory if needed
    pub fn new(dir: &Path) -> AppResult<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| AppError::Storage(format!("{}: {}", dir.display(), e)))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Draw the blobs onto the highlight and save it
    pub fn save(&self, sequence: u64, highlight: &RgbImage, blobs: &[Blob]) -> AppResult<PathBuf> {
        let path = self
            .dir
            .join(frame_file_name(chrono::Local::now(), sequence));
        annotate(highlight, blobs).save(&path)?;
        debug!(path = %path.display(), blobs = blobs.len(), "Saved detection frame");
        Ok(path)
    }
}
