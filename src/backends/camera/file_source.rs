// SPDX-License-Identifier: GPL-3.0-only

//! Frame replay from image files
//!
//! Streams a directory of still images in file-name order, wrapping around
//! at the end unless told to stop. Useful for tuning thresholds on recorded
//! frames without the camera attached.

use super::types::{BackendError, BackendResult};
use super::FrameSource;
use crate::constants::file_formats;
use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Load a single image file as an RGB frame
pub fn load_image_as_frame(path: &Path) -> BackendResult<RgbImage> {
    let img = image::open(path)
        .map_err(|e| BackendError::IoError(format!("{}: {}", path.display(), e)))?;
    Ok(img.to_rgb8())
}

/// List the image files of a directory, sorted by name
pub fn list_image_files(dir: &Path) -> BackendResult<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| BackendError::DeviceNotFound(format!("{}: {}", dir.display(), e)))?;

    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(file_formats::is_image_extension)
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Frame source backed by a sorted list of image files
pub struct FileSequence {
    name: String,
    files: Vec<PathBuf>,
    next: usize,
    looping: bool,
    resolution: (u32, u32),
}

impl FileSequence {
    pub fn open(dir: &Path, looping: bool) -> BackendResult<Self> {
        let files = list_image_files(dir)?;
        let Some(first) = files.first() else {
            return Err(BackendError::DeviceNotFound(format!(
                "no image files in {}",
                dir.display()
            )));
        };
        let resolution = load_image_as_frame(first)?.dimensions();

        info!(
            dir = %dir.display(),
            frames = files.len(),
            width = resolution.0,
            height = resolution.1,
            "Opened file sequence"
        );

        Ok(Self {
            name: dir.display().to_string(),
            files,
            next: 0,
            looping,
            resolution,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for FileSequence {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    fn snapshot(&mut self) -> BackendResult<RgbImage> {
        if self.next >= self.files.len() {
            if !self.looping {
                return Err(BackendError::EndOfStream);
            }
            self.next = 0;
        }

        let path = &self.files[self.next];
        self.next += 1;
        debug!(path = %path.display(), "Replaying frame");

        let frame = load_image_as_frame(path)?;
        if frame.dimensions() != self.resolution {
            return Err(BackendError::FormatNotSupported(format!(
                "{} is {}x{}, sequence is {}x{}",
                path.display(),
                frame.width(),
                frame.height(),
                self.resolution.0,
                self.resolution.1
            )));
        }
        Ok(frame)
    }
}
