// SPDX-License-Identifier: GPL-3.0-only

//! Frame sources
//!
//! ```text
//! ┌──────────────────────┐
//! │ Highlighter (Rig)    │
//! └──────────┬───────────┘
//!            │ snapshot()
//!            ▼
//! ┌──────────────────────┐
//! │  FrameSource trait   │  ← Common interface
//! └──────────┬───────────┘
//!            │
//!    ┌───────┼──────────┐
//!    ▼       ▼          ▼
//!  V4L2   Files    Synthetic
//! ```

pub mod file_source;
pub mod format_converters;
pub mod frame_loop;
pub mod synthetic;
pub mod types;
pub mod v4l2;
pub mod v4l2_controls;

pub use file_source::FileSequence;
pub use frame_loop::{CaptureLoopController, LoopAction};
pub use synthetic::{SyntheticCamera, SyntheticLed, SyntheticScene, SyntheticTarget};
pub use types::*;
pub use v4l2::V4l2Camera;

use image::RgbImage;
use tracing::{debug, info};
use v4l::video::Capture;

/// Anything that can hand the highlighter a full RGB frame on demand
pub trait FrameSource: Send {
    /// Human-readable identifier for logs
    fn name(&self) -> &str;

    /// Frame size delivered by `snapshot`, after any cropping
    fn resolution(&self) -> (u32, u32);

    /// Block until the next frame is available and return it
    fn snapshot(&mut self) -> BackendResult<RgbImage>;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn resolution(&self) -> (u32, u32) {
        (**self).resolution()
    }

    fn snapshot(&mut self) -> BackendResult<RgbImage> {
        (**self).snapshot()
    }
}

/// List V4L2 video capture devices.
///
/// Metadata and output nodes are skipped. Devices that cannot be opened
/// (busy, no permission) are logged and left out.
pub fn enumerate_cameras() -> Vec<CameraDevice> {
    let mut devices = Vec::new();

    for node in v4l::context::enum_devices() {
        let path = node.path().display().to_string();

        let dev = match v4l::Device::with_path(node.path()) {
            Ok(dev) => dev,
            Err(e) => {
                debug!(path = %path, error = %e, "Skipping device that could not be opened");
                continue;
            }
        };

        let caps = match dev.query_caps() {
            Ok(caps) => caps,
            Err(e) => {
                debug!(path = %path, error = %e, "Skipping device without capabilities");
                continue;
            }
        };

        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
            debug!(path = %path, card = %caps.card, "Not a capture device");
            continue;
        }

        let fourccs = dev
            .enum_formats()
            .map(|formats| {
                formats
                    .iter()
                    .filter_map(|desc| desc.fourcc.str().ok().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        devices.push(CameraDevice {
            info: DeviceInfo {
                card: caps.card,
                driver: caps.driver,
                bus: caps.bus,
                path,
            },
            fourccs,
        });
    }

    devices.sort_by(|a, b| a.info.path.cmp(&b.info.path));
    info!(count = devices.len(), "Enumerated V4L2 capture devices");
    devices
}
