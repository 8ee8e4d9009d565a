// SPDX-License-Identifier: GPL-3.0-only

//! retroflash - retro-reflective goal detection under a flashing IR LED
//!
//! Frames are captured with the infrared illuminator off and on and
//! subtracted, so only surfaces that return the flash survive; bright
//! regions of the difference are then located as blobs.
//!
//! # Architecture
//!
//! - [`backends`]: frame sources (V4L2, image files, synthetic) and camera controls
//! - [`flash`]: the IR illuminator
//! - [`timing`]: sensor refresh hold-ups and FPS tracking
//! - [`imaging`]: per-pixel operations, colour thresholds and blob detection
//! - [`pipelines`]: highlighter sequences and the detection loop
//! - [`config`]: user configuration
//! - [`storage`]: annotated frame output

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod flash;
pub mod imaging;
pub mod pipelines;
pub mod storage;
pub mod timing;

// Re-export commonly used types
pub use config::Config;
pub use constants::{Framesize, HighlighterMode};
pub use errors::{AppError, AppResult};
pub use pipelines::{Detection, GoalDetector, Rig};
