// SPDX-License-Identifier: GPL-3.0-only

//! User configuration
//!
//! Stored as JSON at `$XDG_CONFIG_HOME/retroflash/config.json`. A missing
//! file means defaults; a partial file fills the rest from defaults; an
//! unknown key is an error so that typos do not silently fall back.

use crate::constants::{Framesize, HighlighterMode, ModeTimings, blobs, led, processing, sensor};
use crate::errors::{AppError, AppResult};
use crate::imaging::{BlobOptions, LabThreshold, Rect};
use crate::timing::check_rolling_shutter;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Capture device selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CameraSettings {
    /// V4L2 device path
    pub device: String,
    pub framesize: Framesize,
    /// Region cropped from every frame
    pub window: Option<Rect>,
    /// Frames are discarded for this long after the sensor is configured
    pub settle_ms: u64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            device: sensor::DEFAULT_DEVICE.to_string(),
            framesize: Framesize::default(),
            window: None,
            settle_ms: crate::constants::timing::SENSOR_SETTLE_TIME.as_millis() as u64,
        }
    }
}

impl CameraSettings {
    /// Size of the frames handed to the highlighter
    pub fn frame_dimensions(&self) -> (u32, u32) {
        match self.window {
            Some(window) => (window.w, window.h),
            None => self.framesize.dimensions(),
        }
    }
}

/// A single sensor register write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterWrite {
    pub reg: u16,
    pub value: u8,
}

/// Built-in register tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegisterProfile {
    /// Leave the sensor registers alone
    #[default]
    None,
    /// GC2145 tuned for goal detection
    Gc2145Goal,
    /// GC2145 tuned for checking camera placement
    Gc2145Test,
}

impl RegisterProfile {
    pub fn writes(&self) -> Vec<RegisterWrite> {
        let table: &[(u16, u8)] = match self {
            RegisterProfile::None => &[],
            RegisterProfile::Gc2145Goal => sensor::GC2145_GOAL_REGISTERS,
            RegisterProfile::Gc2145Test => sensor::GC2145_TEST_REGISTERS,
        };
        table
            .iter()
            .map(|&(reg, value)| RegisterWrite { reg, value })
            .collect()
    }
}

/// Fixed sensor state for frame differencing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SensorSettings {
    /// Manual exposure time
    pub exposure_us: u32,
    pub auto_exposure: bool,
    pub auto_white_balance: bool,
    pub auto_gain: bool,
    /// Raw gain control value
    pub gain: Option<i32>,
    /// Adjustment level -3..=3 around the driver default
    pub brightness: Option<i8>,
    /// Adjustment level -3..=3 around the driver default
    pub contrast: Option<i8>,
    /// Adjustment level -3..=3 around the driver default
    pub saturation: Option<i8>,
    pub profile: RegisterProfile,
    /// Extra register writes applied after the profile
    pub registers: Vec<RegisterWrite>,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            exposure_us: sensor::DEFAULT_EXPOSURE_US,
            auto_exposure: false,
            auto_white_balance: false,
            auto_gain: false,
            gain: None,
            brightness: None,
            contrast: None,
            saturation: None,
            profile: RegisterProfile::default(),
            registers: Vec::new(),
        }
    }
}

impl SensorSettings {
    /// Profile writes followed by the extra writes
    pub fn register_writes(&self) -> Vec<RegisterWrite> {
        let mut writes = self.profile.writes();
        writes.extend_from_slice(&self.registers);
        writes
    }

    pub fn exposure(&self) -> Duration {
        Duration::from_micros(self.exposure_us as u64)
    }
}

/// IR LED selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedSettings {
    /// LED class device name under /sys/class/leds
    pub name: String,
    /// Write 0 for on and max_brightness for off
    pub active_low: bool,
}

impl Default for LedSettings {
    fn default() -> Self {
        Self {
            name: led::DEFAULT_LED_NAME.to_string(),
            active_low: false,
        }
    }
}

/// Highlighter mode and its tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HighlighterSettings {
    pub mode: HighlighterMode,
    /// Overrides the mode's settle wait
    pub settle_us: Option<u64>,
    /// Overrides the mode's recover wait
    pub recover_us: Option<u64>,
    /// Barrel correction strength; the two-frame mode defaults to 1.65,
    /// other modes to none
    pub lens_strength: Option<f32>,
    pub lens_zoom: f32,
    /// Box blur radius; the two-frame mode defaults to 1, other modes to none
    pub mean_size: Option<u32>,
    /// Invert the highlight so goals match the LAB thresholds
    pub negate: bool,
    /// Grayscale change that counts as motion
    pub motion_threshold: u8,
    /// Radius of the motion-map erode/dilate passes
    pub morph_size: u32,
}

impl Default for HighlighterSettings {
    fn default() -> Self {
        Self {
            mode: HighlighterMode::default(),
            settle_us: None,
            recover_us: None,
            lens_strength: None,
            lens_zoom: processing::LENS_CORR_ZOOM,
            mean_size: None,
            negate: true,
            motion_threshold: processing::MOTION_THRESHOLD,
            morph_size: processing::MORPH_SIZE,
        }
    }
}

impl HighlighterSettings {
    /// The mode's waits with any overrides applied
    pub fn timings(&self) -> ModeTimings {
        let defaults = self.mode.default_timings();
        ModeTimings {
            settle: self
                .settle_us
                .map(Duration::from_micros)
                .unwrap_or(defaults.settle),
            recover: self
                .recover_us
                .map(Duration::from_micros)
                .unwrap_or(defaults.recover),
        }
    }

    pub fn effective_lens_strength(&self) -> Option<f32> {
        self.lens_strength.or(match self.mode {
            HighlighterMode::TwoFrame => Some(processing::LENS_CORR_STRENGTH),
            _ => None,
        })
    }

    pub fn effective_mean_size(&self) -> Option<u32> {
        self.mean_size.or(match self.mode {
            HighlighterMode::TwoFrame => Some(processing::MEAN_SIZE),
            _ => None,
        })
    }
}

/// Blob filtering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BlobSettings {
    pub goal_thresholds: Vec<LabThreshold>,
    pub area_threshold: u32,
    pub pixels_threshold: u32,
    /// Merge margin; defaults to the frame height / 40
    pub margin: Option<u32>,
    pub merge: bool,
}

impl Default for BlobSettings {
    fn default() -> Self {
        Self {
            goal_thresholds: blobs::GOAL_THRESHOLDS
                .iter()
                .map(|&t| LabThreshold::from(t))
                .collect(),
            area_threshold: blobs::AREA_THRESHOLD,
            pixels_threshold: blobs::PIXELS_THRESHOLD,
            margin: None,
            merge: true,
        }
    }
}

impl BlobSettings {
    /// Options for a frame of the given height
    pub fn options(&self, height: u32) -> BlobOptions {
        let mut options = BlobOptions::for_height(height);
        options.area_threshold = self.area_threshold;
        options.pixels_threshold = self.pixels_threshold;
        options.merge = self.merge;
        if let Some(margin) = self.margin {
            options.margin = margin;
        }
        options
    }
}

/// Detection loop behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorSettings {
    /// Run blob detection of the previous frame during the next hold-up
    pub pipelined: bool,
    /// Save annotated highlight images here
    pub save_dir: Option<PathBuf>,
    /// Give up after this many failed iterations in a row
    pub max_consecutive_errors: u32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            pipelined: false,
            save_dir: None,
            max_consecutive_errors: 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub camera: CameraSettings,
    pub sensor: SensorSettings,
    pub led: LedSettings,
    pub highlighter: HighlighterSettings,
    pub blobs: BlobSettings,
    pub detector: DetectorSettings,
}

impl Config {
    /// `$XDG_CONFIG_HOME/retroflash/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("retroflash").join("config.json"))
    }

    /// Load and validate; a missing file yields the defaults
    pub fn load(path: &Path) -> AppResult<Config> {
        let config = match std::fs::read_to_string(path) {
            Ok(text) => {
                let config: Config = serde_json::from_str(&text)
                    .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))?;
                info!(path = %path.display(), "Loaded configuration");
                config
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No configuration file, using defaults");
                Config::default()
            }
            Err(e) => {
                return Err(AppError::Config(format!("{}: {}", path.display(), e)));
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from the default location, or defaults when there is none
    pub fn load_default() -> AppResult<Config> {
        match Self::default_path() {
            Some(path) => Self::load(&path),
            None => Ok(Config::default()),
        }
    }

    pub fn save(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text + "\n")?;
        info!(path = %path.display(), "Saved configuration");
        Ok(())
    }

    /// Reject settings the pipeline cannot run with.
    ///
    /// Waits that a rolling shutter may straddle only produce warnings.
    pub fn validate(&self) -> AppResult<()> {
        let (frame_w, frame_h) = self.camera.framesize.dimensions();
        if let Some(window) = self.camera.window {
            if window.area() == 0 {
                return Err(AppError::Config("camera window is empty".into()));
            }
            if window.right() > frame_w || window.bottom() > frame_h {
                return Err(AppError::Config(format!(
                    "camera window {} does not fit {} ({}x{})",
                    window,
                    self.camera.framesize.display_name(),
                    frame_w,
                    frame_h
                )));
            }
        }

        for level in [
            self.sensor.brightness,
            self.sensor.contrast,
            self.sensor.saturation,
        ]
        .into_iter()
        .flatten()
        {
            if !(-3..=3).contains(&level) {
                return Err(AppError::Config(format!(
                    "sensor adjustment level {} is outside -3..=3",
                    level
                )));
            }
        }

        let hl = &self.highlighter;
        if let Some(strength) = hl.lens_strength {
            if !strength.is_finite() || strength < 0.0 {
                return Err(AppError::Config(format!(
                    "lens_strength must be >= 0, got {}",
                    strength
                )));
            }
        }
        if !hl.lens_zoom.is_finite() || hl.lens_zoom <= 0.0 {
            return Err(AppError::Config(format!(
                "lens_zoom must be > 0, got {}",
                hl.lens_zoom
            )));
        }

        if self.blobs.goal_thresholds.is_empty() {
            return Err(AppError::Config("at least one goal threshold is required".into()));
        }
        if self.blobs.goal_thresholds.len() > 32 {
            return Err(AppError::Config("at most 32 goal thresholds are supported".into()));
        }
        if let Some(bad) = self.blobs.goal_thresholds.iter().find(|t| !t.is_valid()) {
            return Err(AppError::Config(format!(
                "goal threshold {:?} has L outside 0..=100",
                <[i8; 6]>::from(*bad)
            )));
        }

        if !self.sensor.auto_exposure {
            let timings = hl.timings();
            let exposure = self.sensor.exposure();
            check_rolling_shutter("settle", timings.settle, exposure);
            if hl.mode.uses_motion_mask() {
                check_rolling_shutter("recover", timings.recover, exposure);
            }
        }

        Ok(())
    }
}
