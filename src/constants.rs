// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Frame-differencing strategy used by the highlighter
///
/// Each mode fixes the capture sequence; the waits between LED changes and
/// snapshots default to the values below and can be overridden in the config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HighlighterMode {
    /// One unlit and one lit frame per call, LED alternating between calls
    #[default]
    TwoFrame,
    /// Explicit settle and recovery waits around each LED change
    TwoStep,
    /// Two unlit frames build a motion mask before the lit frame
    MotionMasked,
    /// Motion-masked sequence with very long waits, for slow sensors
    SuperSlow,
}

impl HighlighterMode {
    /// All modes, in the order they are listed on the command line
    pub const ALL: [HighlighterMode; 4] = [
        HighlighterMode::TwoFrame,
        HighlighterMode::TwoStep,
        HighlighterMode::MotionMasked,
        HighlighterMode::SuperSlow,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            HighlighterMode::TwoFrame => "two-frame",
            HighlighterMode::TwoStep => "two-step",
            HighlighterMode::MotionMasked => "motion-masked",
            HighlighterMode::SuperSlow => "super-slow",
        }
    }

    /// Default waits for this mode
    pub fn default_timings(&self) -> ModeTimings {
        match self {
            HighlighterMode::TwoFrame => ModeTimings {
                settle: Duration::from_micros(timing::TWO_FRAME_WAIT_US),
                recover: Duration::from_micros(timing::TWO_FRAME_WAIT_US),
            },
            HighlighterMode::TwoStep => ModeTimings {
                settle: Duration::from_micros(timing::TWO_STEP_SETTLE_US),
                recover: Duration::from_micros(timing::TWO_STEP_RECOVER_US),
            },
            HighlighterMode::MotionMasked => ModeTimings {
                settle: Duration::from_micros(timing::MOTION_MASK_WAIT_US),
                recover: Duration::from_micros(timing::MOTION_MASK_WAIT_US),
            },
            HighlighterMode::SuperSlow => ModeTimings {
                settle: Duration::from_micros(timing::SUPER_SLOW_SETTLE_US),
                recover: Duration::from_micros(timing::SUPER_SLOW_RECOVER_US),
            },
        }
    }

    /// Whether this mode builds a motion mask from two unlit frames
    pub fn uses_motion_mask(&self) -> bool {
        matches!(
            self,
            HighlighterMode::MotionMasked | HighlighterMode::SuperSlow
        )
    }
}

impl std::fmt::Display for HighlighterMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

impl std::str::FromStr for HighlighterMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HighlighterMode::ALL
            .into_iter()
            .find(|mode| mode.display_name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                let names: Vec<&str> = HighlighterMode::ALL
                    .iter()
                    .map(|m| m.display_name())
                    .collect();
                format!("unknown mode '{}' (expected one of: {})", s, names.join(", "))
            })
    }
}

/// The two waits every highlighter sequence is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeTimings {
    /// Wait after an LED change before the next snapshot
    pub settle: Duration,
    /// Wait after a snapshot before the LED changes again
    pub recover: Duration,
}

/// Sensor output resolutions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Framesize {
    /// 160x120
    Qqvga,
    /// 240x160
    #[default]
    Hqvga,
    /// 320x240
    Qvga,
    /// 640x480
    Vga,
}

impl Framesize {
    pub const ALL: [Framesize; 4] = [
        Framesize::Qqvga,
        Framesize::Hqvga,
        Framesize::Qvga,
        Framesize::Vga,
    ];

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Framesize::Qqvga => (160, 120),
            Framesize::Hqvga => (240, 160),
            Framesize::Qvga => (320, 240),
            Framesize::Vga => (640, 480),
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Framesize::Qqvga => "QQVGA",
            Framesize::Hqvga => "HQVGA",
            Framesize::Qvga => "QVGA",
            Framesize::Vga => "VGA",
        }
    }
}

/// Capture sequence timing
pub mod timing {
    use std::time::Duration;

    /// Wait between snapshots in the alternating two-frame loop
    pub const TWO_FRAME_WAIT_US: u64 = 40_000;

    /// Settle time after an LED change in the two-step sequence
    pub const TWO_STEP_SETTLE_US: u64 = 8_425;

    /// Recovery time after a snapshot in the two-step sequence
    pub const TWO_STEP_RECOVER_US: u64 = 15_000;

    /// Wait between snapshots of the motion-masked sequence
    pub const MOTION_MASK_WAIT_US: u64 = 10_000;

    /// Settle time of the super-slow sequence
    pub const SUPER_SLOW_SETTLE_US: u64 = 100_000;

    /// Recovery time of the super-slow sequence
    pub const SUPER_SLOW_RECOVER_US: u64 = 20_000;

    /// Minimum ratio between the LED wait and the exposure time.
    /// Below this the rolling shutter can catch a half-lit frame.
    pub const ROLLING_SHUTTER_FACTOR: u32 = 2;

    /// Frames are discarded for this long after the sensor is configured
    pub const SENSOR_SETTLE_TIME: Duration = Duration::from_millis(2000);

    /// Smoothing factor of the FPS moving average
    pub const FPS_SMOOTHING: f64 = 0.1;

    /// Log the FPS every N detections
    pub const FPS_LOG_INTERVAL: u64 = 30;
}

/// Default image processing parameters
pub mod processing {
    /// Lower bound of the motion-map binary threshold
    pub const MOTION_THRESHOLD: u8 = 16;

    /// Strength of the barrel-distortion correction
    pub const LENS_CORR_STRENGTH: f32 = 1.65;

    /// Zoom of the barrel-distortion correction
    pub const LENS_CORR_ZOOM: f32 = 1.0;

    /// Kernel radius of the box blur applied to the two-frame highlight
    pub const MEAN_SIZE: u32 = 1;

    /// Kernel radius of the motion-map erode/dilate passes
    pub const MORPH_SIZE: u32 = 1;
}

/// Default blob filtering parameters
pub mod blobs {
    /// LAB goal thresholds `(l_min, l_max, a_min, a_max, b_min, b_max)`
    pub const GOAL_THRESHOLDS: [[i8; 6]; 2] = [
        [35, 55, -10, 30, 20, 50],
        [50, 75, -50, -20, 40, 70],
    ];

    /// Minimum bounding-box area of a blob
    pub const AREA_THRESHOLD: u32 = 20;

    /// Minimum number of pixels in a blob
    pub const PIXELS_THRESHOLD: u32 = 20;

    /// Merge margin is the frame height divided by this
    pub const MARGIN_DIVISOR: u32 = 40;

    /// Outline colour of annotated blobs
    pub const ANNOTATION_COLOR: [u8; 3] = [178, 15, 184];
}

/// Camera and sensor defaults
pub mod sensor {
    /// Capture device opened when none is configured
    pub const DEFAULT_DEVICE: &str = "/dev/video0";

    /// Manual exposure time. Every default highlighter wait is more than
    /// twice this.
    pub const DEFAULT_EXPOSURE_US: u32 = 4_000;

    /// GC2145 register page select
    pub const GC2145_PAGE_SELECT: u16 = 0xfe;

    /// GC2145 tuning for goal detection: short fixed exposure, moderate
    /// gain, flat colour ratios (page 0); reduced chroma saturation and luma
    /// contrast (page 2)
    pub const GC2145_GOAL_REGISTERS: &[(u16, u8)] = &[
        (GC2145_PAGE_SELECT, 0x00),
        (0x03, 0x00), // exposure high bits
        (0x04, 0x80), // exposure low bits
        (0xb0, 0x80), // global gain
        (0xad, 0x60), // R ratio
        (0xae, 0x60), // G ratio
        (0xaf, 0x60), // B ratio
        (0xa3, 0xa0), // G gain odd
        (0xa4, 0xa0), // G gain even
        (0xa5, 0xa0), // R gain odd
        (0xa6, 0xa0), // R gain even
        (0xa7, 0xa0), // B gain odd
        (0xa8, 0xa0), // B gain even
        (0xa9, 0xa0), // G gain odd 2
        (0xaa, 0xa0), // G gain even 2
        (GC2145_PAGE_SELECT, 0x02),
        (0xd1, 0x70), // Cb saturation
        (0xd2, 0x60), // Cr saturation
        (0xd3, 0x40), // luma contrast
        (0xd5, 0x00), // luma offset
    ];

    /// GC2145 tuning used while checking camera placement: anti-blur on,
    /// AWB off, longer exposure and higher gain
    pub const GC2145_TEST_REGISTERS: &[(u16, u8)] = &[
        (GC2145_PAGE_SELECT, 0x00),
        (0x82, 0x04), // anti-blur on, AWB off
        (0x03, 0x01), // exposure high bits
        (0x04, 0x00), // exposure low bits
        (0xb0, 0xe0), // global gain
        (GC2145_PAGE_SELECT, 0x02),
        (0xd1, 0x60), // Cb saturation
        (0xd2, 0x60), // Cr saturation
        (0xd3, 0x40), // luma contrast
    ];
}

/// IR LED defaults
pub mod led {
    /// LED class device driving the IR illuminator
    pub const DEFAULT_LED_NAME: &str = "ir:flash";

    /// Root of the Linux LED class
    pub const LEDS_DIR: &str = "/sys/class/leds";
}

/// Output file handling
pub mod file_formats {
    /// Image extensions accepted by the replay source
    pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "pgm", "ppm", "tif", "tiff"];

    pub fn is_image_extension(ext: &str) -> bool {
        IMAGE_EXTENSIONS.iter().any(|e| e.eq_ignore_ascii_case(ext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_round_trips_through_name() {
        for mode in HighlighterMode::ALL {
            assert_eq!(mode.display_name().parse::<HighlighterMode>(), Ok(mode));
        }
        assert!("three-frame".parse::<HighlighterMode>().is_err());
    }

    #[test]
    fn test_super_slow_is_slowest() {
        let slow = HighlighterMode::SuperSlow.default_timings();
        for mode in HighlighterMode::ALL {
            assert!(mode.default_timings().settle <= slow.settle);
        }
    }
}
