// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 camera control interface
//!
//! Puts the sensor into the fixed state frame differencing needs: manual
//! exposure, no automatic white balance or gain, so that the only change
//! between an unlit and a lit frame is the IR flash itself.
//!
//! Sensor-specific tuning that has no V4L2 control is written straight into
//! the sensor registers through `VIDIOC_DBG_S_REGISTER`. That needs a kernel
//! built with `CONFIG_VIDEO_ADV_DEBUG` and root privileges; failures are
//! logged and skipped.

use crate::config::{RegisterWrite, SensorSettings};
use std::fs::File;
use std::os::unix::io::AsRawFd;
use tracing::{debug, info, warn};

// ===== V4L2 Control Class Bases =====
const V4L2_CTRL_CLASS_USER: u32 = 0x00980000;
const V4L2_CTRL_CLASS_CAMERA: u32 = 0x009a0000;

const V4L2_CID_BASE: u32 = V4L2_CTRL_CLASS_USER | 0x900;
const V4L2_CID_CAMERA_CLASS_BASE: u32 = V4L2_CTRL_CLASS_CAMERA | 0x900;

// ===== V4L2 Control IDs (User Class) =====

/// Brightness control
pub const V4L2_CID_BRIGHTNESS: u32 = V4L2_CID_BASE;
/// Contrast control
pub const V4L2_CID_CONTRAST: u32 = V4L2_CID_BASE + 1;
/// Saturation control
pub const V4L2_CID_SATURATION: u32 = V4L2_CID_BASE + 2;
/// Automatic white balance
pub const V4L2_CID_AUTO_WHITE_BALANCE: u32 = V4L2_CID_BASE + 12;
/// Automatic gain control
pub const V4L2_CID_AUTOGAIN: u32 = V4L2_CID_BASE + 18;
/// Gain control
pub const V4L2_CID_GAIN: u32 = V4L2_CID_BASE + 19;

// ===== V4L2 Control IDs (Camera Class) =====

/// Exposure mode: Auto, Manual, Shutter Priority, Aperture Priority
pub const V4L2_CID_EXPOSURE_AUTO: u32 = V4L2_CID_CAMERA_CLASS_BASE + 1;
/// Absolute exposure time in 100µs units
pub const V4L2_CID_EXPOSURE_ABSOLUTE: u32 = V4L2_CID_CAMERA_CLASS_BASE + 2;

// ===== V4L2 Exposure Auto Menu Values =====

/// Automatic exposure time and iris
pub const V4L2_EXPOSURE_AUTO: i32 = 0;
/// Manual exposure time and iris
pub const V4L2_EXPOSURE_MANUAL: i32 = 1;

// ===== V4L2 Control Types =====
const V4L2_CTRL_TYPE_INTEGER: u32 = 1;
const V4L2_CTRL_TYPE_BOOLEAN: u32 = 2;
const V4L2_CTRL_TYPE_MENU: u32 = 3;

// ===== V4L2 Control Flags =====
const V4L2_CTRL_FLAG_DISABLED: u32 = 0x0001;

// ===== Debug register access =====

/// Match a sub-device by index
const V4L2_CHIP_MATCH_SUBDEV: u32 = 4;
/// Match the bridge chip by index
const V4L2_CHIP_MATCH_BRIDGE: u32 = 0;

// ===== V4L2 ioctl Numbers =====
// Calculated as: (dir << 30) | (size << 16) | ('V' << 8) | nr
// where dir: 2=READ, 1=WRITE, 3=READ|WRITE

/// Get control value (v4l2_control: 8 bytes)
const VIDIOC_G_CTRL: libc::c_ulong = 0xC008561B;
/// Set control value (v4l2_control: 8 bytes)
const VIDIOC_S_CTRL: libc::c_ulong = 0xC008561C;
/// Query control info (v4l2_queryctrl: 68 bytes)
const VIDIOC_QUERYCTRL: libc::c_ulong = 0xC0445624;
/// Write a chip register (v4l2_dbg_register: 56 bytes, write only)
const VIDIOC_DBG_S_REGISTER: libc::c_ulong = 0x4038564F;

// ===== V4L2 ioctl Structures =====

/// V4L2 control get/set structure
#[repr(C)]
struct V4l2Control {
    id: u32,
    value: i32,
}

/// V4L2 query control structure
#[repr(C)]
struct V4l2Queryctrl {
    id: u32,
    ctrl_type: u32,
    name: [u8; 32],
    minimum: i32,
    maximum: i32,
    step: i32,
    default_value: i32,
    flags: u32,
    reserved: [u32; 2],
}

/// V4L2 debug register structure; `target` is the match union (addr or name)
#[repr(C, packed)]
struct V4l2DbgRegister {
    match_type: u32,
    target: [u8; 32],
    size: u32,
    reg: u64,
    val: u64,
}

// ===== Public Types =====

/// Information about a V4L2 control
#[derive(Debug, Clone)]
pub struct ControlInfo {
    pub id: u32,
    pub name: String,
    pub ctrl_type: ControlType,
    pub minimum: i32,
    pub maximum: i32,
    pub step: i32,
    pub default_value: i32,
    pub flags: u32,
}

/// V4L2 control type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlType {
    Integer,
    Boolean,
    Menu,
    Unknown(u32),
}

impl From<u32> for ControlType {
    fn from(value: u32) -> Self {
        match value {
            V4L2_CTRL_TYPE_INTEGER => ControlType::Integer,
            V4L2_CTRL_TYPE_BOOLEAN => ControlType::Boolean,
            V4L2_CTRL_TYPE_MENU => ControlType::Menu,
            other => ControlType::Unknown(other),
        }
    }
}

impl ControlInfo {
    /// Check if control is disabled
    pub fn is_disabled(&self) -> bool {
        self.flags & V4L2_CTRL_FLAG_DISABLED != 0
    }

    /// Map a -3..=3 adjustment level onto this control's range.
    ///
    /// Level 0 is the driver default; ±3 reach the range limits. The result
    /// is snapped to the control's step.
    pub fn value_for_level(&self, level: i8) -> i32 {
        let level = level.clamp(-3, 3) as i64;
        let default = self.default_value as i64;
        let span = if level >= 0 {
            self.maximum as i64 - default
        } else {
            default - self.minimum as i64
        };
        let raw = default + span * level / 3;

        let step = self.step.max(1) as i64;
        let snapped = self.minimum as i64 + ((raw - self.minimum as i64) / step) * step;
        snapped.clamp(self.minimum as i64, self.maximum as i64) as i32
    }
}

// ===== Helper Functions =====

/// Extract a null-terminated string from a fixed-size byte array
fn extract_name(bytes: &[u8; 32]) -> String {
    let name_len = bytes.iter().position(|&c| c == 0).unwrap_or(32);
    String::from_utf8_lossy(&bytes[..name_len]).to_string()
}

/// Convert an exposure time to V4L2's 100µs units (at least 1)
pub fn exposure_to_v4l2_units(exposure_us: u32) -> i32 {
    (exposure_us.div_ceil(100)).max(1) as i32
}

// ===== Public Functions =====

/// Query if a control exists and get its information
pub fn query_control(device_path: &str, control_id: u32) -> Option<ControlInfo> {
    let file = File::open(device_path).ok()?;
    let fd = file.as_raw_fd();

    let mut qctrl = V4l2Queryctrl {
        id: control_id,
        ctrl_type: 0,
        name: [0; 32],
        minimum: 0,
        maximum: 0,
        step: 0,
        default_value: 0,
        flags: 0,
        reserved: [0; 2],
    };

    let result = unsafe { libc::ioctl(fd, VIDIOC_QUERYCTRL, &mut qctrl as *mut V4l2Queryctrl) };

    if result < 0 {
        return None;
    }

    Some(ControlInfo {
        id: qctrl.id,
        name: extract_name(&qctrl.name),
        ctrl_type: qctrl.ctrl_type.into(),
        minimum: qctrl.minimum,
        maximum: qctrl.maximum,
        step: qctrl.step,
        default_value: qctrl.default_value,
        flags: qctrl.flags,
    })
}

/// Get current value of a control
pub fn get_control(device_path: &str, control_id: u32) -> Option<i32> {
    let file = File::open(device_path).ok()?;
    let fd = file.as_raw_fd();

    let mut ctrl = V4l2Control {
        id: control_id,
        value: 0,
    };

    let result = unsafe { libc::ioctl(fd, VIDIOC_G_CTRL, &mut ctrl as *mut V4l2Control) };

    if result < 0 {
        debug!(device_path, control_id, "Failed to get V4L2 control");
        return None;
    }

    Some(ctrl.value)
}

/// Set value of a control
pub fn set_control(device_path: &str, control_id: u32, value: i32) -> Result<(), String> {
    let file = File::open(device_path).map_err(|e| format!("Failed to open device: {}", e))?;
    let fd = file.as_raw_fd();

    let mut ctrl = V4l2Control {
        id: control_id,
        value,
    };

    let result = unsafe { libc::ioctl(fd, VIDIOC_S_CTRL, &mut ctrl as *mut V4l2Control) };

    if result < 0 {
        let errno = std::io::Error::last_os_error();
        warn!(
            device_path,
            control_id,
            value,
            ?errno,
            "Failed to set V4L2 control"
        );
        return Err(format!("Failed to set control: {}", errno));
    }

    if ctrl.value != value {
        debug!(
            device_path,
            control_id,
            requested = value,
            actual = ctrl.value,
            "V4L2 control value was clamped"
        );
    }

    Ok(())
}

/// Check if a control is available on the device
pub fn has_control(device_path: &str, control_id: u32) -> bool {
    query_control(device_path, control_id)
        .map(|info| !info.is_disabled())
        .unwrap_or(false)
}

/// Write one sensor register through the debug interface.
///
/// Tries the first sub-device (usually the sensor) and falls back to the
/// bridge chip.
pub fn write_register(device_path: &str, write: &RegisterWrite) -> Result<(), String> {
    let file = File::options()
        .read(true)
        .write(true)
        .open(device_path)
        .map_err(|e| format!("Failed to open device: {}", e))?;
    let fd = file.as_raw_fd();

    let mut last_error = None;
    for match_type in [V4L2_CHIP_MATCH_SUBDEV, V4L2_CHIP_MATCH_BRIDGE] {
        let mut dbg = V4l2DbgRegister {
            match_type,
            target: [0; 32],
            size: 1,
            reg: write.reg as u64,
            val: write.value as u64,
        };

        let result =
            unsafe { libc::ioctl(fd, VIDIOC_DBG_S_REGISTER, &mut dbg as *mut V4l2DbgRegister) };
        if result >= 0 {
            return Ok(());
        }
        last_error = Some(std::io::Error::last_os_error());
    }

    Err(format!(
        "Failed to write register 0x{:02x}: {}",
        write.reg,
        last_error.map(|e| e.to_string()).unwrap_or_default()
    ))
}

/// Outcome of applying sensor settings
#[derive(Debug, Default, Clone)]
pub struct AppliedSettings {
    /// Controls and registers that were written
    pub applied: Vec<String>,
    /// Controls and registers that were missing or rejected
    pub skipped: Vec<String>,
}

/// Put the sensor into the fixed state used for frame differencing.
///
/// Every step is best effort: a device without a given control keeps its
/// current value and the step is reported in `skipped`.
pub fn apply_sensor_settings(device_path: &str, settings: &SensorSettings) -> AppliedSettings {
    let mut report = AppliedSettings::default();
    // `None` marks a control whose value could not be derived
    let mut apply = |label: &str, control_id: u32, value: Option<i32>| {
        let Some(value) = value.filter(|_| has_control(device_path, control_id)) else {
            debug!(device_path, control = label, "Control not available");
            report.skipped.push(label.to_string());
            return;
        };
        let previous = get_control(device_path, control_id);
        match set_control(device_path, control_id, value) {
            Ok(()) => {
                debug!(device_path, control = label, ?previous, value, "Control set");
                report.applied.push(format!("{}={}", label, value));
            }
            Err(_) => report.skipped.push(label.to_string()),
        }
    };

    if settings.auto_exposure {
        apply("exposure_auto", V4L2_CID_EXPOSURE_AUTO, Some(V4L2_EXPOSURE_AUTO));
    } else {
        apply("exposure_auto", V4L2_CID_EXPOSURE_AUTO, Some(V4L2_EXPOSURE_MANUAL));
        apply(
            "exposure_absolute",
            V4L2_CID_EXPOSURE_ABSOLUTE,
            Some(exposure_to_v4l2_units(settings.exposure_us)),
        );
    }

    apply(
        "white_balance_automatic",
        V4L2_CID_AUTO_WHITE_BALANCE,
        Some(settings.auto_white_balance as i32),
    );
    apply("gain_automatic", V4L2_CID_AUTOGAIN, Some(settings.auto_gain as i32));

    if let Some(gain) = settings.gain {
        apply("gain", V4L2_CID_GAIN, Some(gain));
    }

    for (label, control_id, level) in [
        ("brightness", V4L2_CID_BRIGHTNESS, settings.brightness),
        ("contrast", V4L2_CID_CONTRAST, settings.contrast),
        ("saturation", V4L2_CID_SATURATION, settings.saturation),
    ] {
        let Some(level) = level else { continue };
        let value = query_control(device_path, control_id)
            .filter(|info| !info.is_disabled())
            .map(|info| info.value_for_level(level));
        apply(label, control_id, value);
    }

    for write in settings.register_writes() {
        let label = format!("reg[0x{:02x}]", write.reg);
        match write_register(device_path, &write) {
            Ok(()) => report.applied.push(format!("{}=0x{:02x}", label, write.value)),
            Err(e) => {
                debug!(device_path, error = %e, "Register write skipped");
                report.skipped.push(label);
            }
        }
    }

    info!(
        device_path,
        applied = report.applied.len(),
        skipped = report.skipped.len(),
        "Sensor settings applied"
    );
    if !report.skipped.is_empty() {
        warn!(device_path, skipped = ?report.skipped, "Some sensor settings could not be applied");
    }

    report
}
