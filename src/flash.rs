// SPDX-License-Identifier: GPL-3.0-only

//! IR illuminator control
//!
//! The retro-reflective targets are lit by an infrared LED that the capture
//! sequence switches on and off between snapshots. On Linux the LED is a
//! LED class device under `/sys/class/leds/<name>`, driven through its
//! `brightness` file.

use crate::constants::led::LEDS_DIR;
use crate::errors::IlluminatorError;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn};

/// A light source the highlighter can switch between snapshots
pub trait Illuminator: Send {
    /// Human-readable identifier for logs
    fn name(&self) -> &str;

    /// Switch the light on or off
    fn set(&mut self, on: bool) -> Result<(), IlluminatorError>;

    /// Last state written with `set`
    fn is_on(&self) -> bool;
}

impl<T: Illuminator + ?Sized> Illuminator for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn set(&mut self, on: bool) -> Result<(), IlluminatorError> {
        (**self).set(on)
    }

    fn is_on(&self) -> bool {
        (**self).is_on()
    }
}

/// A LED class device found under `/sys/class/leds`
#[derive(Debug, Clone)]
pub struct LedDevice {
    /// Directory basename, e.g. `ir:flash`
    pub name: String,
    /// Sysfs path of the LED directory
    pub path: PathBuf,
    /// Maximum brightness value (from `max_brightness` file)
    pub max_brightness: u32,
    /// Whether the brightness file can be opened for writing
    pub writable: bool,
}

fn read_max_brightness(led_path: &Path) -> Option<u32> {
    let max_brightness_path = led_path.join("max_brightness");
    match std::fs::read_to_string(&max_brightness_path) {
        Ok(s) => match s.trim().parse::<u32>() {
            Ok(v) if v > 0 => Some(v),
            _ => {
                warn!(
                    path = %max_brightness_path.display(),
                    "Invalid max_brightness value"
                );
                None
            }
        },
        Err(e) => {
            debug!(
                path = %max_brightness_path.display(),
                error = %e,
                "Cannot read max_brightness"
            );
            None
        }
    }
}

fn is_writable(path: &Path) -> bool {
    std::fs::OpenOptions::new().write(true).open(path).is_ok()
}

/// Scan `/sys/class/leds` for LED devices
pub fn discover() -> Vec<LedDevice> {
    discover_in(Path::new(LEDS_DIR))
}

/// Scan a LED class directory; entries without a valid `max_brightness`
/// are skipped
pub fn discover_in(leds_dir: &Path) -> Vec<LedDevice> {
    let Ok(entries) = std::fs::read_dir(leds_dir) else {
        warn!(dir = %leds_dir.display(), "Cannot read LED directory, discovery skipped");
        return Vec::new();
    };

    let mut devices: Vec<LedDevice> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            let path = entry.path();
            let max_brightness = read_max_brightness(&path)?;
            let writable = is_writable(&path.join("brightness"));
            debug!(name = %name, max_brightness, writable, "Discovered LED");
            Some(LedDevice {
                name,
                path,
                max_brightness,
                writable,
            })
        })
        .collect();

    devices.sort_by(|a, b| a.name.cmp(&b.name));
    devices
}

/// Build a user-friendly message for a brightness file we may not write.
///
/// Detects the current username, the owning group of the file, and whether
/// `doas` or `sudo` is available.
pub fn permission_hint(brightness_path: &Path) -> String {
    let username = std::env::var("USER").unwrap_or_else(|_| "user".to_string());

    let escalation_tool = if Path::new("/usr/bin/doas").exists() {
        "doas"
    } else {
        "sudo"
    };

    let group = std::fs::metadata(brightness_path)
        .ok()
        .and_then(|meta| {
            let gid = meta.gid();
            let group_contents = std::fs::read_to_string("/etc/group").ok()?;
            group_contents.lines().find_map(|line| {
                let parts: Vec<&str> = line.split(':').collect();
                (parts.len() >= 3 && parts[2].parse::<u32>().ok() == Some(gid))
                    .then(|| parts[0].to_string())
            })
        })
        .unwrap_or_else(|| "root".to_string());

    format!(
        "{} is not writable.\n\n\
         Run: {escalation_tool} adduser {username} {group}\n\n\
         Then log out and back in, or install a udev rule granting the group write access.",
        brightness_path.display()
    )
}

/// IR LED driven through a sysfs LED class device
#[derive(Debug)]
pub struct SysfsLed {
    name: String,
    brightness_path: PathBuf,
    max_brightness: u32,
    active_low: bool,
    on: bool,
}

impl SysfsLed {
    /// Open `/sys/class/leds/<name>`
    pub fn open(name: &str, active_low: bool) -> Result<Self, IlluminatorError> {
        Self::open_in(Path::new(LEDS_DIR), name, active_low)
    }

    /// Open `<leds_dir>/<name>`.
    ///
    /// With `active_low` the written level is inverted: "on" writes 0 and
    /// "off" writes `max_brightness`, for LEDs wired to sink current
    /// through the controlling line.
    pub fn open_in(leds_dir: &Path, name: &str, active_low: bool) -> Result<Self, IlluminatorError> {
        let led_path = leds_dir.join(name);
        if !led_path.is_dir() {
            return Err(IlluminatorError::NotFound(format!(
                "{} (no such LED under {})",
                name,
                leds_dir.display()
            )));
        }

        let max_brightness = read_max_brightness(&led_path).ok_or_else(|| {
            IlluminatorError::NotFound(format!("{} has no usable max_brightness", name))
        })?;

        let brightness_path = led_path.join("brightness");
        if !is_writable(&brightness_path) {
            return Err(IlluminatorError::PermissionDenied(permission_hint(
                &brightness_path,
            )));
        }

        info!(name, max_brightness, active_low, "Opened IR LED");

        Ok(Self {
            name: name.to_string(),
            brightness_path,
            max_brightness,
            active_low,
            on: false,
        })
    }

    /// Brightness value written for a logical state
    fn level(&self, on: bool) -> u32 {
        if on != self.active_low {
            self.max_brightness
        } else {
            0
        }
    }
}

impl Illuminator for SysfsLed {
    fn name(&self) -> &str {
        &self.name
    }

    fn set(&mut self, on: bool) -> Result<(), IlluminatorError> {
        let level = self.level(on);
        std::fs::write(&self.brightness_path, level.to_string()).map_err(|e| {
            warn!(led = %self.name, error = %e, "Failed to write LED brightness");
            IlluminatorError::from(e)
        })?;
        trace!(led = %self.name, on, level, "LED switched");
        self.on = on;
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.on
    }
}

/// Stand-in when no LED is attached (file replay)
#[derive(Debug, Default)]
pub struct NoLed {
    on: bool,
}

impl NoLed {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Illuminator for NoLed {
    fn name(&self) -> &str {
        "none"
    }

    fn set(&mut self, on: bool) -> Result<(), IlluminatorError> {
        trace!(on, "No LED attached, ignoring switch");
        self.on = on;
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.on
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_leds(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("retroflash-leds-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let led = dir.join("ir:flash");
        std::fs::create_dir_all(&led).unwrap();
        std::fs::write(led.join("max_brightness"), "255\n").unwrap();
        std::fs::write(led.join("brightness"), "0\n").unwrap();

        let broken = dir.join("status:green");
        std::fs::create_dir_all(&broken).unwrap();
        std::fs::write(broken.join("max_brightness"), "zero\n").unwrap();
        dir
    }

    fn brightness(dir: &Path) -> String {
        std::fs::read_to_string(dir.join("ir:flash").join("brightness")).unwrap()
    }

    #[test]
    fn test_set_writes_levels() {
        let dir = fake_leds("levels");
        let mut led = SysfsLed::open_in(&dir, "ir:flash", false).unwrap();

        led.set(true).unwrap();
        assert_eq!(brightness(&dir), "255");
        assert!(led.is_on());

        led.set(false).unwrap();
        assert_eq!(brightness(&dir), "0");
        assert!(!led.is_on());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_active_low_inverts() {
        let dir = fake_leds("active-low");
        let mut led = SysfsLed::open_in(&dir, "ir:flash", true).unwrap();

        led.set(true).unwrap();
        assert_eq!(brightness(&dir), "0");
        led.set(false).unwrap();
        assert_eq!(brightness(&dir), "255");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_led_is_not_found() {
        let dir = fake_leds("missing");
        let err = SysfsLed::open_in(&dir, "nope", false).unwrap_err();
        assert!(matches!(err, IlluminatorError::NotFound(_)));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_discover_skips_invalid_entries() {
        let dir = fake_leds("discover");
        let devices = discover_in(&dir);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "ir:flash");
        assert_eq!(devices[0].max_brightness, 255);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_no_led_tracks_state() {
        let mut led = NoLed::new();
        led.set(true).unwrap();
        assert!(led.is_on());
        assert_eq!(led.name(), "none");
    }
}
