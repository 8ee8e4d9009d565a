// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for frame sources

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Device information from V4L2 capability
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Name of the device (V4L2 card)
    pub card: String,
    /// Driver name (V4L2 driver)
    pub driver: String,
    /// Bus the device hangs off (e.g. "usb-0000:00:14.0-2")
    pub bus: String,
    /// Device path (e.g., /dev/video0)
    pub path: String,
}

/// A capture device found during enumeration
#[derive(Debug, Clone)]
pub struct CameraDevice {
    pub info: DeviceInfo,
    /// FourCC codes the device can stream (e.g. "YUYV", "MJPG")
    pub fourccs: Vec<String>,
}

impl CameraDevice {
    /// Whether the device offers any format the converters understand
    pub fn is_supported(&self) -> bool {
        self.fourccs
            .iter()
            .any(|code| PixelFormat::from_fourcc(code).is_some())
    }
}

/// Pixel layouts a frame source may deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// RGB24 - 3 bytes per pixel
    RGB24,
    /// Gray8 - single 8-bit channel (monochrome / IR sensors)
    Gray8,
    /// YUYV - packed 4:2:2 (Y0 U Y1 V)
    YUYV,
    /// UYVY - packed 4:2:2 (U Y0 V Y1)
    UYVY,
    /// RGB565 little endian - 2 bytes per pixel
    RGB565,
    /// Motion JPEG - one compressed JPEG per frame
    MJPEG,
}

impl PixelFormat {
    /// Formats in the order they are requested from a device.
    /// Uncompressed formats come first so that no decoder sits in the loop.
    pub const PREFERENCE: [PixelFormat; 6] = [
        PixelFormat::RGB24,
        PixelFormat::YUYV,
        PixelFormat::UYVY,
        PixelFormat::Gray8,
        PixelFormat::RGB565,
        PixelFormat::MJPEG,
    ];

    /// V4L2 FourCC code
    pub fn fourcc(&self) -> &'static [u8; 4] {
        match self {
            PixelFormat::RGB24 => b"RGB3",
            PixelFormat::Gray8 => b"GREY",
            PixelFormat::YUYV => b"YUYV",
            PixelFormat::UYVY => b"UYVY",
            PixelFormat::RGB565 => b"RGBP",
            PixelFormat::MJPEG => b"MJPG",
        }
    }

    pub fn from_fourcc(code: &str) -> Option<Self> {
        Self::PREFERENCE
            .into_iter()
            .find(|f| f.fourcc().as_slice() == code.as_bytes())
    }

    /// Exact number of bytes of an uncompressed frame, `None` for MJPEG
    pub fn frame_size(&self, width: u32, height: u32) -> Option<usize> {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::RGB24 => Some(pixels * 3),
            PixelFormat::Gray8 => Some(pixels),
            PixelFormat::YUYV | PixelFormat::UYVY | PixelFormat::RGB565 => Some(pixels * 2),
            PixelFormat::MJPEG => None,
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.fourcc()))
    }
}

/// A raw frame as delivered by the device
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    /// Raw bytes in `format`
    pub data: Arc<[u8]>,
    pub format: PixelFormat,
    /// Bytes per row (may include padding), unused for MJPEG
    pub stride: u32,
    /// When the frame was dequeued
    pub captured_at: Instant,
}

impl CameraFrame {
    /// Decode into packed RGB
    pub fn to_rgb(&self) -> BackendResult<image::RgbImage> {
        super::format_converters::frame_to_rgb(self)
    }
}

/// Result type alias for frame source operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Error types for frame source operations
#[derive(Debug, Clone)]
pub enum BackendError {
    /// Backend is not available on this system
    NotAvailable(String),
    /// Failed to open or configure the device
    InitializationFailed(String),
    /// Device not found
    DeviceNotFound(String),
    /// None of the requested formats is supported
    FormatNotSupported(String),
    /// Dequeuing or decoding a frame failed
    CaptureFailed(String),
    /// A camera control could not be applied
    ControlFailed(String),
    /// A frame sequence ran out of frames
    EndOfStream,
    /// I/O error
    IoError(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::NotAvailable(msg) => write!(f, "Backend not available: {}", msg),
            BackendError::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            BackendError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            BackendError::FormatNotSupported(msg) => write!(f, "Format not supported: {}", msg),
            BackendError::CaptureFailed(msg) => write!(f, "Capture failed: {}", msg),
            BackendError::ControlFailed(msg) => write!(f, "Control failed: {}", msg),
            BackendError::EndOfStream => write!(f, "End of stream"),
            BackendError::IoError(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::IoError(err.to_string())
    }
}
