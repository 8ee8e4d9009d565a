// SPDX-License-Identifier: GPL-3.0-only

//! Direct V4L2 capture
//!
//! The frame-differencing sequence needs a snapshot at a precise moment
//! after the LED toggles, so frames are pulled synchronously from an mmap
//! stream instead of arriving through a pipeline. Every snapshot dequeues
//! one buffer and converts it to RGB.

use super::FrameSource;
use super::types::*;
use super::v4l2_controls;
use crate::config::{CameraSettings, SensorSettings};
use crate::imaging::Rect;
use crate::imaging::ops::crop;
use image::RgbImage;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

/// Number of mmap buffers queued on the device
const BUFFER_COUNT: u32 = 4;

/// A V4L2 capture device streaming at a fixed format
pub struct V4l2Camera {
    name: String,
    path: String,
    stream: Stream<'static>,
    // Keeps the device handle open for the lifetime of the stream
    _device: Device,
    format: PixelFormat,
    width: u32,
    height: u32,
    stride: u32,
    window: Option<Rect>,
    frames: u64,
}

impl V4l2Camera {
    /// Open a device, negotiate a format and start streaming.
    ///
    /// Sensor settings are applied before the warm-up so that auto exposure
    /// and white balance have time to land on the fixed values.
    pub fn open(camera: &CameraSettings, sensor: &SensorSettings) -> BackendResult<Self> {
        let path = camera.device.clone();
        let device = Device::with_path(&path)
            .map_err(|e| BackendError::DeviceNotFound(format!("{}: {}", path, e)))?;

        let caps = device
            .query_caps()
            .map_err(|e| BackendError::InitializationFailed(format!("{}: {}", path, e)))?;
        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
            return Err(BackendError::NotAvailable(format!(
                "{} ({}) is not a capture device",
                path, caps.card
            )));
        }

        let (req_width, req_height) = camera.framesize.dimensions();
        let (format, actual) = negotiate_format(&device, req_width, req_height)?;
        info!(
            path = %path,
            card = %caps.card,
            driver = %caps.driver,
            format = %format,
            width = actual.width,
            height = actual.height,
            stride = actual.stride,
            "Opened V4L2 camera"
        );
        if (actual.width, actual.height) != (req_width, req_height) {
            warn!(
                requested = %camera.framesize.display_name(),
                width = actual.width,
                height = actual.height,
                "Device picked a different frame size"
            );
        }

        if let Some(window) = camera.window {
            let frame = Rect::new(0, 0, actual.width, actual.height);
            if window.intersection(&frame) != Some(window) {
                return Err(BackendError::InitializationFailed(format!(
                    "window {} does not fit the {}x{} frame",
                    window, actual.width, actual.height
                )));
            }
        }

        v4l2_controls::apply_sensor_settings(&path, sensor);

        let stream = Stream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT).map_err(|e| {
            BackendError::InitializationFailed(format!("Failed to create buffer stream: {}", e))
        })?;

        let mut camera_source = Self {
            name: caps.card,
            path,
            stream,
            _device: device,
            format,
            width: actual.width,
            height: actual.height,
            stride: actual.stride,
            window: camera.window,
            frames: 0,
        };

        camera_source.warm_up(Duration::from_millis(camera.settle_ms))?;
        Ok(camera_source)
    }

    /// Device path (e.g. /dev/video0)
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Negotiated pixel format
    pub fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    /// Discard frames until the sensor has had `settle` to adjust
    fn warm_up(&mut self, settle: Duration) -> BackendResult<()> {
        let start = Instant::now();
        let mut skipped = 0u32;
        while start.elapsed() < settle {
            self.next_frame()?;
            skipped += 1;
        }
        debug!(path = %self.path, skipped, "Sensor warm-up finished");
        Ok(())
    }

    fn next_frame(&mut self) -> BackendResult<CameraFrame> {
        let (buf, meta) = CaptureStream::next(&mut self.stream)
            .map_err(|e| BackendError::CaptureFailed(format!("{}: {}", self.path, e)))?;

        let used = match meta.bytesused as usize {
            0 => buf.len(),
            n => n.min(buf.len()),
        };

        self.frames += 1;
        Ok(CameraFrame {
            width: self.width,
            height: self.height,
            data: buf[..used].into(),
            format: self.format,
            stride: self.stride,
            captured_at: Instant::now(),
        })
    }
}

impl FrameSource for V4l2Camera {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolution(&self) -> (u32, u32) {
        match self.window {
            Some(window) => (window.w, window.h),
            None => (self.width, self.height),
        }
    }

    fn snapshot(&mut self) -> BackendResult<RgbImage> {
        let frame = self.next_frame()?;
        let rgb = frame.to_rgb()?;
        match self.window {
            Some(window) => crop(&rgb, window).map_err(|e| BackendError::CaptureFailed(e.to_string())),
            None => Ok(rgb),
        }
    }
}

/// Request each supported format in preference order until the device
/// accepts one at the requested size.
fn negotiate_format(device: &Device, width: u32, height: u32) -> BackendResult<(PixelFormat, Format)> {
    let offered: Vec<FourCC> = device
        .enum_formats()
        .map(|formats| formats.into_iter().map(|desc| desc.fourcc).collect())
        .unwrap_or_default();

    for format in PixelFormat::PREFERENCE {
        let fourcc = FourCC::new(format.fourcc());
        if !offered.is_empty() && !offered.contains(&fourcc) {
            continue;
        }

        match device.set_format(&Format::new(width, height, fourcc)) {
            Ok(actual) if actual.fourcc == fourcc => return Ok((format, actual)),
            Ok(actual) => {
                debug!(requested = %format, got = ?actual.fourcc, "Device substituted format");
            }
            Err(e) => {
                debug!(format = %format, error = %e, "Format rejected");
            }
        }
    }

    let offered: Vec<String> = offered
        .iter()
        .filter_map(|code| code.str().ok().map(str::to_string))
        .collect();
    Err(BackendError::FormatNotSupported(format!(
        "device offers [{}], none of which can be decoded",
        offered.join(", ")
    )))
}
