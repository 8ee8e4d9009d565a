// SPDX-License-Identifier: GPL-3.0-only
//! Pixel format conversion to packed RGB
//!
//! Every frame source hands the pipeline an `RgbImage`; these converters
//! cover the raw layouts a V4L2 device may stream.

use super::types::{BackendError, BackendResult, CameraFrame, PixelFormat};
use image::{ImageFormat, RgbImage};

/// Decode a raw frame into packed RGB
pub fn frame_to_rgb(frame: &CameraFrame) -> BackendResult<RgbImage> {
    let (width, height) = (frame.width, frame.height);

    let rgb = match frame.format {
        PixelFormat::MJPEG => return decode_mjpeg(frame),
        PixelFormat::RGB24 => unpad_rows(frame)?,
        PixelFormat::Gray8 => gray_to_rgb(&unpad_rows(frame)?),
        PixelFormat::YUYV => packed_422_to_rgb(&unpad_rows(frame)?, [0, 1, 2, 3]),
        PixelFormat::UYVY => packed_422_to_rgb(&unpad_rows(frame)?, [1, 0, 3, 2]),
        PixelFormat::RGB565 => rgb565_to_rgb(&unpad_rows(frame)?),
    };

    RgbImage::from_raw(width, height, rgb).ok_or_else(|| {
        BackendError::CaptureFailed(format!(
            "{} frame too short for {}x{}",
            frame.format, width, height
        ))
    })
}

fn decode_mjpeg(frame: &CameraFrame) -> BackendResult<RgbImage> {
    let decoded = image::load_from_memory_with_format(&frame.data, ImageFormat::Jpeg)
        .map_err(|e| BackendError::CaptureFailed(format!("MJPEG decode failed: {}", e)))?;
    Ok(decoded.to_rgb8())
}

/// Strip row padding so rows are tightly packed
fn unpad_rows(frame: &CameraFrame) -> BackendResult<Vec<u8>> {
    let expected = frame
        .format
        .frame_size(frame.width, frame.height)
        .unwrap_or(frame.data.len());
    let row_bytes = expected / frame.height.max(1) as usize;
    let stride = (frame.stride as usize).max(row_bytes);

    if stride == row_bytes {
        if frame.data.len() < expected {
            return Err(BackendError::CaptureFailed(format!(
                "short frame: {} of {} bytes",
                frame.data.len(),
                expected
            )));
        }
        return Ok(frame.data[..expected].to_vec());
    }

    let mut packed = Vec::with_capacity(expected);
    for row in 0..frame.height as usize {
        let start = row * stride;
        let Some(bytes) = frame.data.get(start..start + row_bytes) else {
            return Err(BackendError::CaptureFailed(format!(
                "short frame: row {} missing",
                row
            )));
        };
        packed.extend_from_slice(bytes);
    }
    Ok(packed)
}

fn gray_to_rgb(data: &[u8]) -> Vec<u8> {
    data.iter().flat_map(|&v| [v, v, v]).collect()
}

/// Convert packed 4:2:2 YUV.
///
/// `order` gives the byte offsets of Y0, U, Y1 and V inside each 4-byte group.
/// Uses BT.601 coefficients.
fn packed_422_to_rgb(data: &[u8], order: [usize; 4]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 2 * 3);
    for chunk in data.chunks_exact(4) {
        let u = chunk[order[1]] as f32 - 128.0;
        let v = chunk[order[3]] as f32 - 128.0;
        for y in [chunk[order[0]] as f32, chunk[order[2]] as f32] {
            rgb.push((y + 1.402 * v).clamp(0.0, 255.0) as u8);
            rgb.push((y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8);
            rgb.push((y + 1.772 * u).clamp(0.0, 255.0) as u8);
        }
    }
    rgb
}

/// Expand little-endian RGB565, replicating the high bits into the low ones
fn rgb565_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 2 * 3);
    for chunk in data.chunks_exact(2) {
        let v = u16::from_le_bytes([chunk[0], chunk[1]]);
        let r = ((v >> 11) & 0x1f) as u8;
        let g = ((v >> 5) & 0x3f) as u8;
        let b = (v & 0x1f) as u8;
        rgb.push((r << 3) | (r >> 2));
        rgb.push((g << 2) | (g >> 4));
        rgb.push((b << 3) | (b >> 2));
    }
    rgb
}
