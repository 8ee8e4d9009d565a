// SPDX-License-Identifier: GPL-3.0-only

//! Per-pixel image operations used by the highlighters
//!
//! Operations that only combine pixels at the same position (`difference`,
//! `sub`, `negate`) work in place on the first image and on every channel.
//! Neighbourhood operations (`mean`, morphology, `lens_corr`) return a new
//! image.

use super::color::GrayThreshold;
use super::Rect;
use crate::errors::ImagingError;
use image::{GrayImage, ImageBuffer, Luma, Pixel, Rgb, RgbImage};

/// 8-bit image with any channel layout
pub type Image8<P> = ImageBuffer<P, Vec<u8>>;

fn ensure_same_size(expected: (u32, u32), found: (u32, u32)) -> Result<(), ImagingError> {
    if expected != found {
        return Err(ImagingError::DimensionMismatch { expected, found });
    }
    Ok(())
}

/// BT.601 luma of an RGB image
pub fn to_grayscale(img: &RgbImage) -> GrayImage {
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        let [r, g, b] = img.get_pixel(x, y).0;
        let luma = (r as u32 * 299 + g as u32 * 587 + b as u32 * 114 + 500) / 1000;
        Luma([luma as u8])
    })
}

/// Replace `a` with `|a - b|`
pub fn difference<P>(a: &mut Image8<P>, b: &Image8<P>) -> Result<(), ImagingError>
where
    P: Pixel<Subpixel = u8>,
{
    ensure_same_size(a.dimensions(), b.dimensions())?;
    for (dst, &src) in a.iter_mut().zip(b.iter()) {
        *dst = dst.abs_diff(src);
    }
    Ok(())
}

/// Saturating subtraction in place.
///
/// Computes `a - b`, or `b - a` when `reverse` is set. With a mask only the
/// pixels where the mask is non-zero are written; the rest keep `a`.
pub fn sub<P>(
    a: &mut Image8<P>,
    b: &Image8<P>,
    reverse: bool,
    mask: Option<&GrayImage>,
) -> Result<(), ImagingError>
where
    P: Pixel<Subpixel = u8>,
{
    ensure_same_size(a.dimensions(), b.dimensions())?;
    if let Some(mask) = mask {
        ensure_same_size(a.dimensions(), mask.dimensions())?;
    }

    let channels = P::CHANNEL_COUNT as usize;
    for (i, (dst, &src)) in a.iter_mut().zip(b.iter()).enumerate() {
        if let Some(mask) = mask {
            if mask.as_raw()[i / channels] == 0 {
                continue;
            }
        }
        *dst = if reverse {
            src.saturating_sub(*dst)
        } else {
            dst.saturating_sub(src)
        };
    }
    Ok(())
}

/// Invert every channel (`255 - v`)
pub fn negate<P>(img: &mut Image8<P>)
where
    P: Pixel<Subpixel = u8>,
{
    for v in img.iter_mut() {
        *v = 255 - *v;
    }
}

/// Segment a grayscale image: 255 inside any threshold, 0 elsewhere
pub fn binary(gray: &GrayImage, thresholds: &[GrayThreshold], invert: bool) -> GrayImage {
    let mut out = gray.clone();
    for v in out.iter_mut() {
        let inside = thresholds.iter().any(|t| t.contains(*v));
        *v = if inside != invert { 255 } else { 0 };
    }
    out
}

/// Invert a binary mask
pub fn invert_mask(mask: &GrayImage) -> GrayImage {
    let mut out = mask.clone();
    for v in out.iter_mut() {
        *v = if *v == 0 { 255 } else { 0 };
    }
    out
}

/// Number of set pixels in a mask
pub fn count_set(mask: &GrayImage) -> usize {
    mask.iter().filter(|&&v| v != 0).count()
}

/// Count set neighbours of `(x, y)` in a `(2 * size + 1)`² window.
///
/// Returns `(set, in_bounds)`, both excluding the centre pixel.
fn neighbours(mask: &GrayImage, x: u32, y: u32, size: u32) -> (u32, u32) {
    let (w, h) = mask.dimensions();
    let (x0, x1) = (x.saturating_sub(size), (x + size).min(w - 1));
    let (y0, y1) = (y.saturating_sub(size), (y + size).min(h - 1));

    let mut set = 0;
    let mut total = 0;
    for ny in y0..=y1 {
        for nx in x0..=x1 {
            if nx == x && ny == y {
                continue;
            }
            total += 1;
            if mask.get_pixel(nx, ny).0[0] != 0 {
                set += 1;
            }
        }
    }
    (set, total)
}

/// Remove pixels from the edges of segmented regions.
///
/// A set pixel survives when more than `threshold` of its neighbours are set.
/// Without a threshold every in-bounds neighbour must be set.
pub fn erode(mask: &GrayImage, size: u32, threshold: Option<u32>) -> GrayImage {
    if mask.width() == 0 || mask.height() == 0 || size == 0 {
        return mask.clone();
    }
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        if mask.get_pixel(x, y).0[0] == 0 {
            return Luma([0]);
        }
        let (set, total) = neighbours(mask, x, y, size);
        let keep = match threshold {
            Some(t) => set > t,
            None => set == total,
        };
        Luma([if keep { 255 } else { 0 }])
    })
}

/// Grow segmented regions.
///
/// An unset pixel becomes set when more than `threshold` of its neighbours
/// are set (any neighbour by default).
pub fn dilate(mask: &GrayImage, size: u32, threshold: Option<u32>) -> GrayImage {
    if mask.width() == 0 || mask.height() == 0 || size == 0 {
        return mask.clone();
    }
    let threshold = threshold.unwrap_or(0);
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        if mask.get_pixel(x, y).0[0] != 0 {
            return Luma([255]);
        }
        let (set, _) = neighbours(mask, x, y, size);
        Luma([if set > threshold { 255 } else { 0 }])
    })
}

/// Box blur over the in-bounds `(2 * size + 1)`² window
pub fn mean<P>(img: &Image8<P>, size: u32) -> Image8<P>
where
    P: Pixel<Subpixel = u8>,
{
    let (w, h) = img.dimensions();
    if size == 0 || w == 0 || h == 0 {
        return img.clone();
    }

    let channels = P::CHANNEL_COUNT as usize;
    let src = img.as_raw();
    let mut out = img.clone();
    let dst: &mut [u8] = &mut out;

    for y in 0..h {
        let (y0, y1) = (y.saturating_sub(size), (y + size).min(h - 1));
        for x in 0..w {
            let (x0, x1) = (x.saturating_sub(size), (x + size).min(w - 1));
            let count = ((y1 - y0 + 1) * (x1 - x0 + 1)) as u32;
            let base = (y as usize * w as usize + x as usize) * channels;
            for c in 0..channels {
                let mut sum = 0u32;
                for ny in y0..=y1 {
                    for nx in x0..=x1 {
                        sum += src[(ny as usize * w as usize + nx as usize) * channels + c] as u32;
                    }
                }
                dst[base + c] = ((sum + count / 2) / count) as u8;
            }
        }
    }
    out
}

/// Correct barrel distortion.
///
/// Each output pixel samples the source along its radius from the centre,
/// scaled by `atan(r) / r` where `r` is the distance normalised by the image
/// diagonal and multiplied by `strength`. Samples falling outside the source
/// are black. A strength of 0 leaves the image unchanged.
pub fn lens_corr<P>(img: &Image8<P>, strength: f32, zoom: f32) -> Result<Image8<P>, ImagingError>
where
    P: Pixel<Subpixel = u8>,
{
    if !strength.is_finite() || strength < 0.0 {
        return Err(ImagingError::InvalidParameter(format!(
            "lens correction strength must be >= 0, got {}",
            strength
        )));
    }
    if !zoom.is_finite() || zoom <= 0.0 {
        return Err(ImagingError::InvalidParameter(format!(
            "lens correction zoom must be > 0, got {}",
            zoom
        )));
    }

    let (w, h) = img.dimensions();
    let mut out: Image8<P> = ImageBuffer::new(w, h);
    if w == 0 || h == 0 {
        return Ok(out);
    }

    let half_w = (w / 2) as f32;
    let half_h = (h / 2) as f32;
    let radius_scale = strength / ((w as f32).powi(2) + (h as f32).powi(2)).sqrt();
    let zoom_inv = 1.0 / zoom;

    for y in 0..h {
        let dy = y as f32 - half_h;
        for x in 0..w {
            let dx = x as f32 - half_w;
            let r = (dx * dx + dy * dy).sqrt() * radius_scale;
            let theta = if r < 1e-7 { 1.0 } else { r.atan() / r };
            let sx = (half_w + theta * dx * zoom_inv).floor();
            let sy = (half_h + theta * dy * zoom_inv).floor();
            if sx >= 0.0 && sy >= 0.0 && (sx as u32) < w && (sy as u32) < h {
                out.put_pixel(x, y, *img.get_pixel(sx as u32, sy as u32));
            }
        }
    }
    Ok(out)
}

/// Copy out a region of interest, clipped to the image
pub fn crop<P>(img: &Image8<P>, window: Rect) -> Result<Image8<P>, ImagingError>
where
    P: Pixel<Subpixel = u8> + 'static,
{
    let bounds = Rect::new(0, 0, img.width(), img.height());
    let clipped = window.intersection(&bounds).ok_or_else(|| {
        ImagingError::InvalidParameter(format!(
            "window {} lies outside the {}x{} frame",
            window,
            img.width(),
            img.height()
        ))
    })?;
    Ok(image::imageops::crop_imm(img, clipped.x, clipped.y, clipped.w, clipped.h).to_image())
}

/// Draw a one-pixel rectangle outline, clipped to the image
pub fn draw_rectangle(img: &mut RgbImage, rect: Rect, color: Rgb<u8>) {
    let (w, h) = img.dimensions();
    if rect.w == 0 || rect.h == 0 || rect.x >= w || rect.y >= h {
        return;
    }
    let x1 = (rect.x + rect.w - 1).min(w - 1);
    let y1 = (rect.y + rect.h - 1).min(h - 1);

    for x in rect.x..=x1 {
        img.put_pixel(x, rect.y, color);
        img.put_pixel(x, y1, color);
    }
    for y in rect.y..=y1 {
        img.put_pixel(rect.x, y, color);
        img.put_pixel(x1, y, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(w: u32, h: u32, set: &[(u32, u32)]) -> GrayImage {
        let mut img = GrayImage::new(w, h);
        for &(x, y) in set {
            img.put_pixel(x, y, Luma([255]));
        }
        img
    }

    fn square(w: u32, h: u32, x0: u32, y0: u32, side: u32) -> GrayImage {
        let mut img = GrayImage::new(w, h);
        for y in y0..y0 + side {
            for x in x0..x0 + side {
                img.put_pixel(x, y, Luma([255]));
            }
        }
        img
    }

    #[test]
    fn test_difference_is_symmetric() {
        let mut a = GrayImage::from_raw(2, 1, vec![10, 200]).unwrap();
        let b = GrayImage::from_raw(2, 1, vec![30, 50]).unwrap();
        difference(&mut a, &b).unwrap();
        assert_eq!(a.as_raw(), &vec![20, 150]);
    }

    #[test]
    fn test_sub_saturates_and_reverses() {
        let lit = RgbImage::from_raw(2, 1, vec![200, 100, 50, 10, 10, 10]).unwrap();
        let unlit = RgbImage::from_raw(2, 1, vec![50, 120, 50, 20, 0, 5]).unwrap();

        let mut forward = lit.clone();
        sub(&mut forward, &unlit, false, None).unwrap();
        assert_eq!(forward.as_raw(), &vec![150, 0, 0, 0, 10, 5]);

        let mut reversed = unlit.clone();
        sub(&mut reversed, &lit, true, None).unwrap();
        assert_eq!(reversed.as_raw(), forward.as_raw());
    }

    #[test]
    fn test_sub_respects_mask() {
        let mut a = RgbImage::from_raw(2, 1, vec![100, 100, 100, 100, 100, 100]).unwrap();
        let b = RgbImage::from_raw(2, 1, vec![40, 40, 40, 40, 40, 40]).unwrap();
        let mask = GrayImage::from_raw(2, 1, vec![0, 255]).unwrap();

        sub(&mut a, &b, false, Some(&mask)).unwrap();
        assert_eq!(a.as_raw(), &vec![100, 100, 100, 60, 60, 60]);
    }

    #[test]
    fn test_size_mismatch_is_reported() {
        let mut a = GrayImage::new(4, 4);
        let b = GrayImage::new(4, 3);
        assert_eq!(
            difference(&mut a, &b),
            Err(ImagingError::DimensionMismatch {
                expected: (4, 4),
                found: (4, 3)
            })
        );
    }

    #[test]
    fn test_binary_and_invert() {
        let img = GrayImage::from_raw(4, 1, vec![0, 15, 16, 255]).unwrap();
        let t = [GrayThreshold::new(16, 255)];
        assert_eq!(binary(&img, &t, false).as_raw(), &vec![0, 0, 255, 255]);
        assert_eq!(binary(&img, &t, true).as_raw(), &vec![255, 255, 0, 0]);
    }

    #[test]
    fn test_erode_removes_isolated_pixels() {
        let mut mask = square(10, 10, 2, 2, 5);
        mask.put_pixel(9, 0, Luma([255]));

        let eroded = erode(&mask, 1, None);
        assert_eq!(count_set(&eroded), 9);
        assert_eq!(eroded.get_pixel(9, 0).0[0], 0);
        assert_eq!(eroded.get_pixel(4, 4).0[0], 255);
    }

    #[test]
    fn test_dilate_grows_regions() {
        let mask = gray(5, 5, &[(2, 2)]);
        let dilated = dilate(&mask, 1, None);
        assert_eq!(count_set(&dilated), 9);

        // Threshold of 1 needs two set neighbours
        assert_eq!(count_set(&dilate(&mask, 1, Some(1))), 1);
    }

    #[test]
    fn test_open_close_keeps_large_region() {
        let mask = square(12, 12, 3, 3, 6);
        let cleaned = erode(&dilate(&erode(&mask, 1, None), 1, None), 1, None);
        assert_eq!(count_set(&cleaned), 16);
    }

    #[test]
    fn test_negate() {
        let mut img = GrayImage::from_raw(3, 1, vec![0, 100, 255]).unwrap();
        negate(&mut img);
        assert_eq!(img.as_raw(), &vec![255, 155, 0]);
    }

    #[test]
    fn test_mean_averages_in_bounds_window() {
        let img = gray(3, 3, &[(1, 1)]);
        let blurred = mean(&img, 1);
        // Centre sees nine pixels, the corner sees four
        assert_eq!(blurred.get_pixel(1, 1).0[0], 28);
        assert_eq!(blurred.get_pixel(0, 0).0[0], 64);
    }

    #[test]
    fn test_lens_corr_zero_strength_is_identity() {
        let img = RgbImage::from_fn(16, 12, |x, y| Rgb([x as u8 * 10, y as u8 * 10, 7]));
        let out = lens_corr(&img, 0.0, 1.0).unwrap();
        assert_eq!(out, img);
    }

    #[test]
    fn test_lens_corr_keeps_centre_and_pulls_edges_in() {
        let img = RgbImage::from_fn(40, 30, |x, y| Rgb([x as u8, y as u8, 0]));
        let out = lens_corr(&img, 1.65, 1.0).unwrap();
        assert_eq!(out.get_pixel(20, 15), img.get_pixel(20, 15));
        // The left edge samples from closer to the centre
        assert!(out.get_pixel(0, 15).0[0] > 0);
        assert!(lens_corr(&img, 1.0, 0.0).is_err());
    }

    #[test]
    fn test_crop_clips_window() {
        let img = GrayImage::from_fn(10, 10, |x, y| Luma([(y * 10 + x) as u8]));
        let roi = crop(&img, Rect::new(8, 8, 5, 5)).unwrap();
        assert_eq!(roi.dimensions(), (2, 2));
        assert_eq!(roi.get_pixel(0, 0).0[0], 88);
        assert!(crop(&img, Rect::new(20, 20, 2, 2)).is_err());
    }

    #[test]
    fn test_draw_rectangle_outline() {
        let mut img = RgbImage::new(6, 6);
        let color = Rgb([1, 2, 3]);
        draw_rectangle(&mut img, Rect::new(1, 1, 4, 3), color);
        assert_eq!(*img.get_pixel(1, 1), color);
        assert_eq!(*img.get_pixel(4, 3), color);
        assert_eq!(*img.get_pixel(2, 2), Rgb([0, 0, 0]));
    }
}
