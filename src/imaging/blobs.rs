// SPDX-License-Identifier: GPL-3.0-only

//! Blob detection
//!
//! Every colour threshold is segmented on its own. Pixels inside the
//! threshold are grouped into 4-connected regions, small regions are
//! dropped, and regions whose bounding boxes come within `margin` pixels of
//! each other are merged. A blob's `code` records which thresholds
//! contributed to it (bit `i` for threshold `i`).

use super::Rect;
use super::color::{Lab, LabThreshold, rgb_to_lab};
use crate::constants::blobs::{AREA_THRESHOLD, MARGIN_DIVISOR, PIXELS_THRESHOLD};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A connected region of pixels matching one or more thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blob {
    /// Bounding box
    pub rect: Rect,
    /// Number of matching pixels
    pub pixels: u32,
    /// Centroid x
    pub cx: f32,
    /// Centroid y
    pub cy: f32,
    /// Bit mask of the thresholds that produced this blob
    pub code: u32,
    /// Number of regions merged into this blob
    pub count: u32,
}

impl Blob {
    /// Fraction of the bounding box covered by blob pixels
    pub fn density(&self) -> f32 {
        match self.rect.area() {
            0 => 0.0,
            area => self.pixels as f32 / area as f32,
        }
    }

    /// Centroid rounded to the nearest pixel
    pub fn centroid(&self) -> (u32, u32) {
        (self.cx.round() as u32, self.cy.round() as u32)
    }

    fn absorb(&mut self, other: &Blob) {
        let total = (self.pixels + other.pixels) as f32;
        if total > 0.0 {
            self.cx = (self.cx * self.pixels as f32 + other.cx * other.pixels as f32) / total;
            self.cy = (self.cy * self.pixels as f32 + other.cy * other.pixels as f32) / total;
        }
        self.rect = self.rect.union(&other.rect);
        self.pixels += other.pixels;
        self.code |= other.code;
        self.count += other.count;
    }
}

/// Filtering and merging options for [`find_blobs`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobOptions {
    /// Minimum bounding-box area
    pub area_threshold: u32,
    /// Minimum pixel count
    pub pixels_threshold: u32,
    /// Bounding boxes closer than this are merged
    pub margin: u32,
    /// Merge overlapping blobs
    pub merge: bool,
    /// Only search inside this region
    pub roi: Option<Rect>,
}

impl BlobOptions {
    /// Defaults for a frame of the given height (margin = height / 40)
    pub fn for_height(height: u32) -> Self {
        Self {
            area_threshold: AREA_THRESHOLD,
            pixels_threshold: PIXELS_THRESHOLD,
            margin: height / MARGIN_DIVISOR,
            merge: true,
            roi: None,
        }
    }
}

/// Find blobs of pixels whose L*a*b* value falls inside any threshold.
///
/// The result is sorted by descending pixel count.
pub fn find_blobs(img: &RgbImage, thresholds: &[LabThreshold], options: &BlobOptions) -> Vec<Blob> {
    let frame = Rect::new(0, 0, img.width(), img.height());
    let Some(roi) = options.roi.map_or(Some(frame), |r| r.intersection(&frame)) else {
        return Vec::new();
    };
    if roi.area() == 0 || thresholds.is_empty() {
        return Vec::new();
    }

    // Convert once; every threshold reads the same L*a*b* plane
    let lab: Vec<Lab> = (roi.y..roi.bottom())
        .flat_map(|y| (roi.x..roi.right()).map(move |x| (x, y)))
        .map(|(x, y)| {
            let [r, g, b] = img.get_pixel(x, y).0;
            rgb_to_lab(r, g, b)
        })
        .collect();

    let mut blobs = Vec::new();
    for (index, threshold) in thresholds.iter().enumerate().take(32) {
        let code = 1u32 << index;
        let found = segment(&lab, roi, threshold, code);
        blobs.extend(found.into_iter().filter(|b| {
            b.pixels >= options.pixels_threshold && b.rect.area() >= options.area_threshold
        }));
    }

    if options.merge {
        blobs = merge_blobs(blobs, options.margin);
    }

    blobs.sort_by(|a, b| b.pixels.cmp(&a.pixels));
    debug!(count = blobs.len(), "Blob detection finished");
    blobs
}

/// Extract the 4-connected regions of one threshold
fn segment(lab: &[Lab], roi: Rect, threshold: &LabThreshold, code: u32) -> Vec<Blob> {
    let (w, h) = (roi.w as usize, roi.h as usize);
    let inside: Vec<bool> = lab.iter().map(|&p| threshold.contains(p)).collect();
    let mut visited = vec![false; inside.len()];
    let mut stack = Vec::new();
    let mut blobs = Vec::new();

    for start in 0..inside.len() {
        if !inside[start] || visited[start] {
            continue;
        }

        visited[start] = true;
        stack.push(start);

        let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
        let (mut max_x, mut max_y) = (0usize, 0usize);
        let (mut sum_x, mut sum_y, mut pixels) = (0u64, 0u64, 0u32);

        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % w, idx / w);
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
            sum_x += x as u64;
            sum_y += y as u64;
            pixels += 1;

            let mut visit = |n: usize| {
                if inside[n] && !visited[n] {
                    visited[n] = true;
                    stack.push(n);
                }
            };
            if x > 0 {
                visit(idx - 1);
            }
            if x + 1 < w {
                visit(idx + 1);
            }
            if y > 0 {
                visit(idx - w);
            }
            if y + 1 < h {
                visit(idx + w);
            }
        }

        blobs.push(Blob {
            rect: Rect::new(
                roi.x + min_x as u32,
                roi.y + min_y as u32,
                (max_x - min_x + 1) as u32,
                (max_y - min_y + 1) as u32,
            ),
            pixels,
            cx: roi.x as f32 + sum_x as f32 / pixels as f32,
            cy: roi.y as f32 + sum_y as f32 / pixels as f32,
            code,
            count: 1,
        });
    }

    blobs
}

/// Merge blobs whose margin-expanded bounding boxes overlap, until stable
pub fn merge_blobs(mut blobs: Vec<Blob>, margin: u32) -> Vec<Blob> {
    loop {
        let mut merged_any = false;
        let mut i = 0;
        while i < blobs.len() {
            let mut j = i + 1;
            while j < blobs.len() {
                if blobs[i].rect.expand(margin).intersects(&blobs[j].rect) {
                    let other = blobs.swap_remove(j);
                    blobs[i].absorb(&other);
                    merged_any = true;
                } else {
                    j += 1;
                }
            }
            i += 1;
        }
        if !merged_any {
            return blobs;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    const WHITE_ISH: LabThreshold = LabThreshold {
        l_min: 90,
        l_max: 100,
        a_min: -10,
        a_max: 10,
        b_min: -10,
        b_max: 10,
    };

    fn fill(img: &mut RgbImage, rect: Rect, color: [u8; 3]) {
        for y in rect.y..rect.bottom() {
            for x in rect.x..rect.right() {
                img.put_pixel(x, y, Rgb(color));
            }
        }
    }

    fn options(margin: u32, merge: bool) -> BlobOptions {
        BlobOptions {
            area_threshold: 4,
            pixels_threshold: 4,
            margin,
            merge,
            roi: None,
        }
    }

    #[test]
    fn test_single_square_blob() {
        let mut img = RgbImage::new(40, 30);
        fill(&mut img, Rect::new(10, 5, 6, 4), [255, 255, 255]);

        let blobs = find_blobs(&img, &[WHITE_ISH], &options(0, true));

        assert_eq!(blobs.len(), 1);
        let blob = &blobs[0];
        assert_eq!(blob.rect, Rect::new(10, 5, 6, 4));
        assert_eq!(blob.pixels, 24);
        assert_eq!(blob.centroid(), (13, 7));
        assert!((blob.cx - 12.5).abs() < 1e-6);
        assert_eq!(blob.code, 1);
        assert_eq!(blob.density(), 1.0);
    }

    #[test]
    fn test_small_blobs_are_filtered() {
        let mut img = RgbImage::new(40, 30);
        fill(&mut img, Rect::new(1, 1, 1, 3), [255, 255, 255]);
        fill(&mut img, Rect::new(20, 20, 3, 3), [255, 255, 255]);

        let blobs = find_blobs(&img, &[WHITE_ISH], &options(0, false));
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].rect, Rect::new(20, 20, 3, 3));
    }

    #[test]
    fn test_diagonal_pixels_are_not_connected() {
        let mut img = RgbImage::new(10, 10);
        for i in 0..6 {
            img.put_pixel(i, i, Rgb([255, 255, 255]));
        }
        let opts = BlobOptions {
            area_threshold: 1,
            pixels_threshold: 1,
            margin: 0,
            merge: false,
            roi: None,
        };
        assert_eq!(find_blobs(&img, &[WHITE_ISH], &opts).len(), 6);
    }

    #[test]
    fn test_nearby_blobs_merge_within_margin() {
        let mut img = RgbImage::new(60, 40);
        fill(&mut img, Rect::new(10, 10, 4, 4), [255, 255, 255]);
        fill(&mut img, Rect::new(16, 10, 4, 4), [255, 255, 255]);

        let apart = find_blobs(&img, &[WHITE_ISH], &options(1, true));
        assert_eq!(apart.len(), 2);

        let merged = find_blobs(&img, &[WHITE_ISH], &options(3, true));
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].rect, Rect::new(10, 10, 10, 4));
        assert_eq!(merged[0].pixels, 32);
        assert_eq!(merged[0].count, 2);
        assert!((merged[0].cx - 14.5).abs() < 1e-6);
    }

    #[test]
    fn test_codes_combine_across_thresholds() {
        let red = LabThreshold::new((40, 65), (60, 100), (40, 90));
        let mut img = RgbImage::new(40, 20);
        fill(&mut img, Rect::new(5, 5, 5, 5), [255, 255, 255]);
        fill(&mut img, Rect::new(11, 5, 5, 5), [255, 0, 0]);

        let blobs = find_blobs(&img, &[WHITE_ISH, red], &options(2, true));
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].code, 0b11);

        let separate = find_blobs(&img, &[WHITE_ISH, red], &options(0, false));
        assert_eq!(separate.len(), 2);
    }

    #[test]
    fn test_roi_limits_search() {
        let mut img = RgbImage::new(40, 20);
        fill(&mut img, Rect::new(2, 2, 5, 5), [255, 255, 255]);
        fill(&mut img, Rect::new(30, 2, 5, 5), [255, 255, 255]);

        let mut opts = options(0, true);
        opts.roi = Some(Rect::new(20, 0, 20, 20));
        let blobs = find_blobs(&img, &[WHITE_ISH], &opts);
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].rect.x, 30);
    }

    #[test]
    fn test_default_margin_tracks_height() {
        assert_eq!(BlobOptions::for_height(160).margin, 4);
        assert_eq!(BlobOptions::for_height(120).margin, 3);
    }
}
