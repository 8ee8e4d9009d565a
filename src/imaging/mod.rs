// SPDX-License-Identifier: GPL-3.0-only

//! Image processing for goal detection
//!
//! - [`color`]: L\*a\*b\* conversion and threshold types
//! - [`ops`]: per-pixel and neighbourhood operations on frames and masks
//! - [`blobs`]: connected-region extraction and merging

pub mod blobs;
pub mod color;
pub mod ops;

pub use blobs::{Blob, BlobOptions, find_blobs};
pub use color::{GrayThreshold, Lab, LabThreshold, rgb_to_lab};

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub fn area(&self) -> u32 {
        self.w * self.h
    }

    /// Exclusive right edge
    pub fn right(&self) -> u32 {
        self.x + self.w
    }

    /// Exclusive bottom edge
    pub fn bottom(&self) -> u32 {
        self.y + self.h
    }

    /// Grow by `margin` on every side (clamped at the origin)
    pub fn expand(&self, margin: u32) -> Rect {
        let x = self.x.saturating_sub(margin);
        let y = self.y.saturating_sub(margin);
        Rect {
            x,
            y,
            w: self.right() + margin - x,
            h: self.bottom() + margin - y,
        }
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        if !self.intersects(other) {
            return None;
        }
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        Some(Rect {
            x,
            y,
            w: self.right().min(other.right()) - x,
            h: self.bottom().min(other.bottom()) - y,
        })
    }

    pub fn union(&self, other: &Rect) -> Rect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        Rect {
            x,
            y,
            w: self.right().max(other.right()) - x,
            h: self.bottom().max(other.bottom()) - y,
        }
    }

    pub fn contains_point(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }
}

impl std::fmt::Display for Rect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}+{}+{}", self.w, self.h, self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_expand_and_intersect() {
        let a = Rect::new(0, 0, 4, 4);
        let b = Rect::new(5, 0, 4, 4);
        assert!(!a.intersects(&b));
        assert!(a.expand(1).intersects(&b));
        assert_eq!(a.expand(2), Rect::new(0, 0, 6, 6));
    }

    #[test]
    fn test_rect_union_and_intersection() {
        let a = Rect::new(2, 2, 4, 4);
        let b = Rect::new(4, 4, 4, 4);
        assert_eq!(a.union(&b), Rect::new(2, 2, 6, 6));
        assert_eq!(a.intersection(&b), Some(Rect::new(4, 4, 2, 2)));
        assert_eq!(a.intersection(&Rect::new(10, 10, 1, 1)), None);
    }
}
