// SPDX-License-Identifier: GPL-3.0-only

//! Colour space conversion and pixel thresholds
//!
//! Goal thresholds are expressed in CIE L\*a\*b\* so that a single range
//! tolerates the brightness swings of the differenced image. Conversion is
//! sRGB (D65) with the usual piecewise gamma; L is reported in 0..=100 and
//! a/b in -128..=127.

use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// sRGB gamma expansion for every 8-bit value
static SRGB_TO_LINEAR: LazyLock<[f32; 256]> = LazyLock::new(|| {
    let mut table = [0.0f32; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        let c = i as f32 / 255.0;
        *entry = if c <= 0.04045 {
            c / 12.92
        } else {
            ((c + 0.055) / 1.055).powf(2.4)
        };
    }
    table
});

// D65 reference white
const WHITE_X: f32 = 0.950_47;
const WHITE_Y: f32 = 1.0;
const WHITE_Z: f32 = 1.088_83;

/// A pixel in CIE L*a*b*
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lab {
    pub l: i8,
    pub a: i8,
    pub b: i8,
}

/// Convert an sRGB pixel to L*a*b*
pub fn rgb_to_lab(r: u8, g: u8, b: u8) -> Lab {
    let table = &*SRGB_TO_LINEAR;
    let (r, g, b) = (table[r as usize], table[g as usize], table[b as usize]);

    let x = (0.412_456_4 * r + 0.357_576_1 * g + 0.180_437_5 * b) / WHITE_X;
    let y = (0.212_672_9 * r + 0.715_152_2 * g + 0.072_175_0 * b) / WHITE_Y;
    let z = (0.019_333_9 * r + 0.119_192_0 * g + 0.950_304_1 * b) / WHITE_Z;

    let (fx, fy, fz) = (lab_f(x), lab_f(y), lab_f(z));

    Lab {
        l: (116.0 * fy - 16.0).round().clamp(0.0, 100.0) as i8,
        a: (500.0 * (fx - fy)).round().clamp(-128.0, 127.0) as i8,
        b: (200.0 * (fy - fz)).round().clamp(-128.0, 127.0) as i8,
    }
}

fn lab_f(t: f32) -> f32 {
    const EPSILON: f32 = 216.0 / 24389.0;
    const KAPPA: f32 = 24389.0 / 27.0;
    if t > EPSILON {
        t.cbrt()
    } else {
        (KAPPA * t + 16.0) / 116.0
    }
}

/// Inclusive L*a*b* box, written as `[l_min, l_max, a_min, a_max, b_min, b_max]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i8; 6]", into = "[i8; 6]")]
pub struct LabThreshold {
    pub l_min: i8,
    pub l_max: i8,
    pub a_min: i8,
    pub a_max: i8,
    pub b_min: i8,
    pub b_max: i8,
}

impl LabThreshold {
    /// Build a threshold, swapping any bound pair given in the wrong order
    pub fn new(l: (i8, i8), a: (i8, i8), b: (i8, i8)) -> Self {
        Self {
            l_min: l.0.min(l.1),
            l_max: l.0.max(l.1),
            a_min: a.0.min(a.1),
            a_max: a.0.max(a.1),
            b_min: b.0.min(b.1),
            b_max: b.0.max(b.1),
        }
    }

    pub fn contains(&self, lab: Lab) -> bool {
        (self.l_min..=self.l_max).contains(&lab.l)
            && (self.a_min..=self.a_max).contains(&lab.a)
            && (self.b_min..=self.b_max).contains(&lab.b)
    }

    /// L is meaningful only in 0..=100
    pub fn is_valid(&self) -> bool {
        self.l_min >= 0 && self.l_max <= 100
    }
}

impl From<[i8; 6]> for LabThreshold {
    fn from(v: [i8; 6]) -> Self {
        LabThreshold::new((v[0], v[1]), (v[2], v[3]), (v[4], v[5]))
    }
}

impl From<LabThreshold> for [i8; 6] {
    fn from(t: LabThreshold) -> Self {
        [t.l_min, t.l_max, t.a_min, t.a_max, t.b_min, t.b_max]
    }
}

/// Inclusive grayscale range, written as `[min, max]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u8; 2]", into = "[u8; 2]")]
pub struct GrayThreshold {
    pub min: u8,
    pub max: u8,
}

impl GrayThreshold {
    pub fn new(min: u8, max: u8) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    pub fn contains(&self, value: u8) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

impl From<[u8; 2]> for GrayThreshold {
    fn from(v: [u8; 2]) -> Self {
        GrayThreshold::new(v[0], v[1])
    }
}

impl From<GrayThreshold> for [u8; 2] {
    fn from(t: GrayThreshold) -> Self {
        [t.min, t.max]
    }
}
